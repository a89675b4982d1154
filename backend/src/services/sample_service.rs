use crate::error::AppError;
use crate::models::{BaseViewSample, DataSource, ViewSample};
use crate::services::database::{release, DatabaseConnector, QueryResult};
use crate::services::virtual_view_service::resolve_definition_columns;
use crate::storage::SqliteStorage;
use chrono::Utc;
use serde_json::Map;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const DEFAULT_SAMPLE_ROW_LIMIT: u32 = 5;

/// Previews persisted definitions against the live external database.
///
/// Stored identifiers go into the SELECT verbatim; they were checked against
/// the catalog when the definition was created.
pub struct SampleDataComposer {
    storage: Arc<SqliteStorage>,
    connector: Arc<dyn DatabaseConnector>,
    row_limit: u32,
}

impl SampleDataComposer {
    pub fn new(
        storage: Arc<SqliteStorage>,
        connector: Arc<dyn DatabaseConnector>,
        row_limit: u32,
    ) -> Self {
        Self {
            storage,
            connector,
            row_limit,
        }
    }

    /// Sample a base view; rows are keyed by column name
    pub async fn sample_virtual_base_view(
        &self,
        view_id: &str,
        user_id: &str,
    ) -> Result<BaseViewSample, AppError> {
        let view = self
            .storage
            .get_virtual_base_view(view_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Virtual base view {}", view_id)))?;
        let data_source = self.owned_data_source(&view.data_source_id, user_id).await?;

        let sql = format!(
            "SELECT {} FROM {} LIMIT {}",
            view.selected_columns.join(", "),
            view.table_name,
            self.row_limit
        );
        let result = self.fetch(&data_source, &sql).await?;

        let rows = result
            .rows
            .into_iter()
            .map(|row| {
                view.selected_columns
                    .iter()
                    .cloned()
                    .zip(row)
                    .collect::<Map<_, _>>()
            })
            .collect();

        if let Err(e) = self.storage.touch_virtual_base_view(&view.id, user_id, Utc::now()).await {
            tracing::warn!("Failed to record access to virtual base view {}: {}", view.id, e);
        }

        Ok(BaseViewSample {
            columns: view.selected_columns,
            rows,
        })
    }

    /// Sample a view; rows are positional and aligned with `columns`.
    ///
    /// Only views whose columns resolve to one data source and one table can
    /// be sampled.
    pub async fn sample_virtual_view(&self, view_id: &str, user_id: &str) -> Result<ViewSample, AppError> {
        let view = self
            .storage
            .get_virtual_view(view_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Virtual view {}", view_id)))?;

        let columns = resolve_definition_columns(&self.storage, &view, user_id).await?;
        if columns.is_empty() {
            return Err(AppError::Validation(format!(
                "Virtual view {} selects no columns",
                view.id
            )));
        }

        let data_sources: BTreeSet<&str> = columns
            .iter()
            .filter_map(|c| c.data_source_id.as_deref())
            .collect();
        if data_sources.len() > 1 {
            return Err(AppError::UnsupportedComposition(format!(
                "virtual view {} spans {} data sources; joins across data sources are not supported",
                view.id,
                data_sources.len()
            )));
        }

        let tables: BTreeSet<&str> = columns.iter().map(|c| c.table_name.as_str()).collect();
        if tables.len() > 1 {
            return Err(AppError::UnsupportedComposition(format!(
                "virtual view {} spans {} tables; joins across tables are not supported",
                view.id,
                tables.len()
            )));
        }

        let (data_source_id, table_name) = match (data_sources.first(), tables.first()) {
            (Some(ds), Some(table)) => (ds.to_string(), table.to_string()),
            _ => {
                return Err(AppError::Internal(format!(
                    "Columns of virtual view {} have no data source",
                    view.id
                )))
            }
        };
        let data_source = self.owned_data_source(&data_source_id, user_id).await?;

        let qualified: Vec<String> = columns
            .iter()
            .map(|c| format!("{}.{}", c.table_name, c.column_name))
            .collect();
        let labels: Vec<String> = view
            .definition
            .selected_columns
            .iter()
            .zip(&qualified)
            .map(|(selected, name)| selected.alias.clone().unwrap_or_else(|| name.clone()))
            .collect();

        let sql = format!(
            "SELECT {} FROM {} LIMIT {}",
            qualified.join(", "),
            table_name,
            self.row_limit
        );
        let result = self.fetch(&data_source, &sql).await?;

        if let Err(e) = self.storage.touch_virtual_view(&view.id, user_id, Utc::now()).await {
            tracing::warn!("Failed to record access to virtual view {}: {}", view.id, e);
        }

        Ok(ViewSample {
            columns: labels,
            rows: result.rows,
        })
    }

    async fn owned_data_source(&self, id: &str, user_id: &str) -> Result<DataSource, AppError> {
        self.storage
            .get_data_source(id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Data source {}", id)))
    }

    /// Open, run and close; the connection is released even when the query fails.
    async fn fetch(&self, data_source: &DataSource, sql: &str) -> Result<QueryResult, AppError> {
        let params = data_source.connection_params();
        let mut adapter = self.connector.connect(&params).await?;

        tracing::debug!("Sampling data source {}: {}", data_source.id, sql);
        let result = adapter.query(sql).await;
        release(adapter).await;

        let result = result?;
        tracing::debug!(
            "Sampled {} rows from data source {} in {}ms",
            result.rows.len(),
            data_source.id,
            result.execution_time_ms
        );
        Ok(result)
    }
}
