use crate::error::AppError;
use crate::models::{
    validate_description, validate_name, ColumnDescriptor, CreateVirtualBaseViewRequest,
    VirtualBaseView,
};
use crate::storage::{is_unique_violation, SqliteStorage};
use std::sync::Arc;

/// Definitions of single-table projections referenced by column name
pub struct VirtualBaseViewService {
    storage: Arc<SqliteStorage>,
}

impl VirtualBaseViewService {
    pub fn new(storage: Arc<SqliteStorage>) -> Self {
        Self { storage }
    }

    /// Validate and store a base view.
    ///
    /// Every selected name must exist under (data source, table) for a data
    /// source `user_id` owns; a single distinct-count query checks all of them.
    pub async fn create(
        &self,
        user_id: &str,
        request: CreateVirtualBaseViewRequest,
    ) -> Result<VirtualBaseView, AppError> {
        validate_name(&request.name, "Virtual base view").map_err(AppError::Validation)?;
        validate_description(&request.description).map_err(AppError::Validation)?;
        if request.data_source_id.trim().is_empty() {
            return Err(AppError::Validation("Data source id cannot be empty".to_string()));
        }
        if request.table_name.trim().is_empty() {
            return Err(AppError::Validation("Table name cannot be empty".to_string()));
        }
        if request.selected_columns.is_empty() {
            return Err(AppError::Validation("At least one column must be selected".to_string()));
        }

        let matched = self
            .storage
            .count_matching_columns(
                user_id,
                &request.data_source_id,
                &request.table_name,
                &request.selected_columns,
            )
            .await?;
        if matched != request.selected_columns.len() {
            return Err(AppError::NotFound(format!(
                "Selected columns of table '{}' in data source {}",
                request.table_name, request.data_source_id
            )));
        }

        let view = VirtualBaseView::new(user_id, request);
        match self.storage.insert_virtual_base_view(&view).await {
            Ok(()) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(AppError::Conflict(format!(
                    "A virtual base view named '{}' already exists",
                    view.name
                )));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            "Created virtual base view {} over {}.{} ({} columns)",
            view.id,
            view.data_source_id,
            view.table_name,
            view.selected_columns.len()
        );
        Ok(view)
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<VirtualBaseView>, AppError> {
        Ok(self.storage.list_virtual_base_views(user_id).await?)
    }

    pub async fn get(&self, id: &str, user_id: &str) -> Result<VirtualBaseView, AppError> {
        self.storage
            .get_virtual_base_view(id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Virtual base view {}", id)))
    }

    /// Catalog entries behind the base view's columns, in table order
    pub async fn get_schema(&self, id: &str, user_id: &str) -> Result<Vec<ColumnDescriptor>, AppError> {
        let view = self.get(id, user_id).await?;
        Ok(self
            .storage
            .columns_by_names(
                user_id,
                &view.data_source_id,
                &view.table_name,
                &view.selected_columns,
            )
            .await?)
    }
}
