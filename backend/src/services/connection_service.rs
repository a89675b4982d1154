use crate::error::AppError;
use crate::models::{ColumnDescriptor, ConnectionParams, DataSource, DataSourceWithSchema, ProbeResult};
use crate::services::database::{release, DatabaseAdapter, DatabaseConnector, Dialect};
use crate::storage::SqliteStorage;
use crate::validation::IdentifierValidator;
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;

/// Opens transient connections to external databases, checks they are reachable
/// and turns their catalog into ColumnDescriptors.
///
/// Every connection is closed before the call returns, on every path.
pub struct ConnectionService {
    storage: Arc<SqliteStorage>,
    connector: Arc<dyn DatabaseConnector>,
}

impl ConnectionService {
    pub fn new(storage: Arc<SqliteStorage>, connector: Arc<dyn DatabaseConnector>) -> Self {
        Self { storage, connector }
    }

    /// Reachability check. Connectivity problems are reported in the result;
    /// malformed parameters or an unknown dialect are errors.
    pub async fn probe(&self, params: &ConnectionParams) -> Result<ProbeResult, AppError> {
        validate_params(params)?;

        match self.open_and_ping(params).await {
            Ok(adapter) => {
                release(adapter).await;
                Ok(ProbeResult::connected())
            }
            Err(AppError::Connection(message)) => Ok(ProbeResult::failed(message)),
            Err(e) => Err(e),
        }
    }

    /// Introspect the external database. Nothing is persisted; the descriptors
    /// carry fresh ids but no data source.
    pub async fn introspect(&self, params: &ConnectionParams) -> Result<Vec<ColumnDescriptor>, AppError> {
        validate_params(params)?;

        let mut adapter = self.open_and_ping(params).await?;
        let columns = introspect_over(adapter.as_mut(), params).await;
        release(adapter).await;
        columns
    }

    /// Register a data source for `user_id` and store its schema.
    ///
    /// A failed probe still records the data source, with `failed` status and the
    /// driver message, and returns the connectivity error. A successful probe is
    /// followed by introspection over the same connection; the data source and its
    /// columns are then written in one transaction.
    pub async fn connect_fetch_and_persist(
        &self,
        user_id: &str,
        params: &ConnectionParams,
    ) -> Result<DataSourceWithSchema, AppError> {
        validate_params(params)?;

        let mut adapter = match self.open_and_ping(params).await {
            Ok(adapter) => adapter,
            Err(AppError::Connection(message)) => {
                let data_source = DataSource::new(user_id, params, ProbeResult::failed(message.clone()));
                self.storage.insert_data_source(&data_source).await?;
                tracing::warn!(
                    "Recorded failed connection attempt for data source {} ({}): {}",
                    data_source.id,
                    params.source_name,
                    message
                );
                return Err(AppError::Connection(message));
            }
            Err(e) => return Err(e),
        };

        let introspected = introspect_over(adapter.as_mut(), params).await;
        release(adapter).await;
        let columns = introspected?;

        let data_source = DataSource::new(user_id, params, ProbeResult::connected());
        let columns: Vec<ColumnDescriptor> = columns
            .into_iter()
            .map(|mut column| {
                column.data_source_id = Some(data_source.id.clone());
                column
            })
            .collect();

        self.storage
            .insert_data_source_with_columns(&data_source, &columns)
            .await?;

        tracing::info!(
            "Registered data source {} ({}) with {} columns",
            data_source.id,
            data_source.source_name,
            columns.len()
        );

        Ok(DataSourceWithSchema { data_source, columns })
    }

    /// Try a connection and return its schema without saving anything
    pub async fn test_only(&self, params: &ConnectionParams) -> Result<Vec<ColumnDescriptor>, AppError> {
        let columns = self.introspect(params).await?;
        tracing::info!(
            "Test connection to {} succeeded, {} columns found",
            params.source_name,
            columns.len()
        );
        Ok(columns)
    }

    /// Persist a data source with a schema obtained earlier from `test_only`.
    ///
    /// The external database is not contacted again and `schema` is trusted as
    /// given; each column is copied under a fresh id.
    pub async fn save_after_test(
        &self,
        user_id: &str,
        params: &ConnectionParams,
        schema: &[ColumnDescriptor],
    ) -> Result<DataSourceWithSchema, AppError> {
        validate_params(params)?;

        let data_source = DataSource::new(user_id, params, ProbeResult::connected());
        let columns: Vec<ColumnDescriptor> = schema
            .iter()
            .map(|column| column.rematerialize(&data_source.id))
            .collect();

        self.storage
            .insert_data_source_with_columns(&data_source, &columns)
            .await?;

        tracing::info!(
            "Saved tested data source {} ({}) with {} columns",
            data_source.id,
            data_source.source_name,
            columns.len()
        );

        Ok(DataSourceWithSchema { data_source, columns })
    }

    async fn open_and_ping(&self, params: &ConnectionParams) -> Result<Box<dyn DatabaseAdapter>, AppError> {
        let mut adapter = self.connector.connect(params).await?;
        if let Err(e) = adapter.ping().await {
            release(adapter).await;
            return Err(e);
        }
        Ok(adapter)
    }
}

/// Required connection fields, a dialect the adapter layer knows, and for MySQL
/// a database name that can be interpolated into the catalog query
fn validate_params(params: &ConnectionParams) -> Result<Dialect, AppError> {
    let required = [
        (&params.source_name, "Source name"),
        (&params.host, "Host"),
        (&params.user, "User"),
        (&params.db_name, "Database name"),
    ];
    for (value, what) in required {
        if value.trim().is_empty() {
            return Err(AppError::Validation(format!("{} cannot be empty", what)));
        }
    }
    if params.port == 0 {
        return Err(AppError::Validation("Port must be between 1 and 65535".to_string()));
    }

    let dialect = Dialect::from_str(&params.db_type)?;
    if dialect == Dialect::MySQL {
        IdentifierValidator::validate(&params.db_name, "Database name")?;
    }
    Ok(dialect)
}

async fn introspect_over(
    adapter: &mut dyn DatabaseAdapter,
    params: &ConnectionParams,
) -> Result<Vec<ColumnDescriptor>, AppError> {
    let sql = adapter.dialect().introspection_query(params)?;
    let result = adapter.query(&sql).await?;
    let retrieved_at = Utc::now();

    // Ordinal restarts at 1 for each (schema, table)
    let mut columns = Vec::with_capacity(result.rows.len());
    let mut ordinal = 0;
    let mut previous: Option<(Option<String>, String)> = None;
    for row in &result.rows {
        let mut column = ColumnDescriptor::from_introspection_row(row, 0, retrieved_at)?;
        let key = (column.schema_name.clone(), column.table_name.clone());
        if previous.as_ref() != Some(&key) {
            ordinal = 0;
            previous = Some(key);
        }
        ordinal += 1;
        column.ordinal_position = ordinal;
        columns.push(column);
    }

    tracing::debug!(
        "Introspected {} columns from {} in {}ms",
        columns.len(),
        params.source_name,
        result.execution_time_ms
    );

    Ok(columns)
}
