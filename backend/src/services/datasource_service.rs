use crate::error::AppError;
use crate::models::{ColumnDescriptor, DataSource};
use crate::storage::SqliteStorage;
use std::sync::Arc;

/// Read-side queries over registered data sources
pub struct DataSourceService {
    storage: Arc<SqliteStorage>,
}

impl DataSourceService {
    pub fn new(storage: Arc<SqliteStorage>) -> Self {
        Self { storage }
    }

    /// Data sources owned by `user_id`, newest first
    pub async fn list_data_sources(&self, user_id: &str) -> Result<Vec<DataSource>, AppError> {
        Ok(self.storage.list_data_sources(user_id).await?)
    }

    /// Stored columns of one data source, ordered by schema, table and ordinal
    pub async fn get_data_source_schema(
        &self,
        data_source_id: &str,
        user_id: &str,
    ) -> Result<Vec<ColumnDescriptor>, AppError> {
        self.storage
            .get_data_source(data_source_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Data source {}", data_source_id)))?;

        Ok(self.storage.list_columns(data_source_id).await?)
    }
}
