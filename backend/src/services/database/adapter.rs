// Adapter seam over a single live connection to an external database
use crate::error::AppError;
use crate::models::ConnectionParams;
use crate::services::database::Dialect;
use serde_json::Value;

/// Result of one statement, with values already normalized.
///
/// Binary payloads arrive as text, SQL NULL as `Value::Null`; other scalars keep
/// their driver-native shape (numbers, booleans, temporal values as strings).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub execution_time_ms: u64,
}

/// One open connection. Never pooled: callers open, use and `close` it within a
/// single operation.
#[async_trait::async_trait]
pub trait DatabaseAdapter: Send {
    fn dialect(&self) -> Dialect;

    /// Liveness check over the open connection
    async fn ping(&mut self) -> Result<(), AppError>;

    /// Run a statement and return every row
    async fn query(&mut self, sql: &str) -> Result<QueryResult, AppError>;

    /// Release the connection
    async fn close(self: Box<Self>) -> Result<(), AppError>;
}

/// Opens adapters for a set of connection parameters
#[async_trait::async_trait]
pub trait DatabaseConnector: Send + Sync {
    async fn connect(
        &self,
        params: &ConnectionParams,
    ) -> Result<Box<dyn DatabaseAdapter>, AppError>;
}

/// Close an adapter, logging rather than surfacing a failed close.
pub async fn release(adapter: Box<dyn DatabaseAdapter>) {
    let dialect = adapter.dialect();
    if let Err(e) = adapter.close().await {
        tracing::warn!("Failed to close {} connection cleanly: {}", dialect.as_str(), e);
    }
}
