// MySQL adapter over a single mysql_async connection
use crate::error::AppError;
use crate::services::database::adapter::{DatabaseAdapter, QueryResult};
use crate::services::database::Dialect;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, Row, Value as MySqlValue};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

pub struct MySQLAdapter {
    conn: Conn,
}

impl MySQLAdapter {
    pub async fn connect(connection_url: &str, connect_timeout: Duration) -> Result<Self, AppError> {
        let opts = Opts::from_url(connection_url)
            .map_err(|_| AppError::Connection("Invalid MySQL connection parameters".to_string()))?;

        let conn = tokio::time::timeout(connect_timeout, Conn::new(opts))
            .await
            .map_err(|_| {
                AppError::Connection(format!(
                    "Timed out connecting to MySQL after {} seconds",
                    connect_timeout.as_secs()
                ))
            })?
            .map_err(|e| AppError::Connection(format!("Failed to connect to MySQL: {}", e)))?;

        Ok(Self { conn })
    }

    fn row_to_json(row: &Row) -> Vec<Value> {
        (0..row.len())
            .map(|idx| {
                row.as_ref(idx)
                    .map(|v| Self::mysql_value_to_json(v.clone()))
                    .unwrap_or(Value::Null)
            })
            .collect()
    }

    fn mysql_value_to_json(mysql_val: MySqlValue) -> Value {
        match mysql_val {
            MySqlValue::NULL => Value::Null,
            // Binary payloads and text-protocol values alike become text
            MySqlValue::Bytes(bytes) => json!(String::from_utf8_lossy(&bytes)),
            MySqlValue::Int(i) => json!(i),
            MySqlValue::UInt(u) => json!(u),
            MySqlValue::Float(f) => json!(f),
            MySqlValue::Double(d) => json!(d),
            MySqlValue::Date(y, m, d, h, min, s, _) => {
                json!(format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, m, d, h, min, s))
            }
            MySqlValue::Time(is_neg, d, h, m, s, _) => {
                let sign = if is_neg { "-" } else { "" };
                let total_hours = d * 24 + h as u32;
                json!(format!("{}{}:{:02}:{:02}", sign, total_hours, m, s))
            }
        }
    }
}

#[async_trait::async_trait]
impl DatabaseAdapter for MySQLAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::MySQL
    }

    async fn ping(&mut self) -> Result<(), AppError> {
        self.conn
            .ping()
            .await
            .map_err(|e| AppError::Connection(format!("MySQL liveness check failed: {}", e)))
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult, AppError> {
        let start_time = Instant::now();

        let mut result = self
            .conn
            .query_iter(sql)
            .await
            .map_err(|e| AppError::Connection(format!("Query execution failed: {}", e)))?;

        let columns: Vec<String> = result
            .columns_ref()
            .iter()
            .map(|c| c.name_str().to_string())
            .collect();

        let rows: Vec<Row> = result
            .collect()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to read query results: {}", e)))?;

        Ok(QueryResult {
            columns,
            rows: rows.iter().map(Self::row_to_json).collect(),
            execution_time_ms: start_time.elapsed().as_millis() as u64,
        })
    }

    async fn close(self: Box<Self>) -> Result<(), AppError> {
        self.conn
            .disconnect()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to disconnect from MySQL: {}", e)))
    }
}
