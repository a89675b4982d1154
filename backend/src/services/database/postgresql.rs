// PostgreSQL adapter over a single tokio-postgres connection
use crate::error::AppError;
use crate::services::database::adapter::{DatabaseAdapter, QueryResult};
use crate::services::database::Dialect;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, NoTls, Row, SimpleQueryMessage};

pub struct PostgreSQLAdapter {
    client: Client,
    connection_task: JoinHandle<()>,
}

impl PostgreSQLAdapter {
    pub async fn connect(connection_string: &str, connect_timeout: Duration) -> Result<Self, AppError> {
        let mut config: tokio_postgres::Config = connection_string
            .parse()
            .map_err(|_| AppError::Connection("Invalid PostgreSQL connection parameters".to_string()))?;
        config.connect_timeout(connect_timeout);

        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| AppError::Connection(format!("Failed to connect to PostgreSQL: {}", describe(&e))))?;

        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!("PostgreSQL connection closed with error: {}", e);
            }
        });

        Ok(Self {
            client,
            connection_task,
        })
    }
}

#[async_trait::async_trait]
impl DatabaseAdapter for PostgreSQLAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::PostgreSQL
    }

    async fn ping(&mut self) -> Result<(), AppError> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| AppError::Connection(format!("PostgreSQL liveness check failed: {}", describe(&e))))?;
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult, AppError> {
        let start_time = Instant::now();

        let statement = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| AppError::Connection(format!("Query preparation failed: {}", describe(&e))))?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let types: Vec<Type> = statement.columns().iter().map(|c| c.type_().clone()).collect();

        let rows = if types.iter().all(decodes_natively) {
            let rows = self
                .client
                .query(&statement, &[])
                .await
                .map_err(|e| AppError::Connection(format!("Query execution failed: {}", describe(&e))))?;
            match rows.iter().map(row_to_json).collect::<Option<Vec<_>>>() {
                Some(rows) => rows,
                None => {
                    tracing::debug!("Binary decoding failed, re-running as text: {}", sql);
                    self.query_as_text(sql, &types).await?
                }
            }
        } else {
            self.query_as_text(sql, &types).await?
        };

        Ok(QueryResult {
            columns,
            rows,
            execution_time_ms: start_time.elapsed().as_millis() as u64,
        })
    }

    async fn close(self: Box<Self>) -> Result<(), AppError> {
        let PostgreSQLAdapter {
            client,
            connection_task,
        } = *self;
        // Dropping the client ends the connection future
        drop(client);
        connection_task
            .await
            .map_err(|e| AppError::Internal(format!("PostgreSQL connection task failed: {}", e)))
    }
}

fn describe(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db_error) => format!(
            "Code: {}, Message: {}",
            db_error.code().code(),
            db_error.message()
        ),
        None => e.to_string(),
    }
}

impl PostgreSQLAdapter {
    /// Run `sql` over the simple query protocol, where the server renders
    /// every value as text.
    async fn query_as_text(&self, sql: &str, types: &[Type]) -> Result<Vec<Vec<Value>>, AppError> {
        let messages = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| AppError::Connection(format!("Query execution failed: {}", describe(&e))))?;

        let rows = messages
            .iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => Some(row),
                _ => None,
            })
            .map(|row| {
                types
                    .iter()
                    .enumerate()
                    .map(|(idx, ty)| match row.try_get(idx) {
                        Ok(Some(text)) => text_to_json(text, ty),
                        _ => Value::Null,
                    })
                    .collect()
            })
            .collect();
        Ok(rows)
    }
}

/// Types `cell_to_json` reads from the binary protocol
fn decodes_natively(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::INT2
            | Type::INT4
            | Type::INT8
            | Type::OID
            | Type::FLOAT4
            | Type::FLOAT8
            | Type::BOOL
            | Type::NUMERIC
            | Type::BYTEA
            | Type::TIMESTAMP
            | Type::TIMESTAMPTZ
            | Type::DATE
            | Type::TIME
            | Type::UUID
            | Type::JSON
            | Type::JSONB
    ) || <String as FromSql>::accepts(ty)
}

/// `None` when any cell cannot be decoded in binary form
fn row_to_json(row: &Row) -> Option<Vec<Value>> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| cell_to_json(row, idx, column.type_()))
        .collect()
}

fn cell_to_json(row: &Row, idx: usize, ty: &Type) -> Option<Value> {
    let value = match *ty {
        Type::INT2 => row.try_get::<_, Option<i16>>(idx).map(|v| v.map(|v| json!(v))),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx).map(|v| v.map(|v| json!(v))),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).map(|v| v.map(|v| json!(v))),
        Type::OID => row.try_get::<_, Option<u32>>(idx).map(|v| v.map(|v| json!(v))),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(idx).map(|v| v.map(|v| json!(v))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx).map(|v| v.map(|v| json!(v))),
        Type::BOOL => row.try_get::<_, Option<bool>>(idx).map(|v| v.map(|v| json!(v))),
        // NaN, infinities and values beyond 28 digits fail here and go through text
        Type::NUMERIC => row
            .try_get::<_, Option<Decimal>>(idx)
            .map(|v| v.map(|d| json!(d.to_string()))),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .map(|v| v.map(|bytes| json!(String::from_utf8_lossy(&bytes)))),
        Type::TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .map(|v| v.map(|t| json!(t.to_string()))),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .map(|v| v.map(|t| json!(t.to_rfc3339()))),
        Type::DATE => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .map(|v| v.map(|d| json!(d.to_string()))),
        Type::TIME => row
            .try_get::<_, Option<chrono::NaiveTime>>(idx)
            .map(|v| v.map(|t| json!(t.to_string()))),
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)
            .map(|v| v.map(|u| json!(u.to_string()))),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(idx),
        _ => row.try_get::<_, Option<String>>(idx).map(|v| v.map(|s| json!(s))),
    };

    value.ok().map(|v| v.unwrap_or(Value::Null))
}

/// Server text output mapped onto the same JSON shapes the binary path produces.
/// Anything else (intervals, network types, enums, arrays, ...) stays text.
fn text_to_json(text: &str, ty: &Type) -> Value {
    match *ty {
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => text
            .parse::<i64>()
            .map(|n| json!(n))
            .unwrap_or_else(|_| json!(text)),
        Type::FLOAT4 | Type::FLOAT8 => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| json!(text)),
        Type::BOOL => match text {
            "t" => json!(true),
            "f" => json!(false),
            _ => json!(text),
        },
        Type::JSON | Type::JSONB => serde_json::from_str(text).unwrap_or_else(|_| json!(text)),
        Type::BYTEA => match decode_bytea_hex(text) {
            Some(bytes) => json!(String::from_utf8_lossy(&bytes)),
            None => json!(text),
        },
        Type::TIMESTAMPTZ => chrono::DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
            .map(|t| json!(t.with_timezone(&chrono::Utc).to_rfc3339()))
            .unwrap_or_else(|_| json!(text)),
        _ => json!(text),
    }
}

/// `bytea_output = hex`: `\x` followed by two hex digits per byte
fn decode_bytea_hex(text: &str) -> Option<Vec<u8>> {
    let hex = text.strip_prefix("\\x")?;
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}
