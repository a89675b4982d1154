// In-memory stand-in for external databases used by service tests
use crate::error::AppError;
use crate::models::ConnectionParams;
use crate::services::database::{DatabaseAdapter, DatabaseConnector, Dialect, QueryResult};
use crate::storage::SqliteStorage;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct FakeLog {
    pub opened: usize,
    pub closed: usize,
    pub statements: Vec<String>,
}

/// Scripted external database, shared by every connection it hands out
#[derive(Clone, Default)]
pub struct FakeDatabase {
    pub fail_connect: Option<String>,
    pub fail_ping: Option<String>,
    pub fail_query: Option<String>,
    /// `(schema, table, column, type, nullable, primary_key)` rows
    pub catalog: Vec<Vec<Value>>,
    /// table -> (columns, rows)
    pub tables: HashMap<String, (Vec<String>, Vec<Vec<Value>>)>,
    pub log: Arc<Mutex<FakeLog>>,
}

impl FakeDatabase {
    /// `orders(order_id, total)` and `users(id, email)` with seven users
    pub fn sales() -> Self {
        let catalog = vec![
            catalog_row("orders", "order_id", "integer", "NO", "YES"),
            catalog_row("orders", "total", "numeric", "YES", "NO"),
            catalog_row("users", "id", "integer", "NO", "YES"),
            catalog_row("users", "email", "character varying", "YES", "NO"),
        ];

        let mut tables = HashMap::new();
        tables.insert(
            "orders".to_string(),
            (
                vec!["order_id".to_string(), "total".to_string()],
                vec![vec![json!(1), json!("19.99")], vec![json!(2), Value::Null]],
            ),
        );
        tables.insert(
            "users".to_string(),
            (
                vec!["id".to_string(), "email".to_string()],
                (1..=7)
                    .map(|i| vec![json!(i), json!(format!("user{}@example.com", i))])
                    .collect(),
            ),
        );

        Self {
            catalog,
            tables,
            ..Default::default()
        }
    }

    pub fn unreachable(message: &str) -> Self {
        Self {
            fail_connect: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, FakeLog> {
        self.log.lock().unwrap()
    }
}

fn catalog_row(table: &str, column: &str, ty: &str, nullable: &str, pk: &str) -> Vec<Value> {
    vec![
        json!("public"),
        json!(table),
        json!(column),
        json!(ty),
        json!(nullable),
        json!(pk),
    ]
}

pub struct FakeConnector {
    pub database: FakeDatabase,
}

impl FakeConnector {
    pub fn new(database: FakeDatabase) -> Arc<Self> {
        Arc::new(Self { database })
    }
}

#[async_trait::async_trait]
impl DatabaseConnector for FakeConnector {
    async fn connect(
        &self,
        params: &ConnectionParams,
    ) -> Result<Box<dyn DatabaseAdapter>, AppError> {
        let dialect = Dialect::from_str(&params.db_type)?;
        if let Some(message) = &self.database.fail_connect {
            return Err(AppError::Connection(message.clone()));
        }
        self.database.log().opened += 1;
        Ok(Box::new(FakeAdapter {
            dialect,
            database: self.database.clone(),
        }))
    }
}

struct FakeAdapter {
    dialect: Dialect,
    database: FakeDatabase,
}

#[async_trait::async_trait]
impl DatabaseAdapter for FakeAdapter {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn ping(&mut self) -> Result<(), AppError> {
        match &self.database.fail_ping {
            Some(message) => Err(AppError::Connection(message.clone())),
            None => Ok(()),
        }
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult, AppError> {
        self.database.log().statements.push(sql.to_string());
        if let Some(message) = &self.database.fail_query {
            return Err(AppError::Connection(message.clone()));
        }

        if sql.to_lowercase().contains("information_schema") {
            return Ok(QueryResult {
                columns: ["table_schema", "table_name", "column_name", "data_type", "is_nullable", "is_primary_key"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                rows: self.database.catalog.clone(),
                execution_time_ms: 0,
            });
        }

        select(&self.database, sql)
    }

    async fn close(self: Box<Self>) -> Result<(), AppError> {
        self.database.log().closed += 1;
        Ok(())
    }
}

/// Evaluate `SELECT a, t.b FROM t LIMIT n` against the scripted tables
fn select(database: &FakeDatabase, sql: &str) -> Result<QueryResult, AppError> {
    let unsupported = || AppError::Connection(format!("fake cannot run: {}", sql));

    let rest = sql.strip_prefix("SELECT ").ok_or_else(unsupported)?;
    let (projection, rest) = rest.split_once(" FROM ").ok_or_else(unsupported)?;
    let (table, limit) = rest.split_once(" LIMIT ").ok_or_else(unsupported)?;
    let limit: usize = limit.trim().parse().map_err(|_| unsupported())?;

    let (columns, rows) = database
        .tables
        .get(table.trim())
        .ok_or_else(|| AppError::Connection(format!("relation \"{}\" does not exist", table)))?;

    let mut indexes = Vec::new();
    let mut names = Vec::new();
    for requested in projection.split(", ") {
        let name = requested.rsplit('.').next().unwrap_or(requested);
        let idx = columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| AppError::Connection(format!("column \"{}\" does not exist", name)))?;
        indexes.push(idx);
        names.push(name.to_string());
    }

    Ok(QueryResult {
        columns: names,
        rows: rows
            .iter()
            .take(limit)
            .map(|row| indexes.iter().map(|&i| row[i].clone()).collect())
            .collect(),
        execution_time_ms: 0,
    })
}

pub fn params(db_type: &str) -> ConnectionParams {
    ConnectionParams {
        source_name: "sales".to_string(),
        db_type: db_type.to_string(),
        host: "localhost".to_string(),
        port: 5432,
        user: "reporter".to_string(),
        password: "s3cret".to_string(),
        db_name: "sales".to_string(),
        description: None,
    }
}

pub async fn storage(dir: &tempfile::TempDir) -> Arc<SqliteStorage> {
    Arc::new(
        SqliteStorage::new(dir.path().join("catalog.db"))
            .await
            .unwrap(),
    )
}
