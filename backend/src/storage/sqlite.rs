use crate::models::{
    ColumnDescriptor, ConnectionStatus, DataSource, ProbeResult, VirtualBaseView,
    VirtualBaseViewDefinition, VirtualView, VirtualViewDefinition,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Result as SqliteResult, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// SQLite-backed schema catalog: data sources, their column snapshots and the
/// view definitions built on them.
/// Uses tokio::Mutex for async-friendly locking
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

const DATA_SOURCE_COLUMNS: &str = "id, user_id, source_name, db_type, host, port, database_name, \
     db_username, db_password, description, last_connection_status, last_connection_at, \
     last_error_message, created_at, updated_at";

const SCHEMA_COLUMNS: &str = "s.id, s.data_source_id, s.schema_name, s.table_name, s.column_name, \
     s.column_type, s.is_nullable, s.is_primary_key, s.ordinal_position, s.retrieved_at";

const VIEW_COLUMNS: &str =
    "id, user_id, name, description, definition, created_at, updated_at, last_accessed_at";

const BASE_VIEW_COLUMNS: &str = "id, user_id, name, description, data_source_id, table_name, \
     selected_columns, created_at, updated_at, last_accessed_at";

impl SqliteStorage {
    /// Open (or create) the catalog and apply the schema
    pub async fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        // Handle SQLite URL format (sqlite:./path or sqlite://path)
        let path_str = db_path.as_ref().to_string_lossy();
        let clean_path: &str = if path_str.starts_with("sqlite:") {
            path_str.trim_start_matches("sqlite:").trim_start_matches("//")
        } else {
            path_str.as_ref()
        };

        let conn = Connection::open(clean_path)?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().await;

        conn.execute("PRAGMA foreign_keys = ON", [])?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS data_sources (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                source_name TEXT NOT NULL,
                db_type TEXT NOT NULL,
                host TEXT,
                port INTEGER,
                database_name TEXT,
                db_username TEXT,
                db_password TEXT,
                description TEXT,
                last_connection_status TEXT,
                last_connection_at TEXT,
                last_error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS data_source_schemas (
                id TEXT PRIMARY KEY,
                data_source_id TEXT NOT NULL,
                schema_name TEXT,
                table_name TEXT NOT NULL,
                column_name TEXT NOT NULL,
                column_type TEXT NOT NULL,
                is_nullable INTEGER,
                is_primary_key INTEGER NOT NULL DEFAULT 0,
                ordinal_position INTEGER NOT NULL,
                retrieved_at TEXT NOT NULL,
                FOREIGN KEY (data_source_id) REFERENCES data_sources(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS virtual_views (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                definition TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_accessed_at TEXT,
                UNIQUE(user_id, name)
            );

            CREATE TABLE IF NOT EXISTS virtual_base_views (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                data_source_id TEXT NOT NULL,
                table_name TEXT NOT NULL,
                selected_columns TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_accessed_at TEXT,
                FOREIGN KEY (data_source_id) REFERENCES data_sources(id) ON DELETE CASCADE,
                UNIQUE(user_id, name)
            );

            CREATE INDEX IF NOT EXISTS idx_data_sources_user_created
                ON data_sources(user_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_schemas_source_table
                ON data_source_schemas(data_source_id, table_name, column_name);
            CREATE INDEX IF NOT EXISTS idx_virtual_views_user
                ON virtual_views(user_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_virtual_base_views_user
                ON virtual_base_views(user_id, created_at DESC);
            "#,
        )?;

        Ok(())
    }

    // ---- data sources ----

    /// Persist a data source on its own (failed probes)
    pub async fn insert_data_source(&self, data_source: &DataSource) -> SqliteResult<()> {
        let conn = self.conn.lock().await;
        insert_data_source_row(&conn, data_source)
    }

    /// Persist a data source and its column snapshot in one transaction
    pub async fn insert_data_source_with_columns(
        &self,
        data_source: &DataSource,
        columns: &[ColumnDescriptor],
    ) -> SqliteResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        insert_data_source_row(&tx, data_source)?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO data_source_schemas
                (id, data_source_id, schema_name, table_name, column_name, column_type,
                 is_nullable, is_primary_key, ordinal_position, retrieved_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )?;
            for column in columns {
                stmt.execute(rusqlite::params![
                    column.id,
                    data_source.id,
                    column.schema_name,
                    column.table_name,
                    column.column_name,
                    column.column_type,
                    column.is_nullable,
                    column.is_primary_key,
                    column.ordinal_position,
                    column.retrieved_at.to_rfc3339(),
                ])?;
            }
        }

        // Dropping an uncommitted transaction rolls it back
        tx.commit()
    }

    /// Data sources owned by `user_id`, newest first
    pub async fn list_data_sources(&self, user_id: &str) -> SqliteResult<Vec<DataSource>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM data_sources WHERE user_id = ?1 ORDER BY created_at DESC",
            DATA_SOURCE_COLUMNS
        ))?;

        let data_sources = stmt
            .query_map(rusqlite::params![user_id], data_source_from_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(data_sources)
    }

    /// A data source by id, only when owned by `user_id`
    pub async fn get_data_source(&self, id: &str, user_id: &str) -> SqliteResult<Option<DataSource>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!(
                "SELECT {} FROM data_sources WHERE id = ?1 AND user_id = ?2",
                DATA_SOURCE_COLUMNS
            ),
            rusqlite::params![id, user_id],
            data_source_from_row,
        )
        .optional()
    }

    // ---- column catalog ----

    /// Every column recorded for a data source, in introspection order
    pub async fn list_columns(&self, data_source_id: &str) -> SqliteResult<Vec<ColumnDescriptor>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM data_source_schemas s WHERE s.data_source_id = ?1 \
             ORDER BY s.schema_name, s.table_name, s.ordinal_position",
            SCHEMA_COLUMNS
        ))?;

        let columns = stmt
            .query_map(rusqlite::params![data_source_id], column_from_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(columns)
    }

    /// Number of distinct `column_names` present under (data source, table) for a
    /// data source owned by `user_id`.
    pub async fn count_matching_columns(
        &self,
        user_id: &str,
        data_source_id: &str,
        table_name: &str,
        column_names: &[String],
    ) -> SqliteResult<usize> {
        if column_names.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock().await;
        let sql = format!(
            r#"
            SELECT COUNT(DISTINCT s.column_name)
            FROM data_source_schemas s
            JOIN data_sources d ON s.data_source_id = d.id
            WHERE d.user_id = ? AND s.data_source_id = ? AND s.table_name = ?
              AND s.column_name IN ({})
            "#,
            placeholders(column_names.len())
        );

        let mut params: Vec<&str> = vec![user_id, data_source_id, table_name];
        params.extend(column_names.iter().map(String::as_str));

        let count: i64 = conn.query_row(&sql, rusqlite::params_from_iter(params), |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Whether a column id belongs to a data source owned by `user_id`
    pub async fn column_owned_by(&self, user_id: &str, column_id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*)
            FROM data_source_schemas s
            JOIN data_sources d ON s.data_source_id = d.id
            WHERE s.id = ?1 AND d.user_id = ?2
            "#,
            rusqlite::params![column_id, user_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Columns with the given ids that `user_id` owns. Unknown or foreign ids are
    /// simply absent from the result.
    pub async fn columns_by_ids(
        &self,
        user_id: &str,
        column_ids: &[String],
    ) -> SqliteResult<Vec<ColumnDescriptor>> {
        if column_ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM data_source_schemas s \
             JOIN data_sources d ON s.data_source_id = d.id \
             WHERE d.user_id = ? AND s.id IN ({})",
            SCHEMA_COLUMNS,
            placeholders(column_ids.len())
        ))?;

        let mut params: Vec<&str> = vec![user_id];
        params.extend(column_ids.iter().map(String::as_str));

        let columns = stmt
            .query_map(rusqlite::params_from_iter(params), column_from_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(columns)
    }

    /// Columns of one table selected by name, in introspection order
    pub async fn columns_by_names(
        &self,
        user_id: &str,
        data_source_id: &str,
        table_name: &str,
        column_names: &[String],
    ) -> SqliteResult<Vec<ColumnDescriptor>> {
        if column_names.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM data_source_schemas s \
             JOIN data_sources d ON s.data_source_id = d.id \
             WHERE d.user_id = ? AND s.data_source_id = ? AND s.table_name = ? \
               AND s.column_name IN ({}) \
             ORDER BY s.ordinal_position",
            SCHEMA_COLUMNS,
            placeholders(column_names.len())
        ))?;

        let mut params: Vec<&str> = vec![user_id, data_source_id, table_name];
        params.extend(column_names.iter().map(String::as_str));

        let columns = stmt
            .query_map(rusqlite::params_from_iter(params), column_from_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(columns)
    }

    // ---- virtual views ----

    pub async fn insert_virtual_view(&self, view: &VirtualView) -> SqliteResult<()> {
        let definition = serde_json::to_string(&view.definition)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO virtual_views
            (id, user_id, name, description, definition, created_at, updated_at, last_accessed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            rusqlite::params![
                view.id,
                view.user_id,
                view.name,
                view.description,
                definition,
                view.created_at.to_rfc3339(),
                view.updated_at.to_rfc3339(),
                view.last_accessed_at.map(|d| d.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub async fn list_virtual_views(&self, user_id: &str) -> SqliteResult<Vec<VirtualView>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM virtual_views WHERE user_id = ?1 ORDER BY created_at DESC",
            VIEW_COLUMNS
        ))?;

        let views = stmt
            .query_map(rusqlite::params![user_id], virtual_view_from_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(views)
    }

    pub async fn get_virtual_view(&self, id: &str, user_id: &str) -> SqliteResult<Option<VirtualView>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!(
                "SELECT {} FROM virtual_views WHERE id = ?1 AND user_id = ?2",
                VIEW_COLUMNS
            ),
            rusqlite::params![id, user_id],
            virtual_view_from_row,
        )
        .optional()
    }

    pub async fn touch_virtual_view(&self, id: &str, user_id: &str, at: DateTime<Utc>) -> SqliteResult<bool> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE virtual_views SET last_accessed_at = ?1 WHERE id = ?2 AND user_id = ?3",
            rusqlite::params![at.to_rfc3339(), id, user_id],
        )?;
        Ok(rows > 0)
    }

    // ---- virtual base views ----

    pub async fn insert_virtual_base_view(&self, view: &VirtualBaseView) -> SqliteResult<()> {
        let selected_columns = serde_json::to_string(&view.definition())
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO virtual_base_views
            (id, user_id, name, description, data_source_id, table_name, selected_columns,
             created_at, updated_at, last_accessed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            rusqlite::params![
                view.id,
                view.user_id,
                view.name,
                view.description,
                view.data_source_id,
                view.table_name,
                selected_columns,
                view.created_at.to_rfc3339(),
                view.updated_at.to_rfc3339(),
                view.last_accessed_at.map(|d| d.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub async fn list_virtual_base_views(&self, user_id: &str) -> SqliteResult<Vec<VirtualBaseView>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM virtual_base_views WHERE user_id = ?1 ORDER BY created_at DESC",
            BASE_VIEW_COLUMNS
        ))?;

        let views = stmt
            .query_map(rusqlite::params![user_id], virtual_base_view_from_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(views)
    }

    pub async fn get_virtual_base_view(
        &self,
        id: &str,
        user_id: &str,
    ) -> SqliteResult<Option<VirtualBaseView>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!(
                "SELECT {} FROM virtual_base_views WHERE id = ?1 AND user_id = ?2",
                BASE_VIEW_COLUMNS
            ),
            rusqlite::params![id, user_id],
            virtual_base_view_from_row,
        )
        .optional()
    }

    pub async fn touch_virtual_base_view(&self, id: &str, user_id: &str, at: DateTime<Utc>) -> SqliteResult<bool> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE virtual_base_views SET last_accessed_at = ?1 WHERE id = ?2 AND user_id = ?3",
            rusqlite::params![at.to_rfc3339(), id, user_id],
        )?;
        Ok(rows > 0)
    }
}

/// True when `e` is a UNIQUE constraint violation
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.code == ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        }
        _ => false,
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn insert_data_source_row(conn: &Connection, ds: &DataSource) -> SqliteResult<()> {
    let probe = ds.last_probe.as_ref();
    conn.execute(
        &format!(
            "INSERT INTO data_sources ({}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            DATA_SOURCE_COLUMNS
        ),
        rusqlite::params![
            ds.id,
            ds.user_id,
            ds.source_name,
            ds.db_type,
            ds.host,
            ds.port,
            ds.database_name,
            ds.db_username,
            ds.password,
            ds.description,
            probe.map(|p| p.status.as_str()),
            probe.map(|p| p.checked_at.to_rfc3339()),
            probe.and_then(|p| p.error.clone()),
            ds.created_at.to_rfc3339(),
            ds.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn parse_timestamp(idx: usize, value: &str) -> SqliteResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn timestamp_at(row: &Row, idx: usize) -> SqliteResult<DateTime<Utc>> {
    parse_timestamp(idx, &row.get::<_, String>(idx)?)
}

fn optional_timestamp_at(row: &Row, idx: usize) -> SqliteResult<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| parse_timestamp(idx, &s))
        .transpose()
}

fn json_at<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> SqliteResult<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn data_source_from_row(row: &Row) -> SqliteResult<DataSource> {
    let status = row
        .get::<_, Option<String>>(10)?
        .and_then(|s| ConnectionStatus::parse(&s));
    let checked_at = optional_timestamp_at(row, 11)?;
    let last_probe = match (status, checked_at) {
        (Some(status), Some(checked_at)) => Some(ProbeResult {
            status,
            checked_at,
            error: row.get(12)?,
        }),
        _ => None,
    };

    Ok(DataSource {
        id: row.get(0)?,
        user_id: row.get(1)?,
        source_name: row.get(2)?,
        db_type: row.get(3)?,
        host: row.get(4)?,
        port: row.get(5)?,
        database_name: row.get(6)?,
        db_username: row.get(7)?,
        password: row.get(8)?,
        description: row.get(9)?,
        created_at: timestamp_at(row, 13)?,
        updated_at: timestamp_at(row, 14)?,
        last_probe,
    })
}

fn column_from_row(row: &Row) -> SqliteResult<ColumnDescriptor> {
    Ok(ColumnDescriptor {
        id: row.get(0)?,
        data_source_id: row.get(1)?,
        schema_name: row.get(2)?,
        table_name: row.get(3)?,
        column_name: row.get(4)?,
        column_type: row.get(5)?,
        is_nullable: row.get(6)?,
        is_primary_key: row.get(7)?,
        ordinal_position: row.get(8)?,
        retrieved_at: timestamp_at(row, 9)?,
    })
}

fn virtual_view_from_row(row: &Row) -> SqliteResult<VirtualView> {
    let definition: VirtualViewDefinition = json_at(row, 4)?;
    Ok(VirtualView {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        definition,
        created_at: timestamp_at(row, 5)?,
        updated_at: timestamp_at(row, 6)?,
        last_accessed_at: optional_timestamp_at(row, 7)?,
    })
}

fn virtual_base_view_from_row(row: &Row) -> SqliteResult<VirtualBaseView> {
    let definition: VirtualBaseViewDefinition = json_at(row, 6)?;
    Ok(VirtualBaseView {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        data_source_id: row.get(4)?,
        table_name: row.get(5)?,
        selected_columns: definition.column_names,
        created_at: timestamp_at(row, 7)?,
        updated_at: timestamp_at(row, 8)?,
        last_accessed_at: optional_timestamp_at(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ConnectionParams, CreateVirtualBaseViewRequest, SelectedColumn,
    };
    use tempfile::tempdir;

    fn params(source_name: &str) -> ConnectionParams {
        ConnectionParams {
            source_name: source_name.to_string(),
            db_type: "postgresql".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            user: "reporter".to_string(),
            password: "s3cret".to_string(),
            db_name: "sales".to_string(),
            description: Some("primary sales db".to_string()),
        }
    }

    fn column(table: &str, name: &str, ordinal: i64) -> ColumnDescriptor {
        ColumnDescriptor {
            id: uuid::Uuid::new_v4().to_string(),
            data_source_id: None,
            schema_name: Some("public".to_string()),
            table_name: table.to_string(),
            column_name: name.to_string(),
            column_type: "integer".to_string(),
            is_nullable: Some(false),
            is_primary_key: ordinal == 1,
            ordinal_position: ordinal,
            retrieved_at: Utc::now(),
        }
    }

    async fn storage_in(dir: &tempfile::TempDir) -> SqliteStorage {
        SqliteStorage::new(dir.path().join("catalog.db")).await.unwrap()
    }

    async fn seeded(storage: &SqliteStorage, user_id: &str) -> (DataSource, Vec<ColumnDescriptor>) {
        let ds = DataSource::new(user_id, &params("sales"), ProbeResult::connected());
        let columns: Vec<ColumnDescriptor> = vec![
            column("orders", "order_id", 1),
            column("orders", "total", 2),
            column("users", "id", 1),
            column("users", "email", 2),
        ]
        .iter()
        .map(|c| c.rematerialize(&ds.id))
        .collect();
        storage
            .insert_data_source_with_columns(&ds, &columns)
            .await
            .unwrap();
        (ds, columns)
    }

    #[test]
    fn test_sqlite_storage_creation() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = tokio_test::block_on(SqliteStorage::new(&db_path));
        assert!(storage.is_ok());
    }

    #[test]
    fn test_schema_initialization() {
        let dir = tempdir().unwrap();
        let db_path = format!("sqlite:{}", dir.path().join("test.db").display());
        let rt = tokio::runtime::Runtime::new().unwrap();
        let storage = rt.block_on(async { SqliteStorage::new(&db_path).await.unwrap() });

        let conn = rt.block_on(async { storage.conn.lock().await });
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type='table' AND name IN \
                 ('data_sources', 'data_source_schemas', 'virtual_views', 'virtual_base_views')",
            )
            .unwrap();

        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(tables.len(), 4);
    }

    #[tokio::test]
    async fn test_data_source_round_trip_scoped_by_user() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir).await;
        let (ds, _) = seeded(&storage, "u1").await;

        let loaded = storage.get_data_source(&ds.id, "u1").await.unwrap().unwrap();
        assert_eq!(loaded.source_name, "sales");
        assert_eq!(loaded.port, Some(5432));
        assert_eq!(loaded.password.as_deref(), Some("s3cret"));
        assert_eq!(loaded.description.as_deref(), Some("primary sales db"));
        assert_eq!(
            loaded.last_probe.map(|p| p.status),
            Some(ConnectionStatus::Connected)
        );

        assert!(storage.get_data_source(&ds.id, "u2").await.unwrap().is_none());
        assert_eq!(storage.list_data_sources("u1").await.unwrap().len(), 1);
        assert!(storage.list_data_sources("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_probe_recorded() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir).await;
        let ds = DataSource::new("u1", &params("broken"), ProbeResult::failed("connection refused"));
        storage.insert_data_source(&ds).await.unwrap();

        let loaded = storage.get_data_source(&ds.id, "u1").await.unwrap().unwrap();
        let probe = loaded.last_probe.unwrap();
        assert_eq!(probe.status, ConnectionStatus::Failed);
        assert_eq!(probe.error.as_deref(), Some("connection refused"));
        assert!(storage.list_columns(&ds.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_failure() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir).await;
        let ds = DataSource::new("u1", &params("sales"), ProbeResult::connected());
        let dup = column("orders", "order_id", 1).rematerialize(&ds.id);

        // Duplicate primary key on the second column row
        let result = storage
            .insert_data_source_with_columns(&ds, &[dup.clone(), dup])
            .await;
        assert!(result.is_err());
        assert!(storage.list_data_sources("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_columns_in_introspection_order() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir).await;
        let (ds, _) = seeded(&storage, "u1").await;

        let columns = storage.list_columns(&ds.id).await.unwrap();
        let names: Vec<(String, String)> = columns
            .iter()
            .map(|c| (c.table_name.clone(), c.column_name.clone()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("orders".to_string(), "order_id".to_string()),
                ("orders".to_string(), "total".to_string()),
                ("users".to_string(), "id".to_string()),
                ("users".to_string(), "email".to_string()),
            ]
        );
        assert!(columns[0].is_primary_key);
        assert_eq!(columns[0].data_source_id.as_deref(), Some(ds.id.as_str()));
    }

    #[tokio::test]
    async fn test_count_matching_columns() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir).await;
        let (ds, _) = seeded(&storage, "u1").await;
        let names = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let count = storage
            .count_matching_columns("u1", &ds.id, "users", &names(&["id", "email"]))
            .await
            .unwrap();
        assert_eq!(count, 2);

        // Column from another table
        let count = storage
            .count_matching_columns("u1", &ds.id, "users", &names(&["id", "total"]))
            .await
            .unwrap();
        assert_eq!(count, 1);

        // Another user's data source
        let count = storage
            .count_matching_columns("u2", &ds.id, "users", &names(&["id"]))
            .await
            .unwrap();
        assert_eq!(count, 0);

        // Duplicates collapse
        let count = storage
            .count_matching_columns("u1", &ds.id, "users", &names(&["id", "id"]))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_column_ownership() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir).await;
        let (_, columns) = seeded(&storage, "u1").await;

        assert!(storage.column_owned_by("u1", &columns[0].id).await.unwrap());
        assert!(!storage.column_owned_by("u2", &columns[0].id).await.unwrap());
        assert!(!storage.column_owned_by("u1", "missing").await.unwrap());

        let ids = vec![columns[3].id.clone(), "missing".to_string()];
        let resolved = storage.columns_by_ids("u1", &ids).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].column_name, "email");
    }

    #[tokio::test]
    async fn test_virtual_view_persistence_and_uniqueness() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir).await;
        let (_, columns) = seeded(&storage, "u1").await;

        let definition = VirtualViewDefinition {
            selected_columns: vec![SelectedColumn {
                data_source_schema_id: columns[0].id.clone(),
                alias: Some("order".to_string()),
            }],
        };
        let view = VirtualView::new("u1", "orders".to_string(), None, definition.clone());
        storage.insert_virtual_view(&view).await.unwrap();

        let loaded = storage.get_virtual_view(&view.id, "u1").await.unwrap().unwrap();
        assert_eq!(loaded.definition, definition);
        assert!(storage.get_virtual_view(&view.id, "u2").await.unwrap().is_none());

        let again = VirtualView::new("u1", "orders".to_string(), None, definition);
        let err = storage.insert_virtual_view(&again).await.unwrap_err();
        assert!(is_unique_violation(&err));

        assert!(!storage.touch_virtual_view(&view.id, "u2", Utc::now()).await.unwrap());
        let untouched = storage.get_virtual_view(&view.id, "u1").await.unwrap().unwrap();
        assert!(untouched.last_accessed_at.is_none());

        assert!(storage.touch_virtual_view(&view.id, "u1", Utc::now()).await.unwrap());
        let touched = storage.get_virtual_view(&view.id, "u1").await.unwrap().unwrap();
        assert!(touched.last_accessed_at.is_some());
    }

    #[tokio::test]
    async fn test_virtual_base_view_persistence() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir).await;
        let (ds, _) = seeded(&storage, "u1").await;

        let view = VirtualBaseView::new(
            "u1",
            CreateVirtualBaseViewRequest {
                name: "users_view".to_string(),
                description: Some("contact columns".to_string()),
                data_source_id: ds.id.clone(),
                table_name: "users".to_string(),
                selected_columns: vec!["email".to_string(), "id".to_string()],
            },
        );
        storage.insert_virtual_base_view(&view).await.unwrap();

        let listed = storage.list_virtual_base_views("u1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].selected_columns, vec!["email", "id"]);

        let schema = storage
            .columns_by_names("u1", &ds.id, "users", &listed[0].selected_columns)
            .await
            .unwrap();
        let names: Vec<&str> = schema.iter().map(|c| c.column_name.as_str()).collect();
        assert_eq!(names, vec!["id", "email"]);
    }
}
