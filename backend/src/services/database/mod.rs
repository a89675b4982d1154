// Dialect adapter: connection strings and introspection queries per database type
pub mod adapter;
pub mod mysql;
pub mod postgresql;

pub use adapter::{release, DatabaseAdapter, DatabaseConnector, QueryResult};
pub use mysql::MySQLAdapter;
pub use postgresql::PostgreSQLAdapter;

use crate::error::AppError;
use crate::models::ConnectionParams;
use crate::validation::IdentifierValidator;
use std::str::FromStr;
use std::time::Duration;

/// Supported database dialects.
///
/// Adding a dialect means adding a variant here and an adapter module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    PostgreSQL,
    MySQL,
}

impl FromStr for Dialect {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(Dialect::PostgreSQL),
            "mysql" => Ok(Dialect::MySQL),
            _ => Err(AppError::UnsupportedDialect(s.to_string())),
        }
    }
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::PostgreSQL => "postgresql",
            Dialect::MySQL => "mysql",
        }
    }

    /// Driver-specific connection string. Contains the password: never log it.
    pub fn connection_string(&self, params: &ConnectionParams) -> Result<String, AppError> {
        match self {
            Dialect::PostgreSQL => Ok(format!(
                "host={} port={} user={} password={} dbname={} sslmode=disable",
                quote_pg_value(&params.host),
                params.port,
                quote_pg_value(&params.user),
                quote_pg_value(&params.password),
                quote_pg_value(&params.db_name),
            )),
            Dialect::MySQL => {
                let mut url = url::Url::parse("mysql://localhost")
                    .map_err(|e| AppError::Internal(format!("Failed to build MySQL URL: {}", e)))?;
                url.set_host(Some(&params.host))
                    .map_err(|_| AppError::Validation("Invalid MySQL host".to_string()))?;
                url.set_port(Some(params.port))
                    .map_err(|_| AppError::Validation("Invalid MySQL port".to_string()))?;
                url.set_username(&params.user)
                    .map_err(|_| AppError::Validation("Invalid MySQL user".to_string()))?;
                if !params.password.is_empty() {
                    url.set_password(Some(&params.password))
                        .map_err(|_| AppError::Validation("Invalid MySQL password".to_string()))?;
                }
                url.set_path(&params.db_name);
                Ok(url.to_string())
            }
        }
    }

    /// Connection string with the password masked, safe for logs
    pub fn redacted_connection_string(&self, params: &ConnectionParams) -> String {
        let masked = ConnectionParams {
            password: "***".to_string(),
            ..params.clone()
        };
        self.connection_string(&masked)
            .unwrap_or_else(|_| "[invalid-connection-parameters]".to_string())
    }

    /// Query returning `(schema, table, column, data_type, is_nullable, is_primary_key)`
    /// for every column, ordered by schema, table and ordinal position.
    pub fn introspection_query(&self, params: &ConnectionParams) -> Result<String, AppError> {
        match self {
            Dialect::PostgreSQL => Ok(POSTGRES_INTROSPECTION_QUERY.to_string()),
            Dialect::MySQL => {
                IdentifierValidator::validate(&params.db_name, "Database name")?;
                Ok(MYSQL_INTROSPECTION_QUERY.replace("{database}", &params.db_name))
            }
        }
    }
}

/// Quote a libpq-style `key=value` value, escaping `\` and `'`.
fn quote_pg_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

const POSTGRES_INTROSPECTION_QUERY: &str = r#"
    SELECT
        c.table_schema::text,
        c.table_name::text,
        c.column_name::text,
        c.data_type::text,
        c.is_nullable::text,
        CASE
            WHEN pk.column_name IS NOT NULL THEN 'YES'
            ELSE 'NO'
        END AS is_primary_key
    FROM information_schema.columns c
    LEFT JOIN (
        SELECT
            kcu.table_schema,
            kcu.table_name,
            kcu.column_name
        FROM information_schema.key_column_usage kcu
        JOIN information_schema.table_constraints tc
          ON kcu.constraint_schema = tc.constraint_schema
         AND kcu.constraint_name = tc.constraint_name
         AND tc.constraint_type = 'PRIMARY KEY'
    ) pk
      ON c.table_schema = pk.table_schema
     AND c.table_name = pk.table_name
     AND c.column_name = pk.column_name
    WHERE c.table_schema = 'public'
    ORDER BY c.table_schema, c.table_name, c.ordinal_position
"#;

const MYSQL_INTROSPECTION_QUERY: &str = r#"
    SELECT
        c.TABLE_SCHEMA,
        c.TABLE_NAME,
        c.COLUMN_NAME,
        c.DATA_TYPE,
        c.IS_NULLABLE,
        CASE
            WHEN k.CONSTRAINT_NAME = 'PRIMARY' THEN 'YES'
            ELSE 'NO'
        END AS is_primary_key
    FROM INFORMATION_SCHEMA.COLUMNS c
    LEFT JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE k
        ON c.TABLE_SCHEMA = k.TABLE_SCHEMA
        AND c.TABLE_NAME = k.TABLE_NAME
        AND c.COLUMN_NAME = k.COLUMN_NAME
        AND k.CONSTRAINT_NAME = 'PRIMARY'
    WHERE c.TABLE_SCHEMA = '{database}'
    ORDER BY c.TABLE_SCHEMA, c.TABLE_NAME, c.ORDINAL_POSITION
"#;

/// Connector that dials real PostgreSQL / MySQL servers
pub struct DriverConnector {
    connect_timeout: Duration,
}

impl DriverConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for DriverConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait::async_trait]
impl DatabaseConnector for DriverConnector {
    async fn connect(
        &self,
        params: &ConnectionParams,
    ) -> Result<Box<dyn DatabaseAdapter>, AppError> {
        let dialect = Dialect::from_str(&params.db_type)?;
        let connection_string = dialect.connection_string(params)?;

        tracing::debug!(
            "Opening {} connection: {}",
            dialect.as_str(),
            dialect.redacted_connection_string(params)
        );

        match dialect {
            Dialect::PostgreSQL => Ok(Box::new(
                PostgreSQLAdapter::connect(&connection_string, self.connect_timeout).await?,
            )),
            Dialect::MySQL => Ok(Box::new(
                MySQLAdapter::connect(&connection_string, self.connect_timeout).await?,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(db_type: &str, db_name: &str) -> ConnectionParams {
        ConnectionParams {
            source_name: "sales".to_string(),
            db_type: db_type.to_string(),
            host: "localhost".to_string(),
            port: 5432,
            user: "reporter".to_string(),
            password: "p@ss word".to_string(),
            db_name: db_name.to_string(),
            description: None,
        }
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!(Dialect::from_str("postgresql").unwrap(), Dialect::PostgreSQL);
        assert_eq!(Dialect::from_str("Postgres").unwrap(), Dialect::PostgreSQL);
        assert_eq!(Dialect::from_str("MySQL").unwrap(), Dialect::MySQL);
        assert!(matches!(
            Dialect::from_str("oracle"),
            Err(AppError::UnsupportedDialect(_))
        ));
    }

    #[test]
    fn test_postgres_connection_string() {
        let s = Dialect::PostgreSQL
            .connection_string(&params("postgresql", "sales"))
            .unwrap();
        assert_eq!(
            s,
            "host='localhost' port=5432 user='reporter' password='p@ss word' dbname='sales' sslmode=disable"
        );
        let parsed: Result<tokio_postgres::Config, _> = s.parse();
        assert!(parsed.is_ok());
    }

    #[test]
    fn test_postgres_quotes_are_escaped() {
        let mut p = params("postgresql", "sales");
        p.password = "it's".to_string();
        let s = Dialect::PostgreSQL.connection_string(&p).unwrap();
        assert!(s.contains(r"password='it\'s'"));
    }

    #[test]
    fn test_mysql_connection_string_encodes_credentials() {
        let mut p = params("mysql", "shop");
        p.port = 3306;
        let s = Dialect::MySQL.connection_string(&p).unwrap();
        assert!(s.starts_with("mysql://reporter:"));
        assert!(s.ends_with("@localhost:3306/shop"));
        assert!(!s.contains("p@ss word"));
    }

    #[test]
    fn test_redacted_connection_string() {
        let p = params("postgresql", "sales");
        let s = Dialect::PostgreSQL.redacted_connection_string(&p);
        assert!(!s.contains("p@ss word"));
        assert!(s.contains("password='***'"));
    }

    #[test]
    fn test_introspection_query_shape() {
        let pg = Dialect::PostgreSQL
            .introspection_query(&params("postgresql", "sales"))
            .unwrap();
        assert!(pg.contains("information_schema.columns"));
        assert!(pg.contains("PRIMARY KEY"));
        assert!(pg.contains("ORDER BY c.table_schema, c.table_name, c.ordinal_position"));

        let my = Dialect::MySQL
            .introspection_query(&params("mysql", "shop"))
            .unwrap();
        assert!(my.contains("WHERE c.TABLE_SCHEMA = 'shop'"));
        assert!(my.contains("ORDER BY c.TABLE_SCHEMA, c.TABLE_NAME, c.ORDINAL_POSITION"));
    }

    #[test]
    fn test_mysql_introspection_rejects_unsafe_database_name() {
        let result = Dialect::MySQL.introspection_query(&params("mysql", "shop' OR '1'='1"));
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_connector_rejects_unknown_dialect_before_dialing() {
        let connector = DriverConnector::default();
        let result = connector.connect(&params("oracle", "sales")).await;
        assert!(matches!(result, Err(AppError::UnsupportedDialect(_))));
    }
}
