use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::ColumnDescriptor;

/// Parameters for reaching an external database, as supplied by the caller.
///
/// Field names on the wire follow the connection form (`dbHost`, `dbPort`, ...).
#[derive(Clone, Deserialize)]
pub struct ConnectionParams {
    #[serde(rename = "sourceName")]
    pub source_name: String,
    #[serde(rename = "dbType")]
    pub db_type: String,
    #[serde(rename = "dbHost")]
    pub host: String,
    #[serde(rename = "dbPort")]
    pub port: u16,
    #[serde(rename = "dbUser")]
    pub user: String,
    #[serde(rename = "dbPassword")]
    pub password: String,
    #[serde(rename = "dbName")]
    pub db_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("source_name", &self.source_name)
            .field("db_type", &self.db_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("db_name", &self.db_name)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Failed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "connected" => Some(ConnectionStatus::Connected),
            "failed" => Some(ConnectionStatus::Failed),
            _ => None,
        }
    }
}

/// Outcome of a reachability check against an external database
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeResult {
    pub status: ConnectionStatus,
    pub checked_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn connected() -> Self {
        Self {
            status: ConnectionStatus::Connected,
            checked_at: Utc::now(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ConnectionStatus::Failed,
            checked_at: Utc::now(),
            error: Some(error.into()),
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// A registered external database owned by exactly one user.
///
/// The password is stored as supplied; it is never serialized back out.
#[derive(Debug, Clone, Serialize)]
pub struct DataSource {
    pub id: String,
    pub user_id: String,
    pub source_name: String,
    pub db_type: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database_name: Option<String>,
    pub db_username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_probe: Option<ProbeResult>,
}

impl DataSource {
    pub fn new(user_id: &str, params: &ConnectionParams, probe: ProbeResult) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            source_name: params.source_name.clone(),
            db_type: params.db_type.clone(),
            host: Some(params.host.clone()),
            port: Some(params.port),
            database_name: Some(params.db_name.clone()),
            db_username: Some(params.user.clone()),
            password: (!params.password.is_empty()).then(|| params.password.clone()),
            description: params.description.clone(),
            created_at: now,
            updated_at: now,
            last_probe: Some(probe),
        }
    }

    /// Rebuild the parameters needed to reopen a connection, as stored.
    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            source_name: self.source_name.clone(),
            db_type: self.db_type.clone(),
            host: self.host.clone().unwrap_or_default(),
            port: self.port.unwrap_or_default(),
            user: self.db_username.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
            db_name: self.database_name.clone().unwrap_or_default(),
            description: self.description.clone(),
        }
    }
}

/// A persisted data source together with the column snapshot stored for it
#[derive(Debug, Clone, Serialize)]
pub struct DataSourceWithSchema {
    pub data_source: DataSource,
    pub columns: Vec<ColumnDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> ConnectionParams {
        ConnectionParams {
            source_name: "sales".to_string(),
            db_type: "postgresql".to_string(),
            host: "db.internal".to_string(),
            port: 5432,
            user: "reporter".to_string(),
            password: "s3cret".to_string(),
            db_name: "sales".to_string(),
            description: None,
        }
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", sample_params());
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_deserialize_connection_form() {
        let json = r#"{
            "sourceName": "sales", "dbType": "mysql", "dbHost": "localhost",
            "dbPort": 3306, "dbUser": "root", "dbPassword": "pw", "dbName": "shop"
        }"#;
        let params: ConnectionParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.db_type, "mysql");
        assert_eq!(params.port, 3306);
        assert!(params.description.is_none());
    }

    #[test]
    fn test_password_never_serialized() {
        let ds = DataSource::new("u1", &sample_params(), ProbeResult::connected());
        let json = serde_json::to_string(&ds).unwrap();
        assert!(!json.contains("s3cret"));
        assert_eq!(ds.connection_params().password, "s3cret");
    }

    #[test]
    fn test_empty_password_stored_as_none() {
        let mut params = sample_params();
        params.password.clear();
        let ds = DataSource::new("u1", &params, ProbeResult::connected());
        assert!(ds.password.is_none());
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!(ConnectionStatus::parse("failed"), Some(ConnectionStatus::Failed));
        assert_eq!(ConnectionStatus::Connected.as_str(), "connected");
        assert_eq!(ConnectionStatus::parse("error"), None);
    }
}
