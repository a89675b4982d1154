use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AppError;

/// One introspected column, identified by its own id rather than (table, column).
///
/// `data_source_id` is `None` for descriptors that were fetched but not persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDescriptor {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_source_id: Option<String>,
    pub schema_name: Option<String>,
    pub table_name: String,
    pub column_name: String,
    pub column_type: String,
    pub is_nullable: Option<bool>,
    pub is_primary_key: bool,
    pub ordinal_position: i64,
    pub retrieved_at: DateTime<Utc>,
}

impl ColumnDescriptor {
    /// Map one `(schema, table, column, type, nullable, primary_key)` introspection row.
    pub fn from_introspection_row(
        row: &[Value],
        ordinal_position: i64,
        retrieved_at: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        if row.len() != 6 {
            return Err(AppError::Connection(format!(
                "Introspection query returned {} columns, expected 6",
                row.len()
            )));
        }

        let required = |idx: usize, what: &str| {
            text_of(&row[idx]).ok_or_else(|| {
                AppError::Connection(format!("Introspection row is missing {}", what))
            })
        };

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            data_source_id: None,
            schema_name: text_of(&row[0]),
            table_name: required(1, "table name")?,
            column_name: required(2, "column name")?,
            column_type: required(3, "data type")?,
            is_nullable: text_of(&row[4]).as_deref().and_then(parse_yes_no),
            is_primary_key: text_of(&row[5]).as_deref().and_then(parse_yes_no).unwrap_or(false),
            ordinal_position,
            retrieved_at,
        })
    }

    /// Copy this descriptor under a fresh id, attached to `data_source_id`.
    pub fn rematerialize(&self, data_source_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            data_source_id: Some(data_source_id.to_string()),
            ..self.clone()
        }
    }
}

/// Tri-state reading of catalog flags such as `IS_NULLABLE`.
pub fn parse_yes_no(s: &str) -> Option<bool> {
    match s.trim().to_ascii_uppercase().as_str() {
        "YES" | "TRUE" | "1" => Some(true),
        "NO" | "FALSE" | "0" => Some(false),
        _ => None,
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(if *b { "YES" } else { "NO" }.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_yes_no() {
        assert_eq!(parse_yes_no("YES"), Some(true));
        assert_eq!(parse_yes_no("no"), Some(false));
        assert_eq!(parse_yes_no("TRUE"), Some(true));
        assert_eq!(parse_yes_no("maybe"), None);
    }

    #[test]
    fn test_from_introspection_row() {
        let row = vec![
            json!("public"),
            json!("orders"),
            json!("order_id"),
            json!("integer"),
            json!("NO"),
            json!("YES"),
        ];
        let col = ColumnDescriptor::from_introspection_row(&row, 0, Utc::now()).unwrap();
        assert_eq!(col.table_name, "orders");
        assert_eq!(col.column_name, "order_id");
        assert_eq!(col.is_nullable, Some(false));
        assert!(col.is_primary_key);
        assert!(col.data_source_id.is_none());
    }

    #[test]
    fn test_unknown_nullability_and_missing_schema() {
        let row = vec![
            Value::Null,
            json!("t"),
            json!("c"),
            json!("text"),
            Value::Null,
            json!("NO"),
        ];
        let col = ColumnDescriptor::from_introspection_row(&row, 3, Utc::now()).unwrap();
        assert!(col.schema_name.is_none());
        assert!(col.is_nullable.is_none());
        assert!(!col.is_primary_key);
        assert_eq!(col.ordinal_position, 3);
    }

    #[test]
    fn test_wrong_shape_rejected() {
        let row = vec![json!("public"), json!("orders")];
        assert!(ColumnDescriptor::from_introspection_row(&row, 0, Utc::now()).is_err());
    }

    #[test]
    fn test_rematerialize_assigns_new_id() {
        let row = vec![
            json!("shop"),
            json!("users"),
            json!("email"),
            json!("varchar"),
            json!("YES"),
            json!("NO"),
        ];
        let col = ColumnDescriptor::from_introspection_row(&row, 1, Utc::now()).unwrap();
        let saved = col.rematerialize("ds-1");
        assert_ne!(saved.id, col.id);
        assert_eq!(saved.data_source_id.as_deref(), Some("ds-1"));
        assert_eq!(saved.column_name, "email");
        assert_eq!(saved.retrieved_at, col.retrieved_at);
    }
}
