use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Max description length accepted for view definitions
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// Validate a definition name: non-empty after trimming
pub fn validate_name(name: &str, what: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err(format!("{} name cannot be empty", what));
    }
    Ok(())
}

/// Validate description: optional, max 500 characters
pub fn validate_description(description: &Option<String>) -> Result<(), String> {
    if let Some(desc) = description {
        if desc.len() > MAX_DESCRIPTION_LEN {
            return Err(format!(
                "Description cannot exceed {} characters (got {})",
                MAX_DESCRIPTION_LEN,
                desc.len()
            ));
        }
    }
    Ok(())
}

/// A named projection over catalog columns, referenced by ColumnDescriptor id.
///
/// The referenced columns may span tables or even data sources; only the
/// single-source, single-table case can be sampled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualView {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub definition: VirtualViewDefinition,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

/// Persisted as JSON in `virtual_views.definition`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VirtualViewDefinition {
    pub selected_columns: Vec<SelectedColumn>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectedColumn {
    pub data_source_schema_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl VirtualView {
    pub fn new(
        user_id: &str,
        name: String,
        description: Option<String>,
        definition: VirtualViewDefinition,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name,
            description,
            definition,
            created_at: now,
            updated_at: now,
            last_accessed_at: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateVirtualViewRequest {
    pub name: String,
    pub description: Option<String>,
    pub selected_schema_ids: Vec<String>,
    /// Optional display alias per selected schema id
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

impl CreateVirtualViewRequest {
    /// Build the persisted definition, keeping the caller's column order.
    pub fn to_definition(&self) -> VirtualViewDefinition {
        VirtualViewDefinition {
            selected_columns: self
                .selected_schema_ids
                .iter()
                .map(|id| SelectedColumn {
                    data_source_schema_id: id.clone(),
                    alias: self.aliases.get(id).cloned(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("", "Virtual view").is_err());
        assert!(validate_name("   ", "Virtual view").is_err());
        assert!(validate_name("orders_view", "Virtual view").is_ok());
    }

    #[test]
    fn test_validate_description() {
        assert!(validate_description(&None).is_ok());
        assert!(validate_description(&Some("short".to_string())).is_ok());
        assert!(validate_description(&Some("a".repeat(501))).is_err());
    }

    #[test]
    fn test_definition_keeps_order_and_aliases() {
        let mut aliases = HashMap::new();
        aliases.insert("b".to_string(), "Email".to_string());
        let request = CreateVirtualViewRequest {
            name: "v".to_string(),
            description: None,
            selected_schema_ids: vec!["b".to_string(), "a".to_string()],
            aliases,
        };
        let def = request.to_definition();
        assert_eq!(def.selected_columns[0].data_source_schema_id, "b");
        assert_eq!(def.selected_columns[0].alias.as_deref(), Some("Email"));
        assert!(def.selected_columns[1].alias.is_none());
    }

    #[test]
    fn test_definition_json_shape() {
        let def = VirtualViewDefinition {
            selected_columns: vec![SelectedColumn {
                data_source_schema_id: "col-1".to_string(),
                alias: None,
            }],
        };
        let json = serde_json::to_string(&def).unwrap();
        assert_eq!(json, r#"{"selected_columns":[{"data_source_schema_id":"col-1"}]}"#);
    }
}
