use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named projection over a single table, referenced by column name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualBaseView {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub data_source_id: String,
    pub table_name: String,
    pub selected_columns: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

/// Persisted as JSON in `virtual_base_views.selected_columns`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VirtualBaseViewDefinition {
    pub column_names: Vec<String>,
}

impl VirtualBaseView {
    pub fn new(user_id: &str, request: CreateVirtualBaseViewRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: request.name,
            description: request.description,
            data_source_id: request.data_source_id,
            table_name: request.table_name,
            selected_columns: request.selected_columns,
            created_at: now,
            updated_at: now,
            last_accessed_at: None,
        }
    }

    pub fn definition(&self) -> VirtualBaseViewDefinition {
        VirtualBaseViewDefinition {
            column_names: self.selected_columns.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateVirtualBaseViewRequest {
    pub name: String,
    pub description: Option<String>,
    pub data_source_id: String,
    pub table_name: String,
    pub selected_columns: Vec<String>,
}
