use crate::error::AppError;
use crate::models::{
    validate_description, validate_name, ColumnDescriptor, CreateVirtualViewRequest, VirtualView,
};
use crate::storage::{is_unique_violation, SqliteStorage};
use std::collections::HashMap;
use std::sync::Arc;

/// Definitions of projections that reference catalog columns by id
pub struct VirtualViewService {
    storage: Arc<SqliteStorage>,
}

impl VirtualViewService {
    pub fn new(storage: Arc<SqliteStorage>) -> Self {
        Self { storage }
    }

    /// Validate and store a view. Each referenced column id is checked on its own
    /// against data source ownership. Columns may span tables or data sources.
    pub async fn create(
        &self,
        user_id: &str,
        request: CreateVirtualViewRequest,
    ) -> Result<VirtualView, AppError> {
        validate_name(&request.name, "Virtual view").map_err(AppError::Validation)?;
        validate_description(&request.description).map_err(AppError::Validation)?;
        if request.selected_schema_ids.is_empty() {
            return Err(AppError::Validation("At least one column must be selected".to_string()));
        }
        if request.selected_schema_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(AppError::Validation("Selected column ids cannot be empty".to_string()));
        }

        for column_id in &request.selected_schema_ids {
            if !self.storage.column_owned_by(user_id, column_id).await? {
                return Err(AppError::NotFound(format!("Column {}", column_id)));
            }
        }

        let definition = request.to_definition();
        let view = VirtualView::new(user_id, request.name, request.description, definition);
        match self.storage.insert_virtual_view(&view).await {
            Ok(()) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(AppError::Conflict(format!(
                    "A virtual view named '{}' already exists",
                    view.name
                )));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            "Created virtual view {} ({} columns)",
            view.id,
            view.definition.selected_columns.len()
        );
        Ok(view)
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<VirtualView>, AppError> {
        Ok(self.storage.list_virtual_views(user_id).await?)
    }

    pub async fn get(&self, id: &str, user_id: &str) -> Result<VirtualView, AppError> {
        self.storage
            .get_virtual_view(id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Virtual view {}", id)))
    }

    /// Referenced catalog entries in definition order
    pub async fn get_schema(&self, id: &str, user_id: &str) -> Result<Vec<ColumnDescriptor>, AppError> {
        let view = self.get(id, user_id).await?;
        resolve_definition_columns(&self.storage, &view, user_id).await
    }
}

/// Resolve a view's column ids in definition order. Any id the user can no
/// longer see fails the whole resolution.
pub(crate) async fn resolve_definition_columns(
    storage: &SqliteStorage,
    view: &VirtualView,
    user_id: &str,
) -> Result<Vec<ColumnDescriptor>, AppError> {
    let ids: Vec<String> = view
        .definition
        .selected_columns
        .iter()
        .map(|c| c.data_source_schema_id.clone())
        .collect();

    let by_id: HashMap<String, ColumnDescriptor> = storage
        .columns_by_ids(user_id, &ids)
        .await?
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect();

    ids.iter()
        .map(|id| {
            by_id
                .get(id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Column {} of virtual view {}", id, view.id)))
        })
        .collect()
}
