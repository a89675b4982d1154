use serde::Serialize;
use serde_json::{Map, Value};

/// Sample rows for a virtual base view, keyed by column name
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BaseViewSample {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

/// Sample rows for a virtual view, positionally aligned with `columns`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ViewSample {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}
