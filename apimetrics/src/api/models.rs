use serde::{Deserialize, Serialize};

/// Generated commentary for one API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightResponse {
    pub api_name: String,
    pub insight: String,
}

/// Distinct API names present in the data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiList {
    pub apis: Vec<String>,
}
