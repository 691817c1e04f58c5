//! HTTP handler for insight generation.

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::{info, instrument};

use crate::{
    AppState,
    api::models::InsightResponse,
    errors::{Error, Result},
};

/// Generate commentary for one API from its current metrics row.
///
/// Returns 503 when no generator is configured, 404 for an API with no requests and 502 when the
/// upstream model call fails.
#[instrument(skip(state), err)]
pub async fn generate_insight(State(state): State<AppState>, Path(api_name): Path<String>) -> Result<Json<InsightResponse>> {
    let generator = state.insights.clone().ok_or(Error::InsightsDisabled)?;

    let row = state
        .source
        .api_metrics()
        .await?
        .into_iter()
        .find(|row| row.api_name == api_name)
        .ok_or_else(|| Error::NotFound {
            resource: "API".to_string(),
            id: api_name.clone(),
        })?;

    let insight = generator.generate(&row).await?;
    info!(api_name = %row.api_name, chars = insight.len(), "Generated insight");

    Ok(Json(InsightResponse {
        api_name: row.api_name,
        insight,
    }))
}
