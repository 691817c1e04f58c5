//! HTTP handlers for the metrics tables.

use axum::{Json, extract::State};
use tracing::instrument;

use crate::{
    AppState,
    api::models::ApiList,
    engine::{ApiMetrics, FunnelMetrics, MetricsReport, RegionMetrics},
    errors::Result,
};

/// All three tables plus warnings.
#[instrument(skip_all, fields(source = state.source.name()), err)]
pub async fn get_report(State(state): State<AppState>) -> Result<Json<MetricsReport>> {
    Ok(Json(state.source.report().await?))
}

#[instrument(skip_all, fields(source = state.source.name()), err)]
pub async fn list_api_metrics(State(state): State<AppState>) -> Result<Json<Vec<ApiMetrics>>> {
    Ok(Json(state.source.api_metrics().await?))
}

#[instrument(skip_all, fields(source = state.source.name()), err)]
pub async fn list_funnel_metrics(State(state): State<AppState>) -> Result<Json<Vec<FunnelMetrics>>> {
    Ok(Json(state.source.funnel_metrics().await?))
}

#[instrument(skip_all, fields(source = state.source.name()), err)]
pub async fn list_region_metrics(State(state): State<AppState>) -> Result<Json<Vec<RegionMetrics>>> {
    Ok(Json(state.source.region_metrics().await?))
}

/// Distinct API names, for populating an API selector.
#[instrument(skip_all, fields(source = state.source.name()), err)]
pub async fn list_apis(State(state): State<AppState>) -> Result<Json<ApiList>> {
    let apis = state.source.api_metrics().await?.into_iter().map(|row| row.api_name).collect();
    Ok(Json(ApiList { apis }))
}
