//! HTTP request handlers.
//!
//! - [`metrics`]: the three summary tables and the API name list
//! - [`insights`]: LLM commentary on one API's metrics

pub mod insights;
pub mod metrics;

/// Liveness check
pub async fn healthz() -> &'static str {
    "OK"
}
