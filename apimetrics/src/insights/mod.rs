//! Natural-language commentary on one API's metrics.
//!
//! The metrics engine never depends on this module. A missing or failing generator only affects
//! the insight endpoint and command; metrics are served either way.

use std::sync::Arc;

use async_trait::async_trait;
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use thiserror::Error;

use crate::config::InsightsConfig;
use crate::engine::ApiMetrics;

pub mod openai;

pub use openai::OpenAiInsights;

/// Product-analyst prompt used when no template is configured.
pub const DEFAULT_TEMPLATE: &str = "\
You are a Product Analyst at a fintech company.

Given the following API performance metrics:

API Name: {{ api_name }}
Total Requests: {{ total_requests }}
Success Rate: {{ success_rate }}%
Average Latency: {{ avg_latency_ms }} ms
P95 Latency: {{ p95_latency_ms }} ms
Top Failure Reason: {{ top_error_reason }}

Answer in bullet points:
1. Likely root cause of performance or conversion issues
2. Impact on user experience or conversion
3. 2-3 concrete technical or product improvements
Keep it concise and actionable.
";

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("Failed to render insight prompt: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Insight request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Insight endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Insight endpoint returned no content")]
    EmptyResponse,
}

/// Turns one row of API metrics into commentary.
#[async_trait]
pub trait InsightGenerator: Send + Sync {
    async fn generate(&self, row: &ApiMetrics) -> Result<String, InsightError>;
}

/// Values exposed to the prompt template. Absent statistics render as `n/a`.
#[derive(Debug, Serialize)]
struct PromptContext<'a> {
    api_name: &'a str,
    total_requests: u64,
    success_rate: f64,
    avg_latency_ms: String,
    p95_latency_ms: String,
    top_error_reason: &'a str,
}

impl<'a> From<&'a ApiMetrics> for PromptContext<'a> {
    fn from(row: &'a ApiMetrics) -> Self {
        let or_na = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_else(|| "n/a".to_string());
        Self {
            api_name: &row.api_name,
            total_requests: row.total_requests,
            success_rate: row.success_rate,
            avg_latency_ms: or_na(row.avg_latency_ms),
            p95_latency_ms: or_na(row.p95_latency_ms),
            top_error_reason: row.top_error_reason.as_deref().unwrap_or("n/a"),
        }
    }
}

/// Render `template` for `row`. Variables the template uses but the context lacks are errors.
pub fn render_prompt(template: &str, row: &ApiMetrics) -> Result<String, InsightError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    Ok(env.render_str(template, PromptContext::from(row))?)
}

/// Build the configured generator, or `None` when insights are disabled.
pub fn create_generator(config: &InsightsConfig) -> crate::errors::Result<Option<Arc<dyn InsightGenerator>>> {
    if !config.enabled {
        return Ok(None);
    }
    Ok(Some(Arc::new(OpenAiInsights::new(config)?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> ApiMetrics {
        ApiMetrics {
            api_name: "OCR_PAN".to_string(),
            total_requests: 18750,
            success_rate: 81.96,
            avg_latency_ms: Some(1290.42),
            p95_latency_ms: Some(1911.0),
            top_error_reason: Some("TIMEOUT".to_string()),
        }
    }

    #[test]
    fn test_default_template_renders_all_metrics() {
        let prompt = render_prompt(DEFAULT_TEMPLATE, &row()).unwrap();

        assert!(prompt.contains("API Name: OCR_PAN"));
        assert!(prompt.contains("Total Requests: 18750"));
        assert!(prompt.contains("Success Rate: 81.96%"));
        assert!(prompt.contains("Average Latency: 1290.42 ms"));
        assert!(prompt.contains("P95 Latency: 1911 ms") || prompt.contains("P95 Latency: 1911.0 ms"));
        assert!(prompt.contains("Top Failure Reason: TIMEOUT"));
    }

    #[test]
    fn test_absent_values_render_as_na() {
        let mut row = row();
        row.p95_latency_ms = None;
        row.top_error_reason = None;

        let prompt = render_prompt("{{ p95_latency_ms }}/{{ top_error_reason }}", &row).unwrap();

        assert_eq!(prompt, "n/a/n/a");
    }

    #[test]
    fn test_unknown_variable_is_an_error() {
        let err = render_prompt("Region: {{ region }}", &row()).unwrap_err();
        assert!(matches!(err, InsightError::Template(_)));
    }

    #[test]
    fn test_disabled_generator_is_none() {
        let config = InsightsConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(create_generator(&config).unwrap().is_none());
    }
}
