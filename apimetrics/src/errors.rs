use crate::insights::InsightError;
use crate::log_table::MalformedRecordError;
use crate::sources::errors::DataSourceError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Required columns are absent from the source. Lists every missing column.
    #[error("Schema mismatch: missing required columns: {}", missing.join(", "))]
    Schema { missing: Vec<String> },

    /// A field could not be parsed as its expected type (and the policy says abort)
    #[error(transparent)]
    MalformedRecord(#[from] MalformedRecordError),

    /// I/O or connectivity failure in a data source adapter, propagated verbatim
    #[error(transparent)]
    DataSource(#[from] DataSourceError),

    /// Insight generation failed
    #[error(transparent)]
    Insight(#[from] InsightError),

    /// Insight generation was requested but no generator is configured
    #[error("Insight generation is not configured")]
    InsightsDisabled,

    /// Requested resource not found
    #[error("{resource} {id} not found")]
    NotFound { resource: String, id: String },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// JSON body returned for every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl Error {
    /// Stable machine-readable error class. Each class implies a different corrective action.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Schema { .. } => "schema_mismatch",
            Error::MalformedRecord(_) => "malformed_record",
            Error::DataSource(DataSourceError::NotConfigured { .. }) => "data_source_not_configured",
            Error::DataSource(DataSourceError::Query(_)) => "data_source_query_failed",
            Error::DataSource(_) => "data_source_unavailable",
            Error::Insight(_) => "insight_failed",
            Error::InsightsDisabled => "insights_unavailable",
            Error::NotFound { .. } => "not_found",
            Error::Config { .. } => "invalid_config",
            Error::Other(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Schema { .. } | Error::MalformedRecord(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::DataSource(DataSourceError::Query(_)) => StatusCode::BAD_GATEWAY,
            Error::DataSource(_) | Error::InsightsDisabled => StatusCode::SERVICE_UNAVAILABLE,
            Error::Insight(_) => StatusCode::BAD_GATEWAY,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Config { .. } | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-facing message that says what to fix, without leaking internals
    pub fn user_message(&self) -> String {
        match self {
            Error::Schema { missing } => format!(
                "The log data does not match the expected schema. Missing columns: {}",
                missing.join(", ")
            ),
            Error::MalformedRecord(err) => format!(
                "Row {} (request_id {}) has an invalid value for `{}`: {:?}",
                err.row, err.request_id, err.field, err.value
            ),
            Error::DataSource(DataSourceError::NotConfigured { message }) => format!("No data source configured: {message}"),
            Error::DataSource(DataSourceError::Query(_)) => {
                "The data source was reached but rejected the query. Check the configured table and its column types.".to_string()
            }
            Error::DataSource(_) => "The data source is not reachable. Check the data source configuration and that it is online.".to_string(),
            Error::Insight(_) => "Insight generation failed upstream. Metrics are unaffected; try again later.".to_string(),
            Error::InsightsDisabled => "Insight generation is not configured".to_string(),
            Error::NotFound { resource, id } => format!("{resource} {id} not found"),
            Error::Config { .. } | Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::DataSource(_) | Error::Config { .. } | Error::Other(_) => {
                tracing::error!("Service error: {:#}", self);
            }
            Error::Insight(_) => {
                tracing::warn!("Insight generation error: {:#}", self);
            }
            Error::Schema { .. } | Error::MalformedRecord(_) => {
                tracing::warn!("Data error: {}", self);
            }
            Error::InsightsDisabled | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = ErrorBody {
            kind: self.kind().to_string(),
            message: self.user_message(),
        };
        (status, axum::Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_schema_error_lists_all_missing() {
        let err = Error::Schema {
            missing: vec!["error_reason".to_string(), "region".to_string()],
        };
        assert_eq!(err.to_string(), "Schema mismatch: missing required columns: error_reason, region");
        assert!(err.user_message().contains("error_reason, region"));
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_kinds_are_distinct_for_corrective_actions() {
        let unreachable = Error::DataSource(DataSourceError::Io {
            path: PathBuf::from("missing.csv"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        });
        let not_configured = Error::DataSource(DataSourceError::NotConfigured {
            message: "no url".to_string(),
        });
        let schema = Error::Schema { missing: vec!["region".to_string()] };

        assert_eq!(unreachable.kind(), "data_source_unavailable");
        assert_eq!(not_configured.kind(), "data_source_not_configured");
        assert_eq!(schema.kind(), "schema_mismatch");
        assert_eq!(unreachable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        // The path is internal detail and stays out of the user-facing message
        assert!(!unreachable.user_message().contains("missing.csv"));
    }

    #[test]
    fn test_query_failure_is_not_reported_as_unreachable() {
        let query = Error::DataSource(DataSourceError::from(sqlx::Error::ColumnNotFound("region".to_string())));
        let unreachable = Error::DataSource(DataSourceError::from(sqlx::Error::PoolTimedOut));

        assert_eq!(query.kind(), "data_source_query_failed");
        assert_eq!(query.status_code(), StatusCode::BAD_GATEWAY);
        assert!(query.user_message().contains("rejected the query"));
        assert!(!query.user_message().contains("not reachable"));

        assert_eq!(unreachable.kind(), "data_source_unavailable");
        assert_eq!(unreachable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_malformed_record_message_names_row_and_field() {
        let err = Error::from(MalformedRecordError {
            row: 7,
            request_id: "abc".to_string(),
            field: "latency_ms".to_string(),
            value: "n/a".to_string(),
        });
        assert_eq!(err.kind(), "malformed_record");
        let message = err.user_message();
        assert!(message.contains("Row 7"));
        assert!(message.contains("latency_ms"));
    }
}
