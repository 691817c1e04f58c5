//! Required-column checks for tabular log sources.

use super::RawRecord;
use crate::errors::Error;

/// Columns every log source must provide, in the order they are reported when missing.
pub const REQUIRED_FIELDS: [&str; 6] = ["request_id", "api_name", "latency_ms", "status_code", "error_reason", "region"];

/// Header positions of the known columns in a tabular source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    request_id: usize,
    api_name: usize,
    latency_ms: usize,
    status_code: usize,
    error_reason: usize,
    region: usize,
    timestamp: Option<usize>,
    document_type: Option<usize>,
    device_type: Option<usize>,
}

/// Check that every required column is present and locate the known columns.
///
/// Matching ignores case and surrounding whitespace, so exports with `status_Code` or
/// `TIMESTAMP` headers are accepted. On failure the error lists every missing column, not just
/// the first.
pub fn validate_schema<S: AsRef<str>>(headers: &[S]) -> Result<ColumnMap, Error> {
    let normalized: Vec<String> = headers.iter().map(|h| h.as_ref().trim().to_ascii_lowercase()).collect();
    let find = |name: &str| normalized.iter().position(|h| h == name);

    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|field| find(field).is_none())
        .map(|field| field.to_string())
        .collect();

    match (
        find("request_id"),
        find("api_name"),
        find("latency_ms"),
        find("status_code"),
        find("error_reason"),
        find("region"),
    ) {
        (Some(request_id), Some(api_name), Some(latency_ms), Some(status_code), Some(error_reason), Some(region)) => Ok(ColumnMap {
            request_id,
            api_name,
            latency_ms,
            status_code,
            error_reason,
            region,
            timestamp: find("timestamp"),
            document_type: find("document_type"),
            device_type: find("device_type"),
        }),
        _ => Err(Error::Schema { missing }),
    }
}

impl ColumnMap {
    /// Build a [`RawRecord`] from one row, given a way to fetch a cell by column position.
    ///
    /// Cells beyond the end of a short row read as empty.
    pub fn raw_record<'a, F>(&self, cell: F) -> RawRecord
    where
        F: Fn(usize) -> Option<&'a str>,
    {
        let text = |index: usize| cell(index).unwrap_or_default().to_string();
        let optional = |index: Option<usize>| index.and_then(&cell).map(str::to_string).filter(|value| !value.is_empty());

        RawRecord {
            request_id: text(self.request_id),
            api_name: text(self.api_name),
            timestamp: optional(self.timestamp),
            latency_ms: text(self.latency_ms),
            status_code: text(self.status_code),
            error_reason: optional(Some(self.error_reason)),
            region: text(self.region),
            document_type: optional(self.document_type),
            device_type: optional(self.device_type),
            unreadable: Vec::new(),
        }
    }

    pub fn has_timestamp(&self) -> bool {
        self.timestamp.is_some()
    }

    /// Name of the known column at `index`, if any.
    pub fn field_at(&self, index: usize) -> Option<&'static str> {
        [
            ("request_id", Some(self.request_id)),
            ("api_name", Some(self.api_name)),
            ("latency_ms", Some(self.latency_ms)),
            ("status_code", Some(self.status_code)),
            ("error_reason", Some(self.error_reason)),
            ("region", Some(self.region)),
            ("timestamp", self.timestamp),
            ("document_type", self.document_type),
            ("device_type", self.device_type),
        ]
        .into_iter()
        .find(|(_, position)| *position == Some(index))
        .map(|(name, _)| name)
    }
}
