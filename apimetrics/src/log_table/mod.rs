//! The in-memory request log the metrics engine aggregates over.
//!
//! A [`LogTable`] is built from [`RawRecord`]s (string fields exactly as a data source delivered
//! them) by [`LogTable::from_raw`], which parses the numeric and timestamp fields and applies the
//! configured [`MalformedRecordPolicy`] to rows that fail to parse. Row order and values are kept
//! as given: the only derivations are the parsed timestamp and the success flag.
//!
//! Schema checks (presence of the required columns) live in [`schema`] and run before any row is
//! read.

pub mod schema;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub use schema::{ColumnMap, REQUIRED_FIELDS, validate_schema};

/// The only status code counted as a successful request.
pub const SUCCESS_STATUS: i64 = 200;

/// How many malformed-record errors a table keeps for reporting. The rest are only counted.
pub const MAX_MALFORMED_SAMPLES: usize = 10;

/// A cell, or a whole row, that a source could not read as text: a row with the wrong number of
/// fields, or a cell that is not valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableCell {
    /// Column name, or `record` when the row itself is malformed
    pub field: String,
    pub value: String,
}

/// A log row as read from a data source, before any parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub request_id: String,
    pub api_name: String,
    pub timestamp: Option<String>,
    pub latency_ms: String,
    pub status_code: String,
    pub error_reason: Option<String>,
    pub region: String,
    pub document_type: Option<String>,
    pub device_type: Option<String>,
    /// Problems the source hit while reading this row; the affected cells are left empty
    #[serde(skip)]
    pub unreadable: Vec<UnreadableCell>,
}

/// One parsed request record.
///
/// `latency_ms`, `status_code` and `timestamp` are optional because the lenient malformed-record
/// policy keeps a row whose field failed to parse and treats that field as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_id: String,
    pub api_name: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub latency_ms: Option<f64>,
    pub status_code: Option<i64>,
    pub error_reason: Option<String>,
    pub region: String,
    pub document_type: Option<String>,
    pub device_type: Option<String>,
}

impl RequestRecord {
    /// Success predicate shared by every aggregate: `status_code == 200`, nothing else.
    pub fn is_success(&self) -> bool {
        self.status_code == Some(SUCCESS_STATUS)
    }

    /// The error reason if present and non-empty.
    pub fn error_reason(&self) -> Option<&str> {
        self.error_reason.as_deref().filter(|reason| !reason.is_empty())
    }
}

/// What to do with a row that has a field which cannot be parsed as its expected type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedRecordPolicy {
    /// Keep the row and treat the unparseable field as absent. A row with a bad latency still
    /// counts towards `total_requests` but is left out of latency statistics.
    #[default]
    Lenient,
    /// Drop the whole row from every table.
    Skip,
    /// Fail the run on the first malformed row.
    Abort,
}

/// A field of a log row that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Malformed record at row {row} (request_id {request_id:?}): field `{field}` has invalid value {value:?}")]
pub struct MalformedRecordError {
    /// 1-based data row number (the header is not counted).
    pub row: usize,
    pub request_id: String,
    pub field: String,
    pub value: String,
}

/// Ordered collection of request records plus the bookkeeping of what validation dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogTable {
    records: Vec<RequestRecord>,
    skipped_rows: usize,
    malformed_fields: usize,
    /// The first [`MAX_MALFORMED_SAMPLES`] errors behind `skipped_rows` / `malformed_fields`
    samples: Vec<MalformedRecordError>,
}

impl LogTable {
    /// Wrap already-parsed records.
    pub fn new(records: Vec<RequestRecord>) -> Self {
        Self {
            records,
            skipped_rows: 0,
            malformed_fields: 0,
            samples: Vec::new(),
        }
    }

    /// Parse raw rows into a table, applying `policy` to rows with unparseable fields.
    pub fn from_raw<I>(rows: I, policy: MalformedRecordPolicy) -> Result<Self, MalformedRecordError>
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let mut table = Self::default();

        for (index, raw) in rows.into_iter().enumerate() {
            let row = index + 1;
            let (record, errors) = parse_record(row, raw);

            if errors.is_empty() {
                table.records.push(record);
                continue;
            }

            match policy {
                MalformedRecordPolicy::Abort => {
                    if let Some(first) = errors.into_iter().next() {
                        warn!(row = first.row, field = %first.field, "Aborting on malformed record");
                        return Err(first);
                    }
                }
                MalformedRecordPolicy::Skip => {
                    table.skipped_rows += 1;
                    table.keep_samples(errors, "Skipping malformed row");
                }
                MalformedRecordPolicy::Lenient => {
                    table.malformed_fields += errors.len();
                    table.keep_samples(errors, "Treating malformed field as absent");
                    table.records.push(record);
                }
            }
        }

        if table.skipped_rows > 0 || table.malformed_fields > 0 {
            warn!(
                skipped_rows = table.skipped_rows,
                malformed_fields = table.malformed_fields,
                "Log table contained malformed records"
            );
        }

        Ok(table)
    }

    /// Log each error, keeping the first few for the report. Past the cap they go to `debug`.
    fn keep_samples(&mut self, errors: Vec<MalformedRecordError>, action: &str) {
        for error in errors {
            if self.samples.len() < MAX_MALFORMED_SAMPLES {
                warn!(row = error.row, request_id = %error.request_id, field = %error.field, value = %error.value, "{action}");
                self.samples.push(error);
            } else {
                debug!(row = error.row, field = %error.field, value = %error.value, "{action}");
            }
        }
    }

    pub fn records(&self) -> &[RequestRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RequestRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows dropped under [`MalformedRecordPolicy::Skip`].
    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    /// Fields treated as absent under [`MalformedRecordPolicy::Lenient`].
    pub fn malformed_fields(&self) -> usize {
        self.malformed_fields
    }

    /// The first malformed-record errors met while building the table, in row order.
    pub fn malformed_samples(&self) -> &[MalformedRecordError] {
        &self.samples
    }
}

impl<'a> IntoIterator for &'a LogTable {
    type Item = &'a RequestRecord;
    type IntoIter = std::slice::Iter<'a, RequestRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Parse one raw row. Unparseable fields come back as `None` together with their errors.
fn parse_record(row: usize, mut raw: RawRecord) -> (RequestRecord, Vec<MalformedRecordError>) {
    let unreadable = std::mem::take(&mut raw.unreadable);
    let mut errors = Vec::new();
    let mut malformed = |field: &str, value: &str| {
        errors.push(MalformedRecordError {
            row,
            request_id: raw.request_id.clone(),
            field: field.to_string(),
            value: value.to_string(),
        })
    };

    for cell in &unreadable {
        malformed(&cell.field, &cell.value);
    }

    let latency_ms = parse_latency(&raw.latency_ms);
    if latency_ms.is_none() {
        malformed("latency_ms", &raw.latency_ms);
    }

    let status_code = parse_status_code(&raw.status_code);
    if status_code.is_none() {
        malformed("status_code", &raw.status_code);
    }

    let timestamp = match raw.timestamp.as_deref().map(str::trim).filter(|ts| !ts.is_empty()) {
        None => None,
        Some(value) => {
            let parsed = parse_timestamp(value);
            if parsed.is_none() {
                malformed("timestamp", value);
            }
            parsed
        }
    };

    let record = RequestRecord {
        request_id: raw.request_id,
        api_name: raw.api_name,
        timestamp,
        latency_ms,
        status_code,
        error_reason: raw.error_reason.filter(|reason| !reason.is_empty()),
        region: raw.region,
        document_type: raw.document_type.filter(|value| !value.is_empty()),
        device_type: raw.device_type.filter(|value| !value.is_empty()),
    };

    (record, errors)
}

/// Latencies are kept as given: negative and non-finite values parse fine.
fn parse_latency(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok()
}

/// Accepts integers and integral floats (`"200.0"`), which spreadsheet exports produce.
fn parse_status_code(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(code) = value.parse::<i64>() {
        return Some(code);
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|code| code.is_finite() && code.fract() == 0.0 && code.abs() < i64::MAX as f64)
        .map(|code| code as i64)
}

/// RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS[.fff]` / `YYYY-MM-DDTHH:MM:SS[.fff]` read as UTC.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}
