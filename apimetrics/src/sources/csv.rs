//! Delimited-file data source.
//!
//! Reads the raw request log, checks the header row against the required schema before touching
//! any data row, builds a [`LogTable`] and hands it to the engine. The file is re-read on every
//! call so results always reflect its current contents.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, instrument};

use super::DataSource;
use super::errors::DataSourceError;
use crate::engine::{self, ApiMetrics, FunnelMetrics, MetricsReport, RegionMetrics};
use crate::errors::{Error, Result};
use crate::log_table::{ColumnMap, LogTable, MalformedRecordPolicy, RawRecord, UnreadableCell, validate_schema};

/// Log table loaded from a CSV (or other single-byte delimited) file.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    delimiter: u8,
    policy: MalformedRecordPolicy,
}

impl CsvSource {
    pub fn new(path: impl AsRef<Path>, delimiter: u8, policy: MalformedRecordPolicy) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            delimiter,
            policy,
        }
    }

    /// Read and validate the file synchronously.
    #[instrument(skip(self), fields(path = %self.path.display()), err)]
    pub fn load_table_blocking(&self) -> Result<LogTable> {
        let file = File::open(&self.path).map_err(|source| DataSourceError::Io {
            path: self.path.clone(),
            source,
        })?;
        let table = read_log_table(file, self.delimiter, self.policy).map_err(|err| match err {
            Error::DataSource(DataSourceError::Csv { source, .. }) => Error::DataSource(DataSourceError::Csv {
                path: self.path.clone(),
                source,
            }),
            other => other,
        })?;
        info!(rows = table.len(), "Loaded request log");
        Ok(table)
    }

    /// Read and validate the file on the blocking pool.
    pub async fn load_table(&self) -> Result<LogTable> {
        let source = self.clone();
        tokio::task::spawn_blocking(move || source.load_table_blocking())
            .await
            .map_err(DataSourceError::from)?
    }
}

/// Parse a request log from any reader.
///
/// The header row is validated first; a schema mismatch fails before any data row is read.
/// Rows with the wrong number of fields and cells that are not UTF-8 are bad data, not a broken
/// file: they go through `policy` like any other malformed record. Only failures to read the
/// underlying bytes surface as [`DataSourceError::Csv`].
pub fn read_log_table<R: Read>(reader: R, delimiter: u8, policy: MalformedRecordPolicy) -> Result<LogTable> {
    let csv_error = |source: ::csv::Error| DataSourceError::Csv {
        path: PathBuf::new(),
        source,
    };

    let mut reader = ::csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    // Decoded lossily: a mangled header name shows up as a missing column
    let headers: Vec<String> = reader
        .byte_headers()
        .map_err(csv_error)?
        .iter()
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect();
    let columns = validate_schema(&headers)?;

    let mut rows: Vec<RawRecord> = Vec::new();
    for record in reader.byte_records() {
        let record = record.map_err(csv_error)?;
        rows.push(decode_row(&columns, headers.len(), &record));
    }

    Ok(LogTable::from_raw(rows, policy)?)
}

/// Turn one byte record into a raw row. Unreadable cells are left empty and listed on the row.
fn decode_row(columns: &ColumnMap, expected_fields: usize, record: &::csv::ByteRecord) -> RawRecord {
    let mut unreadable = Vec::new();
    if record.len() != expected_fields {
        unreadable.push(UnreadableCell {
            field: "record".to_string(),
            value: format!("expected {expected_fields} fields, found {}", record.len()),
        });
    }

    let cells: Vec<&str> = record
        .iter()
        .enumerate()
        .map(|(index, bytes)| match std::str::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => {
                if let Some(field) = columns.field_at(index) {
                    unreadable.push(UnreadableCell {
                        field: field.to_string(),
                        value: String::from_utf8_lossy(bytes).into_owned(),
                    });
                }
                ""
            }
        })
        .collect();

    let mut raw = columns.raw_record(|index| cells.get(index).copied());
    raw.unreadable = unreadable;
    raw
}

#[async_trait]
impl DataSource for CsvSource {
    fn name(&self) -> &'static str {
        "csv"
    }

    async fn api_metrics(&self) -> Result<Vec<ApiMetrics>> {
        Ok(engine::api_metrics(&self.load_table().await?))
    }

    async fn funnel_metrics(&self) -> Result<Vec<FunnelMetrics>> {
        Ok(engine::funnel_metrics(&self.load_table().await?))
    }

    async fn region_metrics(&self) -> Result<Vec<RegionMetrics>> {
        Ok(engine::region_metrics(&self.load_table().await?))
    }

    /// One read of the file for all three tables, so they describe the same snapshot.
    async fn report(&self) -> Result<MetricsReport> {
        let table = self.load_table().await?;
        Ok(engine::compute_report(&table))
    }

    async fn check(&self) -> Result<u64> {
        Ok(self.load_table().await?.len() as u64)
    }
}
