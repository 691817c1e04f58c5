//! CSV persistence of the metrics tables.
//!
//! Every table is written with its header row even when it has no rows. Absent values
//! (`avg_latency_ms`, `p95_latency_ms`, `top_error_reason`) are empty cells.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use tracing::info;

use crate::config::OutputConfig;
use crate::engine::{ApiMetrics, MetricsReport};

pub const API_METRICS_HEADER: [&str; 6] = [
    "api_name",
    "total_requests",
    "success_rate",
    "avg_latency_ms",
    "p95_latency_ms",
    "top_error_reason",
];
pub const FUNNEL_METRICS_HEADER: [&str; 4] = ["api_name", "total_requests", "successful_requests", "conversion_rate"];
pub const REGION_METRICS_HEADER: [&str; 3] = ["region", "total_requests", "success_rate"];

/// Write `rows` as CSV with an explicit header.
pub fn write_table<W: Write, T: Serialize>(writer: W, header: &[&str], rows: &[T]) -> anyhow::Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_table_file<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write_table(file, header, rows).with_context(|| format!("writing {}", path.display()))
}

/// Write the three tables to the configured paths.
pub fn write_report(report: &MetricsReport, output: &OutputConfig) -> anyhow::Result<()> {
    write_table_file(&output.api_metrics, &API_METRICS_HEADER, &report.api_metrics)?;
    write_table_file(&output.funnel_metrics, &FUNNEL_METRICS_HEADER, &report.funnel_metrics)?;
    write_table_file(&output.region_metrics, &REGION_METRICS_HEADER, &report.region_metrics)?;

    info!(
        api_metrics = %output.api_metrics.display(),
        funnel_metrics = %output.funnel_metrics.display(),
        region_metrics = %output.region_metrics.display(),
        "Wrote metrics tables"
    );
    Ok(())
}

/// Read a previously written API metrics table.
pub fn read_api_metrics_from<R: Read>(reader: R) -> anyhow::Result<Vec<ApiMetrics>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let rows = reader.deserialize().collect::<Result<Vec<ApiMetrics>, _>>()?;
    Ok(rows)
}

pub fn read_api_metrics(path: &Path) -> anyhow::Result<Vec<ApiMetrics>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    read_api_metrics_from(file).with_context(|| format!("reading {}", path.display()))
}
