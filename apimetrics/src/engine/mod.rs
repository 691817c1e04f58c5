//! The metrics engine: pure group-by reductions from a [`LogTable`] to the three summary tables.
//!
//! Every function here is a pure function of its input. Grouping keys are the distinct values
//! present in the table, emitted in the order they are first encountered, so running the engine
//! twice over the same table yields identical output (row order included).
//!
//! All rates go through [`stats::rate`] on top of [`RequestRecord::is_success`], which keeps the
//! API success rate, the funnel conversion rate and the region success rate consistent with each
//! other.

pub mod stats;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::log_table::{LogTable, MalformedRecordError, RequestRecord};

/// Percentile reported as the tail latency.
pub const TAIL_LATENCY_PERCENTILE: f64 = 95.0;

/// Per-API performance summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMetrics {
    pub api_name: String,
    pub total_requests: u64,
    pub success_rate: f64,
    /// `None` when no request of this API has a usable latency.
    pub avg_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    /// `None` when no request of this API carries an error reason.
    pub top_error_reason: Option<String>,
}

/// Per-API conversion funnel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelMetrics {
    pub api_name: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub conversion_rate: f64,
}

/// Per-region success summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionMetrics {
    pub region: String,
    pub total_requests: u64,
    pub success_rate: f64,
}

/// Non-fatal conditions worth surfacing next to the tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// The source had no rows: the tables are empty, which is a valid result.
    EmptyInput,
    /// Rows dropped because a field could not be parsed. `samples` holds the first few failures.
    SkippedRows {
        count: usize,
        samples: Vec<MalformedRecordError>,
    },
    /// Fields treated as absent because they could not be parsed.
    MalformedFields {
        count: usize,
        samples: Vec<MalformedRecordError>,
    },
}

/// The three tables derived from one log table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub api_metrics: Vec<ApiMetrics>,
    pub funnel_metrics: Vec<FunnelMetrics>,
    pub region_metrics: Vec<RegionMetrics>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
}

impl MetricsReport {
    /// Total request count according to the API table.
    pub fn total_requests(&self) -> u64 {
        self.api_metrics.iter().map(|row| row.total_requests).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.api_metrics.is_empty() && self.funnel_metrics.is_empty() && self.region_metrics.is_empty()
    }
}

/// Group records by a string key, keeping first-encounter order of the keys and input order
/// within each group.
fn group_by<'a, F>(table: &'a LogTable, key: F) -> Vec<(&'a str, Vec<&'a RequestRecord>)>
where
    F: Fn(&'a RequestRecord) -> &'a str,
{
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, Vec<&RequestRecord>)> = Vec::new();

    for record in table {
        let name = key(record);
        let position = *positions.entry(name).or_insert_with(|| {
            groups.push((name, Vec::new()));
            groups.len() - 1
        });
        groups[position].1.push(record);
    }

    groups
}

fn count_successes(records: &[&RequestRecord]) -> u64 {
    records.iter().filter(|record| record.is_success()).count() as u64
}

/// Per-API totals, success rate, mean and p95 latency, and most frequent error reason.
#[instrument(skip_all, fields(rows = table.len()))]
pub fn api_metrics(table: &LogTable) -> Vec<ApiMetrics> {
    group_by(table, |record| record.api_name.as_str())
        .into_iter()
        .map(|(api_name, records)| {
            let total = records.len() as u64;
            let latencies: Vec<f64> = records.iter().filter_map(|record| record.latency_ms).collect();

            if latencies.len() < records.len() {
                debug!(api_name, excluded = records.len() - latencies.len(), "Requests without latency left out of latency stats");
            }

            ApiMetrics {
                api_name: api_name.to_string(),
                total_requests: total,
                success_rate: stats::rate(count_successes(&records), total),
                avg_latency_ms: stats::mean(&latencies).map(stats::round2),
                p95_latency_ms: stats::percentile(&latencies, TAIL_LATENCY_PERCENTILE).map(stats::round2),
                top_error_reason: stats::mode(records.iter().map(|record| record.error_reason())).map(str::to_string),
            }
        })
        .collect()
}

/// Per-API conversion funnel: total, successful and conversion rate.
#[instrument(skip_all, fields(rows = table.len()))]
pub fn funnel_metrics(table: &LogTable) -> Vec<FunnelMetrics> {
    group_by(table, |record| record.api_name.as_str())
        .into_iter()
        .map(|(api_name, records)| {
            let total = records.len() as u64;
            let successful = count_successes(&records);
            FunnelMetrics {
                api_name: api_name.to_string(),
                total_requests: total,
                successful_requests: successful,
                conversion_rate: stats::rate(successful, total),
            }
        })
        .collect()
}

/// Per-region totals and success rate.
#[instrument(skip_all, fields(rows = table.len()))]
pub fn region_metrics(table: &LogTable) -> Vec<RegionMetrics> {
    group_by(table, |record| record.region.as_str())
        .into_iter()
        .map(|(region, records)| {
            let total = records.len() as u64;
            RegionMetrics {
                region: region.to_string(),
                total_requests: total,
                success_rate: stats::rate(count_successes(&records), total),
            }
        })
        .collect()
}

/// Warnings that follow from the table itself (empty input, rows or fields lost to validation).
pub fn table_warnings(table: &LogTable) -> Vec<Warning> {
    let mut warnings = Vec::new();
    if table.is_empty() {
        warnings.push(Warning::EmptyInput);
    }
    if table.skipped_rows() > 0 {
        warnings.push(Warning::SkippedRows {
            count: table.skipped_rows(),
            samples: table.malformed_samples().to_vec(),
        });
    }
    if table.malformed_fields() > 0 {
        warnings.push(Warning::MalformedFields {
            count: table.malformed_fields(),
            samples: table.malformed_samples().to_vec(),
        });
    }
    warnings
}

/// Run all three aggregators over the same table.
#[instrument(skip_all, fields(rows = table.len()))]
pub fn compute_report(table: &LogTable) -> MetricsReport {
    if table.is_empty() {
        warn!("Log table is empty, producing empty metrics tables");
    }

    MetricsReport {
        api_metrics: api_metrics(table),
        funnel_metrics: funnel_metrics(table),
        region_metrics: region_metrics(table),
        warnings: table_warnings(table),
    }
}
