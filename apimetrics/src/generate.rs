//! Synthetic request logs for demos and load tests.
//!
//! Produces identity-verification traffic over four APIs with realistic latency spreads, an
//! ~18% failure rate and a region/device mix skewed towards metro Android users. With a fixed
//! seed the output (request ids included) is reproducible.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use rand::prelude::RngExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::Error;
use crate::log_table::RequestRecord;

/// APIs and their base latency in milliseconds.
pub const APIS: [(&str, f64); 4] = [
    ("OCR_PAN", 1200.0),
    ("OCR_AADHAAR", 1400.0),
    ("FACE_MATCH", 900.0),
    ("KYC_VERIFY", 700.0),
];
pub const DOCUMENT_TYPES: [&str; 4] = ["PAN", "AADHAAR", "PASSPORT", "DRIVING_LICENSE"];
pub const REGIONS: [(&str, f64); 4] = [("Metro", 0.4), ("Tier-1", 0.3), ("Tier-2", 0.2), ("Rural", 0.1)];
pub const DEVICES: [(&str, f64); 3] = [("Android", 0.6), ("iOS", 0.25), ("Web", 0.15)];
pub const FAILURE_STATUSES: [i64; 4] = [400, 401, 422, 500];
pub const ERROR_REASONS: [&str; 6] = [
    "LOW_IMAGE_QUALITY",
    "BLURRY_IMAGE",
    "FACE_MISMATCH",
    "DOCUMENT_EXPIRED",
    "NETWORK_ERROR",
    "TIMEOUT",
];

/// Standard deviation of the normally distributed latency around each API's base.
const LATENCY_JITTER_STD_MS: f64 = 300.0;
const MIN_LATENCY_MS: f64 = 200.0;

pub const LOG_HEADER: [&str; 9] = [
    "request_id",
    "api_name",
    "timestamp",
    "latency_ms",
    "status_code",
    "document_type",
    "region",
    "device_type",
    "error_reason",
];

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    pub rows: usize,
    /// Fixed seed for reproducible output. Random when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub output: PathBuf,
    /// Timestamps are spread over this many days before the generation instant
    pub days: u32,
    /// Probability that a request fails
    pub failure_rate: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            rows: 75_000,
            seed: None,
            output: PathBuf::from("raw_logs.csv"),
            days: 30,
            failure_rate: 0.18,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(Error::Config {
                message: format!("generator.failure_rate ({}) must be between 0 and 1", self.failure_rate),
            });
        }
        if self.days == 0 {
            return Err(Error::Config {
                message: "generator.days must be at least 1".to_string(),
            });
        }
        if self.output.as_os_str().is_empty() {
            return Err(Error::Config {
                message: "generator.output cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Pick from `(value, weight)` pairs with probability proportional to weight.
fn weighted<'a, R: Rng + ?Sized>(rng: &mut R, choices: &[(&'a str, f64)]) -> &'a str {
    let total: f64 = choices.iter().map(|(_, weight)| weight).sum();
    let mut point = rng.random_range(0.0..total);
    for &(value, weight) in choices {
        if point < weight {
            return value;
        }
        point -= weight;
    }
    // Floating-point leftovers land on the last choice
    choices[choices.len() - 1].0
}

fn request_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);
    uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
}

/// Generate `config.rows` request records with timestamps in the `config.days` days before `end`,
/// sorted by timestamp.
pub fn generate_logs(config: &GeneratorConfig, end: DateTime<Utc>) -> Vec<RequestRecord> {
    let seed = config.seed.unwrap_or_else(|| rand::rng().random_range(0..u64::MAX));
    let mut rng = StdRng::seed_from_u64(seed);
    let start = end - Duration::days(i64::from(config.days));
    let window_minutes = i64::from(config.days) * 24 * 60;

    let mut records: Vec<RequestRecord> = (0..config.rows)
        .map(|_| {
            let (api_name, base_latency) = APIS[rng.random_range(0..APIS.len())];
            let success = rng.random_range(0.0..1.0) >= config.failure_rate;

            let (status_code, error_reason) = if success {
                (200, None)
            } else {
                (
                    FAILURE_STATUSES[rng.random_range(0..FAILURE_STATUSES.len())],
                    Some(ERROR_REASONS[rng.random_range(0..ERROR_REASONS.len())].to_string()),
                )
            };

            let jitter: f64 = StandardNormal.sample(&mut rng);
            let mut latency = base_latency + jitter * LATENCY_JITTER_STD_MS;
            if !success {
                latency += f64::from(rng.random_range(300..=800u32));
            }

            RequestRecord {
                request_id: request_id(&mut rng),
                api_name: api_name.to_string(),
                timestamp: Some(start + Duration::minutes(rng.random_range(0..=window_minutes))),
                latency_ms: Some(latency.trunc().max(MIN_LATENCY_MS)),
                status_code: Some(status_code),
                error_reason,
                region: weighted(&mut rng, &REGIONS).to_string(),
                document_type: Some(DOCUMENT_TYPES[rng.random_range(0..DOCUMENT_TYPES.len())].to_string()),
                device_type: Some(weighted(&mut rng, &DEVICES).to_string()),
            }
        })
        .collect();

    records.sort_by_key(|record| record.timestamp);
    info!(rows = records.len(), seed, "Generated synthetic request log");
    records
}

/// Write records in the raw log layout that the CSV data source reads.
pub fn write_logs(path: &Path, records: &[RequestRecord]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);

    writer.write_record(LOG_HEADER)?;
    for record in records {
        let timestamp = record
            .timestamp
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let latency = record.latency_ms.map(|ms| ms.to_string()).unwrap_or_default();
        let status = record.status_code.map(|code| code.to_string()).unwrap_or_default();
        writer.write_record([
            record.request_id.as_str(),
            record.api_name.as_str(),
            timestamp.as_str(),
            latency.as_str(),
            status.as_str(),
            record.document_type.as_deref().unwrap_or_default(),
            record.region.as_str(),
            record.device_type.as_deref().unwrap_or_default(),
            record.error_reason.as_deref().unwrap_or_default(),
        ])?;
    }
    writer.flush().with_context(|| format!("writing {}", path.display()))?;

    info!(rows = records.len(), path = %path.display(), "Wrote request log");
    Ok(())
}
