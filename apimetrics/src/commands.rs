//! Entry points for the CLI subcommands.
//!
//! Each command takes the loaded [`Config`] and returns once its work is done. Results meant for
//! the user (insight text, row counts) go to stdout; everything else is logged.

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::Application;
use crate::config::Config;
use crate::engine::{ApiMetrics, MetricsReport};
use crate::errors::Error;
use crate::generate::{self, GeneratorConfig};
use crate::insights;
use crate::output;
use crate::sources::create_source;

/// Compute the report from the configured source and write the three tables.
#[instrument(skip_all)]
pub async fn aggregate(config: &Config) -> anyhow::Result<MetricsReport> {
    let source = create_source(&config.data_source, config.malformed_records)?;
    let report = source.report().await?;

    output::write_report(&report, &config.output)?;

    for warning in &report.warnings {
        warn!(?warning, "Report warning");
    }
    info!(
        source = source.name(),
        requests = report.total_requests(),
        apis = report.api_metrics.len(),
        regions = report.region_metrics.len(),
        "Aggregation complete"
    );
    Ok(report)
}

/// Serve the HTTP API until `shutdown` resolves.
pub async fn serve<F>(config: Config, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    Application::new(config)?.serve(shutdown).await
}

/// Pick the row to explain: the named API, or the first row when no name is given.
fn select_row(rows: Vec<ApiMetrics>, api_name: Option<&str>) -> Result<ApiMetrics, Error> {
    match api_name {
        Some(name) => rows.into_iter().find(|row| row.api_name == name).ok_or_else(|| Error::NotFound {
            resource: "API".to_string(),
            id: name.to_string(),
        }),
        None => rows.into_iter().next().ok_or_else(|| Error::NotFound {
            resource: "API".to_string(),
            id: "(first row)".to_string(),
        }),
    }
}

/// Generate commentary for one API and return it.
///
/// Metrics come from `from_file` (a previously written API table) when given, otherwise from the
/// configured data source.
#[instrument(skip(config))]
pub async fn insight(config: &Config, api_name: Option<&str>, from_file: Option<&Path>) -> anyhow::Result<String> {
    let generator = insights::create_generator(&config.insights)?.ok_or(Error::InsightsDisabled)?;

    let rows = match from_file {
        Some(path) => output::read_api_metrics(path)?,
        None => {
            create_source(&config.data_source, config.malformed_records)?
                .api_metrics()
                .await?
        }
    };
    let row = select_row(rows, api_name)?;

    let text = generator.generate(&row).await?;
    info!(api_name = %row.api_name, "Generated insight");
    Ok(text)
}

/// Write a synthetic request log. Command-line values override the `generator` section.
#[instrument(skip(config))]
pub fn generate(config: &Config, rows: Option<usize>, seed: Option<u64>, output: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let settings = GeneratorConfig {
        rows: rows.unwrap_or(config.generator.rows),
        seed: seed.or(config.generator.seed),
        output: output.unwrap_or_else(|| config.generator.output.clone()),
        ..config.generator.clone()
    };
    settings.validate()?;

    let records = generate::generate_logs(&settings, Utc::now());
    generate::write_logs(&settings.output, &records).with_context(|| "writing synthetic log")?;
    Ok(settings.output)
}

/// Check the configured source and return the number of visible request records.
#[instrument(skip_all)]
pub async fn check_source(config: &Config) -> anyhow::Result<u64> {
    let source = create_source(&config.data_source, config.malformed_records)?;
    let rows = source.check().await?;
    info!(source = source.name(), rows, "Data source reachable");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataSourceConfig, OutputConfig};
    use crate::engine::Warning;
    use crate::test_utils::{LOG_HEADER, write_log_file};
    use tempfile::TempDir;

    const LOG: &str = "\
r1,OCR_PAN,2025-01-01 10:00:00,100,200,PAN,Metro,Android,
r2,OCR_PAN,2025-01-01 10:01:00,200,500,PAN,Rural,iOS,TIMEOUT
r3,FACE_MATCH,2025-01-01 10:02:00,900,200,AADHAAR,Metro,Web,
";

    fn csv_config(input: &Path, dir: &TempDir) -> Config {
        let mut config = Config {
            data_source: DataSourceConfig::Csv {
                input_file: input.to_path_buf(),
                delimiter: ',',
            },
            output: OutputConfig {
                api_metrics: dir.path().join("api_metrics.csv"),
                funnel_metrics: dir.path().join("funnel_metrics.csv"),
                region_metrics: dir.path().join("region_metrics.csv"),
            },
            ..Default::default()
        };
        config.insights.enabled = false;
        config
    }

    #[test_log::test(tokio::test)]
    async fn test_aggregate_writes_tables() {
        let dir = tempfile::tempdir().unwrap();
        let log = write_log_file(&format!("{LOG_HEADER}{LOG}"));
        let config = csv_config(log.path(), &dir);

        let report = aggregate(&config).await.unwrap();

        assert_eq!(report.total_requests(), 3);
        let funnel = std::fs::read_to_string(&config.output.funnel_metrics).unwrap();
        assert_eq!(
            funnel,
            "api_name,total_requests,successful_requests,conversion_rate\nOCR_PAN,2,1,50.0\nFACE_MATCH,1,1,100.0\n"
        );
        let api_rows = output::read_api_metrics(&config.output.api_metrics).unwrap();
        assert_eq!(api_rows, report.api_metrics);
    }

    #[tokio::test]
    async fn test_aggregate_empty_log_writes_headers_only() {
        let dir = tempfile::tempdir().unwrap();
        let log = write_log_file(LOG_HEADER);
        let config = csv_config(log.path(), &dir);

        let report = aggregate(&config).await.unwrap();

        assert_eq!(report.warnings, vec![Warning::EmptyInput]);
        let regions = std::fs::read_to_string(&config.output.region_metrics).unwrap();
        assert_eq!(regions, "region,total_requests,success_rate\n");
    }

    #[tokio::test]
    async fn test_aggregate_schema_error_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = write_log_file("request_id,api_name\nr1,OCR_PAN\n");
        let config = csv_config(log.path(), &dir);

        let err = aggregate(&config).await.unwrap_err();

        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Schema { .. })));
        assert!(!config.output.api_metrics.exists());
    }

    #[tokio::test]
    async fn test_insight_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let log = write_log_file(&format!("{LOG_HEADER}{LOG}"));
        let config = csv_config(log.path(), &dir);

        let err = insight(&config, None, None).await.unwrap_err();

        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::InsightsDisabled)));
    }

    #[test]
    fn test_select_row() {
        let rows = |names: &[&str]| -> Vec<ApiMetrics> {
            names
                .iter()
                .map(|name| ApiMetrics {
                    api_name: name.to_string(),
                    total_requests: 1,
                    success_rate: 100.0,
                    avg_latency_ms: Some(1.0),
                    p95_latency_ms: Some(1.0),
                    top_error_reason: None,
                })
                .collect()
        };

        assert_eq!(select_row(rows(&["A", "B"]), None).unwrap().api_name, "A");
        assert_eq!(select_row(rows(&["A", "B"]), Some("B")).unwrap().api_name, "B");
        assert!(matches!(select_row(rows(&["A"]), Some("C")), Err(Error::NotFound { .. })));
        assert!(matches!(select_row(Vec::new(), None), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_generate_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let path = dir.path().join("logs/raw.csv");

        let written = generate(&config, Some(25), Some(1), Some(path.clone())).unwrap();

        assert_eq!(written, path);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with(LOG_HEADER));
        assert_eq!(contents.lines().count(), 26);
    }

    #[tokio::test]
    async fn test_check_source_counts_rows() {
        let dir = tempfile::tempdir().unwrap();
        let log = write_log_file(&format!("{LOG_HEADER}{LOG}"));
        let config = csv_config(log.path(), &dir);

        assert_eq!(check_source(&config).await.unwrap(), 3);
    }
}
