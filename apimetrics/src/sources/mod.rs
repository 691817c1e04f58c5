//! Data source abstraction layer
//!
//! This module defines the `DataSource` trait, the single capability interface behind which the
//! two ways of obtaining metrics live:
//!
//! - [`csv::CsvSource`] loads the raw request log from a delimited file and runs the in-memory
//!   engine over it.
//! - [`postgres::PostgresSource`] pushes the three aggregations down into PostgreSQL and reads
//!   back tables of the same shape.
//!
//! The two agree on row content per key (within the documented percentile tolerance of the
//! pushdown path), not on row order.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::config::DataSourceConfig;
use crate::engine::{ApiMetrics, FunnelMetrics, MetricsReport, RegionMetrics, Warning};
use crate::errors::{Error, Result};
use crate::log_table::MalformedRecordPolicy;

pub mod csv;
pub mod errors;
pub mod postgres;

pub use self::csv::CsvSource;
pub use self::postgres::{PercentileMethod, PostgresSource};

/// Create a data source from configuration
///
/// This is the single point where configuration turns into an adapter. No I/O happens here: the
/// file is read and the database contacted on first use.
pub fn create_source(config: &DataSourceConfig, policy: MalformedRecordPolicy) -> Result<Arc<dyn DataSource>> {
    match config {
        DataSourceConfig::Csv { input_file, delimiter } => {
            let delimiter = u8::try_from(*delimiter).map_err(|_| Error::Config {
                message: format!("CSV delimiter {delimiter:?} must be a single ASCII character"),
            })?;
            Ok(Arc::new(CsvSource::new(input_file, delimiter, policy)))
        }
        DataSourceConfig::Postgres {
            url,
            table,
            percentile,
            pool,
            query_timeout,
        } => Ok(Arc::new(PostgresSource::connect_lazy(url, table, *percentile, pool, *query_timeout)?)),
    }
}

/// Abstract metrics source
///
/// Implementors produce the three summary tables. Each call derives its result fresh from the
/// current contents of the source.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Short name for logs ("csv", "postgres")
    fn name(&self) -> &'static str;

    /// Per-API metrics
    async fn api_metrics(&self) -> Result<Vec<ApiMetrics>>;

    /// Per-API conversion funnel
    async fn funnel_metrics(&self) -> Result<Vec<FunnelMetrics>>;

    /// Per-region metrics
    async fn region_metrics(&self) -> Result<Vec<RegionMetrics>>;

    /// All three tables
    ///
    /// The default implementation calls the three table methods in turn. Sources that can
    /// produce a consistent snapshot more cheaply should override it.
    async fn report(&self) -> Result<MetricsReport> {
        let api_metrics = self.api_metrics().await?;
        let funnel_metrics = self.funnel_metrics().await?;
        let region_metrics = self.region_metrics().await?;

        let mut report = MetricsReport {
            api_metrics,
            funnel_metrics,
            region_metrics,
            warnings: Vec::new(),
        };
        if report.is_empty() {
            warn!(source = self.name(), "Data source returned no rows");
            report.warnings.push(Warning::EmptyInput);
        }
        Ok(report)
    }

    /// Connectivity check: number of request records visible to this source
    async fn check(&self) -> Result<u64>;
}
