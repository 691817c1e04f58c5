//! PostgreSQL pushdown data source.
//!
//! The three aggregations run inside the database as grouped queries over the request log table.
//! Results carry the same columns and rounding as the in-memory engine. Row order is decided by
//! the queries (funnel by conversion rate, regions by success rate) and differs from the
//! first-occurrence order of the in-memory path.
//!
//! # Percentile tolerance
//!
//! [`PercentileMethod::Continuous`] uses `PERCENTILE_CONT(0.95)`, which interpolates exactly like
//! the in-memory percentile; results agree up to floating-point noise. [`PercentileMethod::Ntile`]
//! splits each API's latencies into 20 buckets and reports the largest value of bucket 19. That
//! value lies between the 90th and 95th percentile order statistics. Groups with fewer than 19
//! latencies have no bucket 19 and report their maximum instead.
//!
//! # Schema
//!
//! Every call first reads the table's columns from `information_schema.columns` and applies the
//! same required-column check as the file source, so a table without `region` fails with a
//! schema mismatch rather than a query error. `timestamp` is optional: without it, ties between
//! error reasons are broken by name alone.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, postgres::PgPoolOptions};
use tracing::{debug, instrument};

use super::DataSource;
use super::errors::DataSourceError;
use crate::config::PoolSettings;
use crate::engine::{ApiMetrics, FunnelMetrics, RegionMetrics};
use crate::errors::{Error, Result};
use crate::log_table::{ColumnMap, validate_schema};

/// How the pushdown path computes the tail latency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PercentileMethod {
    /// `PERCENTILE_CONT(0.95)`: linear interpolation, identical to the in-memory engine.
    #[default]
    Continuous,
    /// `NTILE(20)` bucket selection, for databases where ordered-set aggregates are slow.
    Ntile,
}

/// Aggregates pushed down into a PostgreSQL table of request records.
#[derive(Debug, Clone)]
pub struct PostgresSource {
    pool: PgPool,
    table: String,
    percentile: PercentileMethod,
    query_timeout: Duration,
}

/// Check that `name` is a plain (optionally schema-qualified) SQL identifier.
///
/// The table name is interpolated into query text, so anything beyond `[A-Za-z_][A-Za-z0-9_.]*`
/// is rejected.
pub fn validate_table_name(name: &str) -> std::result::Result<(), String> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err("table name must not be empty".to_string());
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(format!("table name {name:?} must start with a letter or underscore"));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '.')) {
        return Err(format!("table name {name:?} contains invalid character {bad:?}"));
    }
    if name.ends_with('.') || name.contains("..") {
        return Err(format!("table name {name:?} has an empty schema or table part"));
    }
    Ok(())
}

impl PostgresSource {
    /// Build the pool without connecting. The first query opens the first connection.
    pub fn connect_lazy(
        url: &str,
        table: &str,
        percentile: PercentileMethod,
        settings: &PoolSettings,
        query_timeout: Duration,
    ) -> Result<Self> {
        if url.trim().is_empty() {
            return Err(DataSourceError::NotConfigured {
                message: "postgres data source has no url (set data_source.url or DATABASE_URL)".to_string(),
            }
            .into());
        }

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
            .idle_timeout((settings.idle_timeout_secs > 0).then(|| Duration::from_secs(settings.idle_timeout_secs)))
            .max_lifetime((settings.max_lifetime_secs > 0).then(|| Duration::from_secs(settings.max_lifetime_secs)))
            .connect_lazy(url)
            .map_err(|err| DataSourceError::NotConfigured {
                message: format!("invalid database url: {err}"),
            })?;

        Self::from_pool(pool, table, percentile, query_timeout)
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, table: &str, percentile: PercentileMethod, query_timeout: Duration) -> Result<Self> {
        validate_table_name(table).map_err(|message| Error::Config { message })?;
        Ok(Self {
            pool,
            table: table.to_string(),
            percentile,
            query_timeout,
        })
    }

    /// Run a query under the configured timeout, categorising failures.
    async fn timed<T, F>(&self, query: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.query_timeout, query).await {
            Ok(result) => Ok(result.map_err(DataSourceError::from)?),
            Err(_) => Err(DataSourceError::Timeout(self.query_timeout).into()),
        }
    }

    /// Column names of the configured table, in table order. Empty when the table does not exist.
    async fn table_columns(&self) -> Result<Vec<String>> {
        let (schema, table) = split_table_name(&self.table);
        let sql = columns_sql(schema.is_some());
        let mut query = sqlx::query_scalar::<_, String>(sql).bind(table.to_ascii_lowercase());
        if let Some(schema) = schema {
            query = query.bind(schema.to_ascii_lowercase());
        }
        self.timed(query.fetch_all(&self.pool)).await
    }

    /// Check the table has every required column before aggregating over it.
    async fn ensure_schema(&self) -> Result<ColumnMap> {
        let columns = self.table_columns().await?;
        let map = validate_schema(&columns)?;
        debug!(columns = columns.len(), "Table schema accepted");
        Ok(map)
    }
}

/// Split `schema.table` into its parts. Unqualified names have no schema.
fn split_table_name(name: &str) -> (Option<&str>, &str) {
    let mut parts = name.rsplit('.');
    let table = parts.next().unwrap_or(name);
    (parts.next(), table)
}

/// Column listing for the configured table. Unquoted identifiers fold to lower case, so the
/// caller binds lower-cased names. Unqualified tables are looked up on the search path.
pub fn columns_sql(qualified: bool) -> &'static str {
    if qualified {
        "SELECT column_name::text
    FROM information_schema.columns
    WHERE table_name = $1 AND table_schema = $2
    ORDER BY ordinal_position"
    } else {
        "SELECT column_name::text
    FROM information_schema.columns
    WHERE table_name = $1 AND table_schema = ANY(current_schemas(false))
    ORDER BY ordinal_position"
    }
}

const SUCCESS_COUNT: &str = "SUM(CASE WHEN status_code = 200 THEN 1 ELSE 0 END)";

/// Per-API pushdown query: totals, success rate, mean and p95 latency, and top error reason.
///
/// `has_timestamp` says whether the table carries the optional `timestamp` column used to break
/// ties between equally frequent error reasons.
pub fn api_metrics_sql(table: &str, method: PercentileMethod, has_timestamp: bool) -> String {
    let first_seen = if has_timestamp { "MIN(timestamp)" } else { "NULL::timestamptz" };
    let p95 = match method {
        PercentileMethod::Continuous => format!(
            "p95 AS (
        SELECT api_name,
               ROUND((PERCENTILE_CONT(0.95) WITHIN GROUP (ORDER BY latency_ms))::numeric, 2)::float8 AS p95_latency_ms
        FROM {table}
        WHERE latency_ms IS NOT NULL
        GROUP BY api_name
    )"
        ),
        PercentileMethod::Ntile => format!(
            "ranked AS (
        SELECT api_name,
               latency_ms,
               NTILE(20) OVER (PARTITION BY api_name ORDER BY latency_ms) AS bucket
        FROM {table}
        WHERE latency_ms IS NOT NULL
    ),
    p95 AS (
        SELECT api_name,
               ROUND(COALESCE(MAX(latency_ms) FILTER (WHERE bucket = 19), MAX(latency_ms))::numeric, 2)::float8 AS p95_latency_ms
        FROM ranked
        GROUP BY api_name
    )"
        ),
    };

    format!(
        "WITH base AS (
        SELECT api_name,
               COUNT(*)::bigint AS total_requests,
               ROUND(100.0 * {SUCCESS_COUNT} / COUNT(*), 2)::float8 AS success_rate,
               ROUND(AVG(latency_ms)::numeric, 2)::float8 AS avg_latency_ms
        FROM {table}
        GROUP BY api_name
    ),
    {p95},
    error_counts AS (
        SELECT api_name,
               error_reason,
               COUNT(*) AS occurrences,
               {first_seen} AS first_seen
        FROM {table}
        WHERE error_reason IS NOT NULL AND error_reason <> ''
        GROUP BY api_name, error_reason
    ),
    top_errors AS (
        SELECT DISTINCT ON (api_name) api_name, error_reason
        FROM error_counts
        ORDER BY api_name, occurrences DESC, first_seen ASC NULLS LAST, error_reason ASC
    )
    SELECT b.api_name,
           b.total_requests,
           b.success_rate,
           b.avg_latency_ms,
           p.p95_latency_ms,
           t.error_reason AS top_error_reason
    FROM base b
    LEFT JOIN p95 p ON p.api_name = b.api_name
    LEFT JOIN top_errors t ON t.api_name = b.api_name
    ORDER BY b.api_name"
    )
}

/// Per-API conversion funnel, best converting first.
pub fn funnel_sql(table: &str) -> String {
    format!(
        "SELECT api_name,
           COUNT(*)::bigint AS total_requests,
           {SUCCESS_COUNT}::bigint AS successful_requests,
           ROUND(100.0 * {SUCCESS_COUNT} / COUNT(*), 2)::float8 AS conversion_rate
    FROM {table}
    GROUP BY api_name
    ORDER BY conversion_rate DESC, api_name"
    )
}

/// Per-region success rate, best first.
pub fn region_sql(table: &str) -> String {
    format!(
        "SELECT region,
           COUNT(*)::bigint AS total_requests,
           ROUND(100.0 * {SUCCESS_COUNT} / COUNT(*), 2)::float8 AS success_rate
    FROM {table}
    GROUP BY region
    ORDER BY success_rate DESC, region"
    )
}

pub fn count_sql(table: &str) -> String {
    format!("SELECT COUNT(*)::bigint FROM {table}")
}

#[derive(Debug, FromRow)]
struct ApiMetricsRow {
    api_name: String,
    total_requests: i64,
    success_rate: f64,
    avg_latency_ms: Option<f64>,
    p95_latency_ms: Option<f64>,
    top_error_reason: Option<String>,
}

impl From<ApiMetricsRow> for ApiMetrics {
    fn from(row: ApiMetricsRow) -> Self {
        Self {
            api_name: row.api_name,
            total_requests: row.total_requests.max(0) as u64,
            success_rate: row.success_rate,
            avg_latency_ms: row.avg_latency_ms,
            p95_latency_ms: row.p95_latency_ms,
            top_error_reason: row.top_error_reason.filter(|reason| !reason.is_empty()),
        }
    }
}

#[derive(Debug, FromRow)]
struct FunnelRow {
    api_name: String,
    total_requests: i64,
    successful_requests: i64,
    conversion_rate: f64,
}

impl From<FunnelRow> for FunnelMetrics {
    fn from(row: FunnelRow) -> Self {
        Self {
            api_name: row.api_name,
            total_requests: row.total_requests.max(0) as u64,
            successful_requests: row.successful_requests.max(0) as u64,
            conversion_rate: row.conversion_rate,
        }
    }
}

#[derive(Debug, FromRow)]
struct RegionRow {
    region: String,
    total_requests: i64,
    success_rate: f64,
}

impl From<RegionRow> for RegionMetrics {
    fn from(row: RegionRow) -> Self {
        Self {
            region: row.region,
            total_requests: row.total_requests.max(0) as u64,
            success_rate: row.success_rate,
        }
    }
}

#[async_trait]
impl DataSource for PostgresSource {
    fn name(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self), fields(table = %self.table, percentile = ?self.percentile), err)]
    async fn api_metrics(&self) -> Result<Vec<ApiMetrics>> {
        let columns = self.ensure_schema().await?;
        let sql = api_metrics_sql(&self.table, self.percentile, columns.has_timestamp());
        let rows: Vec<ApiMetricsRow> = self.timed(sqlx::query_as(&sql).fetch_all(&self.pool)).await?;
        debug!(rows = rows.len(), "Fetched api metrics");
        Ok(rows.into_iter().map(ApiMetrics::from).collect())
    }

    #[instrument(skip(self), fields(table = %self.table), err)]
    async fn funnel_metrics(&self) -> Result<Vec<FunnelMetrics>> {
        self.ensure_schema().await?;
        let sql = funnel_sql(&self.table);
        let rows: Vec<FunnelRow> = self.timed(sqlx::query_as(&sql).fetch_all(&self.pool)).await?;
        debug!(rows = rows.len(), "Fetched funnel metrics");
        Ok(rows.into_iter().map(FunnelMetrics::from).collect())
    }

    #[instrument(skip(self), fields(table = %self.table), err)]
    async fn region_metrics(&self) -> Result<Vec<RegionMetrics>> {
        self.ensure_schema().await?;
        let sql = region_sql(&self.table);
        let rows: Vec<RegionRow> = self.timed(sqlx::query_as(&sql).fetch_all(&self.pool)).await?;
        debug!(rows = rows.len(), "Fetched region metrics");
        Ok(rows.into_iter().map(RegionMetrics::from).collect())
    }

    #[instrument(skip(self), fields(table = %self.table), err)]
    async fn check(&self) -> Result<u64> {
        self.ensure_schema().await?;
        let sql = count_sql(&self.table);
        let count: i64 = self.timed(sqlx::query_scalar(&sql).fetch_one(&self.pool)).await?;
        Ok(count.max(0) as u64)
    }
}
