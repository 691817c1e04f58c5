//! # apimetrics: request-log analytics for identity-verification APIs
//!
//! `apimetrics` turns a raw log of API requests (one row per request, carrying API name, latency,
//! status code, error reason and region) into three summary tables:
//!
//! - **API metrics**: per API, request count, success rate, mean and p95 latency, and the most
//!   frequent error reason
//! - **Funnel metrics**: per API, total and successful requests and the conversion rate
//! - **Region metrics**: per region, request count and success rate
//!
//! A request is successful exactly when its status code is 200; every rate in every table is built
//! on that one predicate.
//!
//! ## Architecture
//!
//! The **log table** ([`log_table`]) is the validated, typed form of the raw log. Required columns
//! are checked before any row is read, and rows with unparseable fields are handled according to a
//! [`log_table::MalformedRecordPolicy`].
//!
//! The **engine** ([`engine`]) is a set of pure group-by reductions from a log table to the three
//! tables. Groups appear in the order their key first occurs, so repeated runs are identical.
//!
//! **Data sources** ([`sources`]) sit behind the [`sources::DataSource`] trait. The CSV source reads
//! a delimited file and runs the engine; the PostgreSQL source pushes the same aggregations down
//! into SQL.
//!
//! Around that core sit the CSV [`output`] writer, the HTTP [`api`], optional LLM [`insights`] and
//! the synthetic log generator in [`generate`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use apimetrics::{Application, config::{Args, Config}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = Args::parse();
//!     let config = Config::load(&args)?;
//!     apimetrics::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     Application::new(config)?
//!         .serve(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```
pub mod api;
pub mod commands;
pub mod config;
pub mod engine;
pub mod errors;
pub mod generate;
pub mod insights;
pub mod log_table;
pub mod output;
pub mod sources;
pub mod telemetry;

#[cfg(test)]
mod test_utils;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};

use crate::config::Config;
use crate::insights::InsightGenerator;
use crate::sources::DataSource;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn DataSource>,
    /// `None` when insight generation is disabled
    pub insights: Option<Arc<dyn InsightGenerator>>,
}

impl AppState {
    pub fn new(source: Arc<dyn DataSource>, insights: Option<Arc<dyn InsightGenerator>>) -> Self {
        Self { source, insights }
    }

    /// Build the data source and insight generator described by `config`. No I/O happens here.
    pub fn from_config(config: &Config) -> errors::Result<Self> {
        let source = sources::create_source(&config.data_source, config.malformed_records)?;
        let insights = insights::create_generator(&config.insights)?;
        Ok(Self::new(source, insights))
    }
}

/// Install the process-wide rustls crypto provider. Safe to call more than once.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Build the HTTP router with all routes and the tracing layer.
pub fn build_router(state: AppState) -> Router {
    use api::handlers;

    let api_routes = Router::new()
        .route("/metrics", get(handlers::metrics::get_report))
        .route("/metrics/apis", get(handlers::metrics::list_api_metrics))
        .route("/metrics/funnel", get(handlers::metrics::list_funnel_metrics))
        .route("/metrics/regions", get(handlers::metrics::list_region_metrics))
        .route("/apis", get(handlers::metrics::list_apis))
        .route("/insights/{api_name}", post(handlers::insights::generate_insight));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .nest("/api/v1", api_routes)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// The HTTP surface, ready to serve.
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let state = AppState::from_config(&config)?;
        info!(source = state.source.name(), insights = state.insights.is_some(), "Application configured");
        Ok(Self {
            router: build_router(state),
            config,
        })
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "apimetrics listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();
        Ok(())
    }
}
