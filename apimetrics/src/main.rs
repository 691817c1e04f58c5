use clap::Parser;
use apimetrics::{
    commands,
    config::{Args, Command, Config},
    telemetry,
};

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before anything else that might build a TLS client
    apimetrics::install_crypto_provider();

    // Parse CLI args
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args)?;

    // If --validate flag is set, exit successfully after config validation
    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    // Initialize telemetry (tracing + optional OpenTelemetry)
    telemetry::init_telemetry(config.enable_otel_export)?;

    tracing::debug!("{:?}", args);

    let result = match args.command.clone().unwrap_or(Command::Aggregate) {
        Command::Aggregate => commands::aggregate(&config).await.map(|_| ()),
        // Shuts telemetry down itself once the server has drained
        Command::Serve => return commands::serve(config, shutdown_signal()).await,
        Command::Insight { api_name, from_file } => commands::insight(&config, api_name.as_deref(), from_file.as_deref())
            .await
            .map(|text| println!("{text}")),
        Command::Generate { rows, seed, output } => {
            commands::generate(&config, rows, seed, output).map(|path| println!("Wrote {}", path.display()))
        }
        Command::CheckSource => commands::check_source(&config)
            .await
            .map(|rows| println!("Data source reachable: {rows} request records")),
    };

    telemetry::shutdown_telemetry();
    result
}
