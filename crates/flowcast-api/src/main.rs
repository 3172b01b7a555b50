//! Flowcast entry point.
//!
//! Binary name: `flowcast`
//!
//! Parses CLI arguments, loads `flowcast.toml`, initializes tracing, the
//! database and the stream controller, then serves the HTTP API.

mod cli;
mod config;
mod http;
mod state;

use clap::Parser;
use flowcast_observe::tracing_setup::{LogFormat, TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&TracingOptions {
        format: if cli.json_logs { LogFormat::Json } else { LogFormat::Text },
        default_filter: TracingOptions::filter_for(cli.verbose, cli.quiet).to_string(),
        enable_otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let mut config = config::load_config(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            serve(config).await
        }
        Commands::Config => {
            if !config.upstream.app_secret.is_empty() {
                config.upstream.app_secret = "****".to_string();
            }
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    };

    shutdown_tracing();
    result
}

async fn serve(config: flowcast_types::config::FlowcastConfig) -> anyhow::Result<()> {
    let bind = config.server.bind.clone();
    let state = AppState::init(config).await?;

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(addr = %bind, "Flowcast API listening");

    let router = http::router::build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
