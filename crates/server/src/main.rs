// crates/server/src/main.rs
//! reelgrab server binary.
//!
//! Loads configuration, validates the conversion tool and scratch directory,
//! starts the artifact sweeper and serves the API until Ctrl-C / SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use reelgrab_core::{AppConfig, ConversionService};
use reelgrab_server::{create_app, AppState};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,reelgrab=debug";

#[derive(Debug, Parser)]
#[command(name = "reelgrab", version, about = "Media download and conversion server")]
struct Cli {
    /// Port to listen on (overrides config and environment).
    #[arg(long)]
    port: Option<u16>,

    /// Config file path.
    #[arg(long, env = "REELGRAB_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for in-flight artifacts.
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(dir) = cli.scratch_dir {
        config.scratch_dir = dir;
    }

    // Startup validation: both failures are fatal.
    let tool = config.tool_settings().resolve_tool().with_context(|| {
        format!(
            "Conversion tool '{}' not found; install yt-dlp or set YTDLP_PATH",
            config.tool_path.display()
        )
    })?;
    tracing::info!(path = %tool.display(), "Conversion tool resolved");
    config.tool_path = tool;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.host, config.port))?;

    let state = AppState::new(config);
    state
        .service
        .artifacts()
        .ensure_writable()
        .await
        .context("Scratch directory is not usable")?;

    let sweeper = state
        .service
        .artifacts()
        .spawn_sweeper(state.config.sweep_interval(), state.config.artifact_max_age());

    let service = Arc::clone(&state.service);
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, version = env!("CARGO_PKG_VERSION"), "reelgrab listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(service))
        .await
        .context("Server error")?;

    sweeper.abort();
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM after cancelling every active job and
/// ending every progress stream, so graceful shutdown can drain connections.
async fn shutdown_signal(service: Arc<ConversionService>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }

    service.shutdown();
}
