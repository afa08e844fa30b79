//! calsyncd - calendar synchronization service
//!
//! Loads configuration, builds the application context, starts the
//! background sweeps and serves the HTTP surface until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use calsync_api::utils::logging::{init_tracing, LogFormat};
use calsync_api::{router, AppContext};
use calsync_domain::Config;
use calsync_infra::config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before reading CALSYNC_LOG_FORMAT
    let dotenv = dotenvy::dotenv();
    init_tracing(LogFormat::from_env());
    match dotenv {
        Ok(path) => tracing::info!(path = %path.display(), "loaded .env"),
        Err(e) => tracing::debug!(error = %e, "no .env file loaded"),
    }

    let config = load_config().context("failed to load configuration")?;
    let bind_address = config.server.bind_address.clone();

    let ctx = Arc::new(AppContext::new(config).await.context("failed to build application context")?);
    ctx.start_background().await.context("failed to start background sweeps")?;

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    tracing::info!(address = %bind_address, "calsyncd listening");

    let served = axum::serve(listener, router(Arc::clone(&ctx)))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    tracing::info!("shutting down");
    if let Err(err) = ctx.shutdown().await {
        tracing::error!(error = %err, "shutdown did not complete cleanly");
    }
    served.context("HTTP server failed")
}

/// `CALSYNC_CONFIG` names a file explicitly; otherwise environment
/// variables, then the config file found on disk.
fn load_config() -> calsync_domain::Result<Config> {
    match std::env::var_os("CALSYNC_CONFIG") {
        Some(path) => {
            let config = config::load_from_file(Some(PathBuf::from(path)))?;
            config.validate()?;
            Ok(config)
        }
        None => config::load(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
