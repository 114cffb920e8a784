// crates/server/src/main.rs
//! tidal-dl web server binary.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tidal_dl_web_server::{create_app, AppState, Cli, Settings};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,tidal_dl_web_server=info,tidal_dl_web_core=info";

/// Warn early if the download tool cannot be found; downloads would fail.
fn check_binary(bin: &str) {
    match which::which(bin) {
        Ok(path) => tracing::info!(path = %path.display(), "Using download tool"),
        Err(e) => tracing::warn!(
            bin,
            error = %e,
            "TIDAL_DL_BIN is not present or not executable; set it to a valid binary path"
        ),
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = sigterm.recv() => {},
    }
    Ok(())
}

async fn shutdown(state: Arc<AppState>) {
    if let Err(e) = wait_for_shutdown_signal().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signals; shutting down");
    }
    tracing::info!("Shutdown requested");
    state.begin_shutdown().await;
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli).context("invalid configuration")?;
    check_binary(&settings.tidal_dl_bin);
    if settings.download_token.is_some() {
        tracing::info!("Download token required for /download");
    }

    let (host, port) = (settings.host.clone(), settings.port);
    let state = AppState::new(settings);
    let app = create_app(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))?;
    tracing::info!(addr = %listener.local_addr()?, "tidal-dl web v{} listening", env!("CARGO_PKG_VERSION"));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown(state))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
