use anyhow::{Context, Result};
use std::{io::ErrorKind, net::SocketAddr, time::Duration};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

const MIN_SWEEP_INTERVAL_SECS: u64 = 60;
const MAX_SWEEP_INTERVAL_SECS: u64 = 3600;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting filedrop with config: {:?}", cfg);

    // --- Ensure upload and working directories exist ---
    for dir in [&cfg.upload_dir, &cfg.temp_dir] {
        if !fs::try_exists(dir).await? {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating directory {}", dir.display()))?;
            tracing::info!("Created directory at {}", dir.display());
        }
    }

    // --- Initialize shared state ---
    let state = state::AppState::new(cfg.clone());

    if cfg.stale_upload_ttl_secs > 0 {
        spawn_sweeper(state.clone(), cfg.stale_upload_ttl_secs);
    }

    // --- Build router ---
    let app = routes::routes::routes(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Periodically remove abandoned upload state and expired sessions.
fn spawn_sweeper(state: state::AppState, ttl_secs: u64) {
    let ttl = Duration::from_secs(ttl_secs);
    let period = Duration::from_secs(
        (ttl_secs / 4).clamp(MIN_SWEEP_INTERVAL_SECS, MAX_SWEEP_INTERVAL_SECS),
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match state.uploads.sweep_stale(ttl).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!("Swept {} abandoned uploads", removed),
                Err(err) => tracing::warn!("Sweeping abandoned uploads failed: {}", err),
            }
            let expired = state.sessions.purge_expired();
            if expired > 0 {
                tracing::debug!("Purged {} expired sessions", expired);
            }
        }
    });
}
