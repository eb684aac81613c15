// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data-plane entry point: pool setup, migrations, HTTP serve.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warden_config::validation::validate_for_dataplane;
use warden_core::WardenError;
use warden_dataplane::fanout::WorkerNotifier;
use warden_dataplane::tokens::TokenService;
use warden_dataplane::{AppState, router};

#[tokio::main]
async fn main() -> Result<(), WardenError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("WARDEN_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = warden_config::load_config()
        .map_err(|e| WardenError::Config(format!("failed to load config: {e}")))?;
    validate_for_dataplane(&config)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.pool_size)
        .connect(&config.database.url())
        .await
        .map_err(|e| WardenError::Storage {
            source: Box::new(e),
        })?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| WardenError::Storage {
            source: Box::new(e),
        })?;

    let state = AppState {
        pool,
        tokens: Arc::new(TokenService::new(
            config.upstream.clone(),
            config.tokens.clone(),
        )?),
        notifier: WorkerNotifier::new()?,
    };

    let addr = format!("0.0.0.0:{}", config.dataplane.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| WardenError::Config(format!("failed to bind data-plane to {addr}: {e}")))?;
    info!(%addr, "data-plane listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| WardenError::Internal(format!("data-plane server error: {e}")))?;
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }
}
