// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Manager entry point: wait for the data-plane, spawn the fleet, serve the
//! health surface, and tear everything down on any termination signal.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use warden_config::validation::validate_for_manager;
use warden_core::WardenError;
use warden_manager::supervisor::Supervisor;
use warden_manager::{http, startup};

fn main() {
    let exit_code = match run() {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "manager terminated");
            1
        }
    };
    std::process::exit(exit_code);
}

#[tokio::main]
async fn run() -> Result<(), WardenError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("WARDEN_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = warden_config::load_config()
        .map_err(|e| WardenError::Config(format!("failed to load config: {e}")))?;
    validate_for_manager(&config)?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    info!("manager starting, waiting for data-plane");
    let bots = startup::wait_for_dataplane(&config.manager, &config.dataplane.base_url, &cancel)
        .await?;

    let (event_tx, event_rx) = mpsc::channel(256);
    tokio::spawn(http::serve(config.manager.port, event_tx.clone()));

    let supervisor = Supervisor::new(
        config.manager.clone(),
        config.dataplane.base_url.clone(),
        event_tx,
        cancel.clone(),
    );
    supervisor.run(event_rx, bots).await;

    info!("manager stopped");
    Ok(())
}

/// SIGINT/SIGTERM/SIGUSR1/SIGUSR2 all trigger the same orderly teardown.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        let mut sigusr1 = match signal(SignalKind::user_defined1()) {
            Ok(sig) => sig,
            Err(e) => {
                error!(error = %e, "failed to install SIGUSR1 handler");
                return;
            }
        };
        let mut sigusr2 = match signal(SignalKind::user_defined2()) {
            Ok(sig) => sig,
            Err(e) => {
                error!(error = %e, "failed to install SIGUSR2 handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigusr1.recv() => info!("received SIGUSR1, shutting down"),
            _ = sigusr2.recv() => info!("received SIGUSR2, shutting down"),
        }
        cancel.cancel();
    });
}
