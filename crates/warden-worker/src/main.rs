// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Worker entry point.
//!
//! Reads the bot id from `WARDEN_BOT_ID`, binds the control surface on the
//! derived port, spawns the process watchdog, and runs the actor until
//! shutdown. Exits nonzero on unrecoverable conditions so the manager's
//! backoff policy governs the restart.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use warden_config::validation::validate_for_worker;
use warden_core::WardenError;
use warden_worker::actor::WorkerActor;
use warden_worker::control;
use warden_worker::watchdog::{PingClock, spawn_process_watchdog};
use warden_xmpp::WsConnector;

fn main() {
    let exit_code = match run() {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "worker terminated");
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

    let bot_id: i64 = std::env::var("WARDEN_BOT_ID")
        .map_err(|_| WardenError::Config("WARDEN_BOT_ID must be set".into()))?
        .parse()
        .map_err(|_| WardenError::Config("WARDEN_BOT_ID must be an integer".into()))?;

    let config = warden_config::load_config()
        .map_err(|e| WardenError::Config(format!("failed to load config: {e}")))?;
    validate_for_worker(&config)?;

    info!(bot_id, "worker starting");

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    // A bot identity runs as exactly one worker; a bound port means another
    // worker is alive and this one must not start.
    let listener = control::bind(bot_id).await?;
    let (event_tx, event_rx) = mpsc::channel(64);
    tokio::spawn(control::serve(listener, event_tx));

    let ping_clock = PingClock::new();
    spawn_process_watchdog(
        ping_clock.clone(),
        Duration::from_secs(config.worker.process_watchdog_secs),
        Duration::from_secs(config.worker.process_silence_secs),
        cancel.clone(),
    );

    let actor = WorkerActor::new(
        bot_id,
        &config,
        Arc::new(WsConnector),
        event_rx,
        cancel.clone(),
        ping_clock,
    )?;
    let result = actor.run().await;
    cancel.cancel();
    result
}

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
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, draining"),
            _ = sigterm.recv() => info!("received SIGTERM, draining"),
        }
        cancel.cancel();
    });
}
