// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Health watchdogs.
//!
//! The reception watchdog runs inside the actor loop and restarts the
//! session on prolonged server-ping silence. The process watchdog here runs
//! as an independent task and exits the whole process on even longer
//! silence. It is the only way a stuck worker is killed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Reception watchdog predicate: has the session gone silent?
pub fn reception_stale(last_server_ping: Instant, now: Instant, silence: Duration) -> bool {
    now.duration_since(last_server_ping) > silence
}

/// Shared last-server-ping clock, epoch seconds. Updated by the actor,
/// read by the process watchdog task.
#[derive(Debug, Clone)]
pub struct PingClock {
    last_ping_epoch: Arc<AtomicU64>,
}

impl PingClock {
    pub fn new() -> Self {
        let clock = Self {
            last_ping_epoch: Arc::new(AtomicU64::new(0)),
        };
        clock.touch();
        clock
    }

    /// Records an inbound server ping now.
    pub fn touch(&self) {
        self.last_ping_epoch
            .store(now_epoch(), Ordering::Relaxed);
    }

    /// Seconds since the last inbound server ping.
    pub fn silence_secs(&self) -> u64 {
        now_epoch().saturating_sub(self.last_ping_epoch.load(Ordering::Relaxed))
    }
}

impl Default for PingClock {
    fn default() -> Self {
        Self::new()
    }
}

fn now_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Spawns the process watchdog: checks every `interval` and exits the
/// process when the ping silence exceeds `silence`.
pub fn spawn_process_watchdog(
    clock: PingClock,
    interval: Duration,
    silence: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.reset();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let silent = clock.silence_secs();
                    if silent > silence.as_secs() {
                        error!(silent_secs = silent, "process watchdog tripped, exiting");
                        std::process::exit(2);
                    }
                }
            }
        }
    })
}
