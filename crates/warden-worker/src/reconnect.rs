// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconnection backoff and the circuit breaker.
//!
//! Connection attempts double their delay up to a cap; at the circuit limit
//! the worker exits nonzero so the manager restarts it from a clean state.
//! Credential-fetch failures run on a separate startup-retry budget and do
//! not consume reconnection slots.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use warden_config::model::WorkerConfig;
use warden_core::WardenError;

/// Reconnection bookkeeping for one worker.
#[derive(Debug)]
pub struct ReconnectState {
    attempts: u32,
    startup_retries: u32,
    next_delay: Duration,
    startup_delay: Duration,
    last_attempt: Option<DateTime<Utc>>,
    force_refresh: bool,
    initial: Duration,
    cap: Duration,
    circuit_limit: u32,
    startup_limit: u32,
}

/// Read-only snapshot served by `GET /reconnection-state`.
#[derive(Debug, Clone, Serialize)]
pub struct ReconnectDiagnostics {
    pub attempts: u32,
    pub startup_retries: u32,
    pub next_delay_secs: u64,
    pub last_attempt: Option<String>,
    pub force_refresh: bool,
    pub circuit_limit: u32,
}

impl ReconnectState {
    pub fn new(cfg: &WorkerConfig) -> Self {
        let initial = Duration::from_secs(cfg.backoff_initial_secs);
        Self {
            attempts: 0,
            startup_retries: 0,
            next_delay: initial,
            startup_delay: initial,
            last_attempt: None,
            force_refresh: false,
            initial,
            cap: Duration::from_secs(cfg.backoff_cap_secs),
            circuit_limit: cfg.circuit_limit,
            startup_limit: cfg.startup_retry_limit,
        }
    }

    /// Records a failed connection attempt and returns the delay before the
    /// next one. Trips the circuit breaker at the attempt limit.
    pub fn schedule(&mut self) -> Result<Duration, WardenError> {
        self.attempts += 1;
        self.last_attempt = Some(Utc::now());
        if self.attempts >= self.circuit_limit {
            return Err(WardenError::Fatal(format!(
                "circuit breaker open after {} failed reconnects",
                self.attempts
            )));
        }
        let delay = self.next_delay;
        self.next_delay = (self.next_delay * 2).min(self.cap);
        Ok(delay)
    }

    /// Records a failed credential fetch and returns the delay before the
    /// next try. Exhausting the startup budget is fatal.
    pub fn record_startup_failure(&mut self) -> Result<Duration, WardenError> {
        self.startup_retries += 1;
        if self.startup_retries > self.startup_limit {
            return Err(WardenError::Fatal(format!(
                "startup budget exhausted after {} credential fetch failures",
                self.startup_retries
            )));
        }
        let delay = self.startup_delay;
        self.startup_delay = (self.startup_delay * 2).min(self.cap);
        Ok(delay)
    }

    /// A successful Online transition resets every counter and the
    /// force-refresh flag.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.startup_retries = 0;
        self.next_delay = self.initial;
        self.startup_delay = self.initial;
        self.force_refresh = false;
    }

    /// Marks the next credential fetch as forced (previous Offline was
    /// caused by `not-authorized`).
    pub fn note_auth_expired(&mut self) {
        self.force_refresh = true;
    }

    pub fn force_refresh(&self) -> bool {
        self.force_refresh
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn diagnostics(&self) -> ReconnectDiagnostics {
        ReconnectDiagnostics {
            attempts: self.attempts,
            startup_retries: self.startup_retries,
            next_delay_secs: self.next_delay.as_secs(),
            last_attempt: self.last_attempt.map(|t| t.to_rfc3339()),
            force_refresh: self.force_refresh,
            circuit_limit: self.circuit_limit,
        }
    }
}
