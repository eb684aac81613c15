// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fan-out notifications to worker control surfaces.
//!
//! Workers listen on `127.0.0.1:(4000 + bot_id)`. Delivery is best-effort:
//! an unreachable worker reconciles on its next poll, so the caller reports
//! 202 instead of failing.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};
use warden_core::{WardenError, jid};

/// Request timeout for worker notifications.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for worker control surfaces.
#[derive(Debug, Clone)]
pub struct WorkerNotifier {
    http: reqwest::Client,
}

impl WorkerNotifier {
    pub fn new() -> Result<Self, WardenError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WardenError::Http {
                message: format!("failed to build fanout http client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self { http })
    }

    /// POSTs to one worker's control surface. Returns whether the worker
    /// acknowledged; unreachable workers are reported, not errors.
    pub async fn notify(&self, bot_id: i64, path: &str, body: Option<Value>) -> bool {
        let port = match jid::worker_port(bot_id) {
            Ok(port) => port,
            Err(e) => {
                warn!(bot_id, error = %e, "cannot derive worker port");
                return false;
            }
        };
        let url = format!("http://127.0.0.1:{port}{path}");
        let request = match body {
            Some(body) => self.http.post(&url).json(&body),
            None => self.http.post(&url),
        };
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(bot_id, path, "worker notified");
                true
            }
            Ok(response) => {
                warn!(bot_id, path, status = %response.status(), "worker rejected notification");
                false
            }
            Err(e) => {
                warn!(bot_id, path, error = %e, "worker unreachable");
                false
            }
        }
    }

    /// Best-effort preset-refresh broadcast to every active worker.
    pub async fn broadcast_preset_refresh(&self, bot_ids: &[i64], preset_id: i64) {
        for &bot_id in bot_ids {
            self.notify(bot_id, &format!("/refresh-preset/{preset_id}"), None)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_worker_reports_false() {
        let notifier = WorkerNotifier::new().unwrap();
        // Nothing listens on the derived port for bot id 59999 - 4000 = ...
        // Use a bot id whose port is almost certainly closed.
        assert!(!notifier.notify(59_999 - 4_000, "/update/e1", None).await);
    }

    #[tokio::test]
    async fn invalid_port_reports_false() {
        let notifier = WorkerNotifier::new().unwrap();
        assert!(!notifier.notify(i64::MAX, "/update/e1", None).await);
    }
}
