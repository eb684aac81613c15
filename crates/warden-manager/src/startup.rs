// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Startup ordering against the data-plane.
//!
//! The manager waits a short warm-up, then polls the data-plane's health and
//! active-bot roster on an interval until a bounded budget elapses. An
//! unreachable data-plane past the budget is fatal; an external supervisor
//! restarts the manager.

use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_config::model::ManagerConfig;
use warden_core::WardenError;

#[derive(Debug, Deserialize)]
struct BotIdEntry {
    bot_id: i64,
}

/// Waits for the data-plane and returns the active bot roster.
pub async fn wait_for_dataplane(
    cfg: &ManagerConfig,
    dataplane_base: &str,
    cancel: &CancellationToken,
) -> Result<Vec<i64>, WardenError> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| WardenError::Http {
            message: format!("failed to build startup http client: {e}"),
            source: Some(Box::new(e)),
        })?;

    tokio::time::sleep(Duration::from_secs(cfg.warmup_secs)).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(cfg.startup_budget_secs);
    loop {
        if cancel.is_cancelled() {
            return Err(WardenError::Fatal("shutdown during startup".into()));
        }
        match poll_once(&http, dataplane_base).await {
            Ok(bot_ids) => {
                info!(bots = bot_ids.len(), "data-plane reachable, roster loaded");
                return Ok(bot_ids);
            }
            Err(e) => warn!(error = %e, "data-plane not ready"),
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(WardenError::Fatal(
                "data-plane unreachable past the startup budget".into(),
            ));
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(WardenError::Fatal("shutdown during startup".into()));
            }
            _ = tokio::time::sleep(Duration::from_secs(cfg.startup_poll_secs)) => {}
        }
    }
}

async fn poll_once(http: &reqwest::Client, base: &str) -> Result<Vec<i64>, WardenError> {
    let unreachable = |e: reqwest::Error| WardenError::DataPlaneUnreachable {
        message: e.to_string(),
        source: Some(Box::new(e)),
    };

    let health = http
        .get(format!("{base}/health"))
        .send()
        .await
        .map_err(unreachable)?;
    if !health.status().is_success() {
        return Err(WardenError::DataPlaneUnreachable {
            message: format!("health returned {}", health.status()),
            source: None,
        });
    }

    let roster = http
        .get(format!("{base}/bots/active"))
        .send()
        .await
        .map_err(unreachable)?;
    if !roster.status().is_success() {
        return Err(WardenError::DataPlaneUnreachable {
            message: format!("bot roster returned {}", roster.status()),
            source: None,
        });
    }
    let entries: Vec<BotIdEntry> = roster.json().await.map_err(|e| WardenError::Http {
        message: format!("bot roster body malformed: {e}"),
        source: Some(Box::new(e)),
    })?;
    Ok(entries.into_iter().map(|e| e.bot_id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quick_cfg() -> ManagerConfig {
        ManagerConfig {
            warmup_secs: 0,
            startup_poll_secs: 1,
            startup_budget_secs: 2,
            ..ManagerConfig::default()
        }
    }

    #[tokio::test]
    async fn returns_roster_when_dataplane_is_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status":"ok"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bots/active"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"bot_id": 1}, {"bot_id": 4}
            ])))
            .mount(&server)
            .await;

        let bots = wait_for_dataplane(&quick_cfg(), &server.uri(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(bots, vec![1, 4]);
    }

    #[tokio::test]
    async fn gives_up_after_the_budget() {
        // Nothing listens here; the budget should expire.
        let result = wait_for_dataplane(
            &quick_cfg(),
            "http://127.0.0.1:9",
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(WardenError::Fatal(_))));
    }
}
