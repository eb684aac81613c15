// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed client for the data-plane HTTP surface.
//!
//! Network failures map to [`WardenError::DataPlaneUnreachable`] so the
//! actor can tell "service down" from "row absent" (absent rows are `None`).

use std::collections::HashMap;
use std::time::Duration;

use warden_core::{BotConfig, EntityConfig, Preset, ProfanityConfig, WardenError};

/// Request timeout for data-plane calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Client for the data-plane from one worker.
#[derive(Debug, Clone)]
pub struct DataPlaneClient {
    http: reqwest::Client,
    base_url: String,
}

impl DataPlaneClient {
    pub fn new(base_url: &str) -> Result<Self, WardenError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WardenError::Http {
                message: format!("failed to build data-plane http client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn unreachable(e: reqwest::Error) -> WardenError {
        WardenError::DataPlaneUnreachable {
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }

    /// `GET /bots/:id/config[?force=1]`.
    pub async fn bot_config(&self, bot_id: i64, force: bool) -> Result<BotConfig, WardenError> {
        let mut url = format!("{}/bots/{bot_id}/config", self.base_url);
        if force {
            url.push_str("?force=1");
        }
        let response = self.http.get(&url).send().await.map_err(Self::unreachable)?;
        let status = response.status();
        if !status.is_success() {
            return Err(WardenError::Http {
                message: format!("bot config fetch returned {status}"),
                source: None,
            });
        }
        response.json().await.map_err(|e| WardenError::Http {
            message: format!("bot config body malformed: {e}"),
            source: Some(Box::new(e)),
        })
    }

    /// `GET /bots/:id/entities`: the authoritative active entity set.
    pub async fn entities(
        &self,
        bot_id: i64,
    ) -> Result<HashMap<String, EntityConfig>, WardenError> {
        let url = format!("{}/bots/{bot_id}/entities", self.base_url);
        let response = self.http.get(&url).send().await.map_err(Self::unreachable)?;
        let status = response.status();
        if !status.is_success() {
            return Err(WardenError::Http {
                message: format!("entity set fetch returned {status}"),
                source: None,
            });
        }
        response.json().await.map_err(|e| WardenError::Http {
            message: format!("entity set body malformed: {e}"),
            source: Some(Box::new(e)),
        })
    }

    /// `GET /entities/:id/data`; absent entities are `None`.
    pub async fn entity_data(&self, entity_id: &str) -> Result<Option<EntityConfig>, WardenError> {
        let url = format!("{}/entities/{entity_id}/data", self.base_url);
        self.get_optional(&url).await
    }

    /// `GET /profanity-filter-config/:entityId`; absent configs are `None`.
    pub async fn profanity_config(
        &self,
        entity_id: &str,
    ) -> Result<Option<ProfanityConfig>, WardenError> {
        let url = format!("{}/profanity-filter-config/{entity_id}", self.base_url);
        self.get_optional(&url).await
    }

    /// `GET /profanity-filter-presets/:id`; absent presets are `None`.
    pub async fn preset(&self, preset_id: i64) -> Result<Option<Preset>, WardenError> {
        let url = format!("{}/profanity-filter-presets/{preset_id}", self.base_url);
        self.get_optional(&url).await
    }

    /// `POST /entities/:id/status` marking an entity inactive after an
    /// upstream 404.
    pub async fn report_entity_inactive(&self, entity_id: &str) -> Result<(), WardenError> {
        let url = format!("{}/entities/{entity_id}/status", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "status": "inactive" }))
            .send()
            .await
            .map_err(Self::unreachable)?;
        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::ACCEPTED {
            return Err(WardenError::Http {
                message: format!("entity status update returned {status}"),
                source: None,
            });
        }
        Ok(())
    }

    async fn get_optional<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<T>, WardenError> {
        let response = self.http.get(url).send().await.map_err(Self::unreachable)?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(WardenError::Http {
                message: format!("data-plane returned {status} for {url}"),
                source: None,
            });
        }
        response
            .json()
            .await
            .map(Some)
            .map_err(|e| WardenError::Http {
                message: format!("data-plane body malformed: {e}"),
                source: Some(Box::new(e)),
            })
    }
}
