// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client for the upstream admin HTTP API (message retraction and mutes).
//!
//! Moderation actions run over HTTP, not the XMPP session. The retract
//! endpoint has a known quirk: the upstream returns HTTP 500 on success.
//! That quirk is isolated here and nowhere else.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use tracing::{debug, warn};
use warden_core::WardenError;

/// Request timeout for admin-API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the upstream admin API, authenticated as one bot.
#[derive(Debug, Clone)]
pub struct AdminApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
    /// Wait before retracting, avoiding the upstream's message-commit race.
    commit_delay: Duration,
}

impl AdminApi {
    /// Creates a client with the bot's current access credential.
    pub fn new(
        base_url: &str,
        token: &str,
        commit_delay: Duration,
    ) -> Result<Self, WardenError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WardenError::Http {
                message: format!("failed to build admin http client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            commit_delay,
        })
    }

    /// Deletes (retracts) a message.
    ///
    /// The upstream commits messages asynchronously; retracting immediately
    /// races the commit, so the call waits `commit_delay` first. For this
    /// one endpoint the upstream signals success with HTTP 500 as well as
    /// 2xx; both are treated as success.
    pub async fn delete_message(
        &self,
        message_id: &str,
        author_jid: &str,
        muc_jid: &str,
    ) -> Result<(), WardenError> {
        tokio::time::sleep(self.commit_delay).await;

        let url = format!("{}/messages/retract/{message_id}", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .query(&[("from", author_jid), ("muc", muc_jid)])
            .send()
            .await
            .map_err(|e| WardenError::Http {
                message: format!("retract request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if status.is_success() || status == StatusCode::INTERNAL_SERVER_ERROR {
            debug!(message_id, status = %status, "message retracted");
            return Ok(());
        }
        self.log_admin_failure("retract", status);
        Ok(())
    }

    /// Mutes a member of a club until the given instant.
    pub async fn mute(
        &self,
        club_id: &str,
        user_guid: &str,
        until: DateTime<Utc>,
    ) -> Result<(), WardenError> {
        let url = format!("{}/club/{club_id}/member/{user_guid}:mute", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "until": until.to_rfc3339() }))
            .send()
            .await
            .map_err(|e| WardenError::Http {
                message: format!("mute request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(club_id, user_guid, %until, "member muted");
            return Ok(());
        }
        self.log_admin_failure("mute", status);
        Ok(())
    }

    /// 403 is "insufficient permissions" and expected when a bot is not an
    /// admin of a club; everything else is logged as an upstream failure.
    /// Either way the violating message counts as handled.
    fn log_admin_failure(&self, action: &str, status: StatusCode) {
        if status == StatusCode::FORBIDDEN {
            warn!(action, "admin api denied the action: insufficient permissions");
        } else {
            warn!(action, status = %status, "admin api call failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> AdminApi {
        AdminApi::new(&server.uri(), "token", Duration::from_millis(0)).unwrap()
    }

    #[tokio::test]
    async fn retract_treats_500_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/retract/m1"))
            .and(query_param("from", "room@muc.x/u1"))
            .and(query_param("muc", "room@muc.x"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        api(&server)
            .delete_message("m1", "room@muc.x/u1", "room@muc.x")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retract_403_is_nonfatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        api(&server)
            .delete_message("m1", "a", "b")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mute_posts_iso_until() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/club/club-1/member/u1:mute"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let until = Utc::now() + chrono::Duration::seconds(60);
        api(&server).mute("club-1", "u1", until).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body["until"].as_str().unwrap().starts_with(&until.format("%Y-%m-%dT").to_string()));
    }

    #[tokio::test]
    async fn mute_500_is_logged_not_propagated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let until = Utc::now();
        api(&server).mute("c", "u", until).await.unwrap();
    }
}
