// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chat-session credential exchange against the upstream auth endpoint.

use std::time::Duration;

use serde::Deserialize;
use warden_core::WardenError;

/// Request timeout for the auth endpoint.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct ChatSessionResponse {
    #[serde(default)]
    token: Option<String>,
}

/// Client for the upstream auth endpoint.
#[derive(Debug, Clone)]
pub struct UpstreamAuth {
    http: reqwest::Client,
    auth_url: String,
}

impl UpstreamAuth {
    pub fn new(auth_url: &str) -> Result<Self, WardenError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WardenError::Http {
                message: format!("failed to build auth http client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            http,
            auth_url: auth_url.to_string(),
        })
    }

    /// Exchanges the access credential for a short-lived chat-session token.
    /// A missing token in the response fails the connection attempt.
    pub async fn chat_token(&self, access_token: &str) -> Result<String, WardenError> {
        let response = self
            .http
            .post(&self.auth_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| WardenError::Http {
                message: format!("chat session request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(WardenError::AuthExpired);
        }
        if !status.is_success() {
            return Err(WardenError::Http {
                message: format!("chat session endpoint returned {status}"),
                source: None,
            });
        }

        let body: ChatSessionResponse =
            response.json().await.map_err(|e| WardenError::Http {
                message: format!("chat session body malformed: {e}"),
                source: Some(Box::new(e)),
            })?;
        match body.token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(WardenError::Http {
                message: "chat session response carried no token".into(),
                source: None,
            }),
        }
    }
}
