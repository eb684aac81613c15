// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Best-effort Discord webhook notification.
//!
//! Notifications never block or fail the moderation pipeline: the POST runs
//! on a detached task and errors are logged.

use std::time::Duration;

use tracing::{debug, warn};
use warden_core::WardenError;

/// Request timeout for webhook posts.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Fire-and-forget webhook client, shared by all entities of a worker.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Result<Self, WardenError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WardenError::Http {
                message: format!("failed to build webhook http client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self { http })
    }

    /// Posts `{"content": …}` to the webhook on a detached task.
    pub fn fire(&self, url: String, content: String) {
        let http = self.http.clone();
        tokio::spawn(async move {
            let result = http
                .post(&url)
                .json(&serde_json::json!({ "content": content }))
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {
                    debug!("webhook notification delivered");
                }
                Ok(response) => {
                    warn!(status = %response.status(), "webhook notification rejected");
                }
                Err(e) => {
                    warn!(error = %e, "webhook notification failed");
                }
            }
        });
    }

    /// Builds the notification content for a violation.
    pub fn violation_content(
        custom_message: Option<&str>,
        entity_name: &str,
        author_guid: &str,
        word: &str,
    ) -> String {
        match custom_message {
            Some(msg) if !msg.trim().is_empty() => format!(
                "{msg}\nroom: {entity_name} | user: {author_guid} | word: {word}"
            ),
            _ => format!(
                "Banned word detected in {entity_name}: user {author_guid} used \"{word}\""
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fire_posts_content_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({ "content": "hit" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new().unwrap();
        notifier.fire(server.uri(), "hit".into());

        // Detached task; give it a moment to deliver.
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[test]
    fn violation_content_prefers_custom_message() {
        let content =
            WebhookNotifier::violation_content(Some("Alert!"), "Lobby", "u1", "badword");
        assert!(content.starts_with("Alert!"));
        assert!(content.contains("badword"));

        let fallback = WebhookNotifier::violation_content(None, "Lobby", "u1", "badword");
        assert!(fallback.contains("Lobby"));
        assert!(fallback.contains("u1"));
    }
}
