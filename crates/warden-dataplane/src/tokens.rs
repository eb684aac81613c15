// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Upstream OAuth refresh flow with a per-bot throttle.
//!
//! A non-forced config read refreshes only when the last refresh is at least
//! 30 minutes old; a forced read (a worker that just saw `not-authorized`)
//! only when it is at least 60 seconds old. Concurrent requests for the same
//! bot are serialized so a refresh window admits one upstream call.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use tracing::{info, warn};
use warden_config::model::{TokenConfig, UpstreamConfig};
use warden_core::{BotConfig, WardenError};

use crate::store::{self, BotRow};

/// Request timeout for the OAuth token endpoint.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct OauthTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Decides whether a refresh is due, given the throttle configuration.
pub fn should_refresh(
    last_refresh: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    force: bool,
    tokens: &TokenConfig,
) -> bool {
    let min_interval = if force {
        chrono::Duration::seconds(tokens.forced_min_interval_secs as i64)
    } else {
        chrono::Duration::seconds(tokens.refresh_min_interval_secs as i64)
    };
    match last_refresh {
        None => true,
        Some(last) => now - last >= min_interval,
    }
}

/// Per-bot token refresh service.
pub struct TokenService {
    http: reqwest::Client,
    upstream: UpstreamConfig,
    tokens: TokenConfig,
    /// Per-bot locks serializing check-and-refresh.
    locks: DashMap<i64, Arc<tokio::sync::Mutex<()>>>,
}

impl TokenService {
    pub fn new(upstream: UpstreamConfig, tokens: TokenConfig) -> Result<Self, WardenError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WardenError::Http {
                message: format!("failed to build oauth http client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            http,
            upstream,
            tokens,
            locks: DashMap::new(),
        })
    }

    /// Returns the bot config, refreshing the access credential when the
    /// throttle allows. A failed refresh falls back to the stored credential
    /// when one exists.
    pub async fn bot_config(
        &self,
        pool: &sqlx::PgPool,
        bot_id: i64,
        force: bool,
    ) -> Result<Option<BotConfig>, WardenError> {
        let lock = self
            .locks
            .entry(bot_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let Some(bot) = store::bot_row(pool, bot_id).await? else {
            return Ok(None);
        };

        let mut access_token = bot.access_token.clone();
        if should_refresh(bot.last_refresh, Utc::now(), force, &self.tokens) {
            match self.refresh(&bot).await {
                Ok(fresh) => {
                    store::update_bot_tokens(
                        pool,
                        bot_id,
                        &fresh.access_token,
                        fresh.refresh_token.as_deref(),
                        Utc::now(),
                    )
                    .await?;
                    info!(bot_id, forced = force, "upstream credential refreshed");
                    access_token = Some(fresh.access_token);
                }
                Err(e) if access_token.is_some() => {
                    warn!(bot_id, error = %e, "refresh failed, serving stored credential");
                }
                Err(e) => return Err(e),
            }
        }

        let bot_token = access_token.ok_or_else(|| WardenError::Http {
            message: format!("bot {bot_id} has no usable access credential"),
            source: None,
        })?;
        Ok(Some(BotConfig {
            bot_guid: bot.account_guid,
            bot_token,
            nickname: bot.nickname,
        }))
    }

    async fn refresh(&self, bot: &BotRow) -> Result<OauthTokenResponse, WardenError> {
        let response = self
            .http
            .post(&self.upstream.oauth_token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", bot.refresh_token.as_str()),
                ("client_id", self.upstream.oauth_client_id.as_str()),
                ("client_secret", self.upstream.oauth_client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| WardenError::Http {
                message: format!("oauth refresh request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WardenError::Http {
                message: format!("oauth refresh returned {status}"),
                source: None,
            });
        }
        response
            .json::<OauthTokenResponse>()
            .await
            .map_err(|e| WardenError::Http {
                message: format!("oauth refresh body malformed: {e}"),
                source: Some(Box::new(e)),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> TokenConfig {
        TokenConfig {
            refresh_min_interval_secs: 1800,
            forced_min_interval_secs: 60,
        }
    }

    #[test]
    fn never_refreshed_bot_refreshes() {
        let now = Utc::now();
        assert!(should_refresh(None, now, false, &tokens()));
        assert!(should_refresh(None, now, true, &tokens()));
    }

    #[test]
    fn nonforced_respects_thirty_minutes() {
        let now = Utc::now();
        let recent = now - chrono::Duration::minutes(10);
        let stale = now - chrono::Duration::minutes(31);
        assert!(!should_refresh(Some(recent), now, false, &tokens()));
        assert!(should_refresh(Some(stale), now, false, &tokens()));
    }

    #[test]
    fn forced_respects_sixty_seconds() {
        let now = Utc::now();
        let just_now = now - chrono::Duration::seconds(5);
        let a_while = now - chrono::Duration::seconds(61);
        assert!(!should_refresh(Some(just_now), now, true, &tokens()));
        assert!(should_refresh(Some(a_while), now, true, &tokens()));
    }

    #[test]
    fn two_nonforced_reads_in_window_refresh_once() {
        // Simulates the sequence: first read refreshes and stamps
        // last_refresh; the second read inside the window must not.
        let now = Utc::now();
        let cfg = tokens();
        assert!(should_refresh(None, now, false, &cfg));
        let stamped = Some(now);
        let second_read = now + chrono::Duration::minutes(5);
        assert!(!should_refresh(stamped, second_read, false, &cfg));
    }

    #[test]
    fn two_forced_reads_in_window_refresh_once() {
        let now = Utc::now();
        let cfg = tokens();
        assert!(should_refresh(Some(now - chrono::Duration::minutes(5)), now, true, &cfg));
        let stamped = Some(now);
        let second_read = now + chrono::Duration::seconds(30);
        assert!(!should_refresh(stamped, second_read, true, &cfg));
    }
}
