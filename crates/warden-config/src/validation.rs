// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Startup validation for the pieces of config each binary actually needs.

use warden_core::WardenError;

use crate::model::WardenConfig;

/// Validates the fields the worker needs before opening a session.
pub fn validate_for_worker(cfg: &WardenConfig) -> Result<(), WardenError> {
    let upstream = &cfg.upstream;
    for (name, value) in [
        ("upstream.ws_url", &upstream.ws_url),
        ("upstream.auth_url", &upstream.auth_url),
        ("upstream.chat_admin_url", &upstream.chat_admin_url),
        ("upstream.domain", &upstream.domain),
        ("upstream.muc_domain", &upstream.muc_domain),
        ("upstream.supergroup_domain", &upstream.supergroup_domain),
    ] {
        if value.trim().is_empty() {
            return Err(WardenError::Config(format!("{name} must be set")));
        }
    }
    if cfg.worker.queue_tick_ms == 0 {
        return Err(WardenError::Config("worker.queue_tick_ms must be nonzero".into()));
    }
    if cfg.worker.circuit_limit == 0 {
        return Err(WardenError::Config("worker.circuit_limit must be nonzero".into()));
    }
    Ok(())
}

/// Validates the fields the data-plane needs before serving.
pub fn validate_for_dataplane(cfg: &WardenConfig) -> Result<(), WardenError> {
    if cfg.database.user.trim().is_empty() {
        return Err(WardenError::Config("database.user must be set".into()));
    }
    for (name, value) in [
        ("upstream.oauth_client_id", &cfg.upstream.oauth_client_id),
        ("upstream.oauth_client_secret", &cfg.upstream.oauth_client_secret),
        ("upstream.oauth_token_url", &cfg.upstream.oauth_token_url),
    ] {
        if value.trim().is_empty() {
            return Err(WardenError::Config(format!("{name} must be set")));
        }
    }
    Ok(())
}

/// Validates the fields the manager needs before supervising.
pub fn validate_for_manager(cfg: &WardenConfig) -> Result<(), WardenError> {
    if cfg.manager.worker_binary.trim().is_empty() {
        return Err(WardenError::Config("manager.worker_binary must be set".into()));
    }
    if cfg.manager.restart_initial_secs == 0 {
        return Err(WardenError::Config(
            "manager.restart_initial_secs must be nonzero".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_config_from_str;

    fn full_upstream() -> &'static str {
        r#"
        [upstream]
        ws_url = "wss://chat.example.com/ws"
        auth_url = "https://api.example.com/auth/v1"
        chat_admin_url = "https://chat-admin.example.com/v1"
        domain = "chat.example.com"
        muc_domain = "conference.chat.example.com"
        supergroup_domain = "supergroup.chat.example.com"
        oauth_client_id = "cid"
        oauth_client_secret = "csecret"
        oauth_token_url = "https://api.example.com/oauth/token"
        "#
    }

    #[test]
    fn worker_validation_requires_upstream() {
        let empty = load_config_from_str("").unwrap();
        assert!(validate_for_worker(&empty).is_err());

        let full = load_config_from_str(full_upstream()).unwrap();
        assert!(validate_for_worker(&full).is_ok());
    }

    #[test]
    fn worker_validation_rejects_zero_tick() {
        let mut cfg = load_config_from_str(full_upstream()).unwrap();
        cfg.worker.queue_tick_ms = 0;
        assert!(validate_for_worker(&cfg).is_err());
    }

    #[test]
    fn dataplane_validation_requires_oauth() {
        let empty = load_config_from_str("").unwrap();
        assert!(validate_for_dataplane(&empty).is_err());

        let full = load_config_from_str(full_upstream()).unwrap();
        assert!(validate_for_dataplane(&full).is_ok());
    }

    #[test]
    fn manager_validation_defaults_pass() {
        let cfg = load_config_from_str("").unwrap();
        assert!(validate_for_manager(&cfg).is_ok());
    }
}
