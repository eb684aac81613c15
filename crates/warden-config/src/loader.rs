// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered merging.
//!
//! Merge order (later overrides earlier): compiled defaults, `warden.toml`
//! in the working directory, `WARDEN_*` environment variables.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::WardenConfig;

/// Load configuration from `warden.toml` and `WARDEN_*` environment variables.
pub fn load_config() -> Result<WardenConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(WardenConfig::default()))
        .merge(Toml::file("warden.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only (tests and tooling).
pub fn load_config_from_str(toml_content: &str) -> Result<WardenConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(WardenConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Environment provider mapping `WARDEN_<SECTION>_<KEY>` to `<section>.<key>`.
///
/// Uses explicit `Env::map()` rather than `Env::split("_")`: key names contain
/// underscores (`WARDEN_WORKER_QUEUE_TICK_MS` must map to
/// `worker.queue_tick_ms`, not `worker.queue.tick.ms`).
fn env_provider() -> Env {
    Env::prefixed("WARDEN_").map(|key| {
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("database_", "database.", 1)
            .replacen("dataplane_", "dataplane.", 1)
            .replacen("manager_", "manager.", 1)
            .replacen("upstream_", "upstream.", 1)
            .replacen("worker_", "worker.", 1)
            .replacen("tokens_", "tokens.", 1);
        mapped.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overrides_defaults() {
        let cfg = load_config_from_str(
            r#"
            [worker]
            queue_tick_ms = 10
            circuit_limit = 3

            [upstream]
            ws_url = "wss://chat.example.com/ws"
            domain = "chat.example.com"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.worker.queue_tick_ms, 10);
        assert_eq!(cfg.worker.circuit_limit, 3);
        assert_eq!(cfg.upstream.ws_url, "wss://chat.example.com/ws");
        // Untouched sections keep their defaults.
        assert_eq!(cfg.dataplane.port, 3008);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = load_config_from_str(
            r#"
            [worker]
            not_a_knob = true
            "#,
        );
        assert!(result.is_err());
    }
}
