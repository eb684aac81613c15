// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed queries over the relational store.
//!
//! JSON blob columns (commands, timers, custom words) are parsed defensively
//! on the read path: malformed blobs degrade to empty defaults with a
//! warning instead of failing the request.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use warden_core::types::{commands_from_json, timers_from_json, words_from_json};
use warden_core::{EntityConfig, EntityType, Preset, ProfanityConfig, WardenError};

fn storage_err(e: sqlx::Error) -> WardenError {
    WardenError::Storage {
        source: Box::new(e),
    }
}

/// A bot row as the token service needs it.
#[derive(Debug, Clone)]
pub struct BotRow {
    pub id: i64,
    pub status: String,
    pub account_guid: String,
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub nickname: String,
}

/// Ordered ids of all active bots.
pub async fn active_bot_ids(pool: &PgPool) -> Result<Vec<i64>, WardenError> {
    let rows = sqlx::query("SELECT id FROM bots WHERE status = 'active' ORDER BY id")
        .fetch_all(pool)
        .await
        .map_err(storage_err)?;
    rows.iter()
        .map(|row| row.try_get::<i64, _>("id").map_err(storage_err))
        .collect()
}

/// One bot by id.
pub async fn bot_row(pool: &PgPool, bot_id: i64) -> Result<Option<BotRow>, WardenError> {
    let row = sqlx::query(
        "SELECT id, status, account_guid, refresh_token, access_token, last_refresh, nickname
         FROM bots WHERE id = $1",
    )
    .bind(bot_id)
    .fetch_optional(pool)
    .await
    .map_err(storage_err)?;
    row.map(|row| {
        Ok(BotRow {
            id: row.try_get("id").map_err(storage_err)?,
            status: row.try_get("status").map_err(storage_err)?,
            account_guid: row.try_get("account_guid").map_err(storage_err)?,
            refresh_token: row.try_get("refresh_token").map_err(storage_err)?,
            access_token: row.try_get("access_token").map_err(storage_err)?,
            last_refresh: row.try_get("last_refresh").map_err(storage_err)?,
            nickname: row.try_get("nickname").map_err(storage_err)?,
        })
    })
    .transpose()
}

/// Persists a refreshed credential pair and its timestamp.
pub async fn update_bot_tokens(
    pool: &PgPool,
    bot_id: i64,
    access_token: &str,
    refresh_token: Option<&str>,
    refreshed_at: DateTime<Utc>,
) -> Result<(), WardenError> {
    sqlx::query(
        "UPDATE bots
         SET access_token = $2,
             refresh_token = COALESCE($3, refresh_token),
             last_refresh = $4
         WHERE id = $1",
    )
    .bind(bot_id)
    .bind(access_token)
    .bind(refresh_token)
    .bind(refreshed_at)
    .execute(pool)
    .await
    .map_err(storage_err)?;
    Ok(())
}

fn entity_from_row(row: &PgRow) -> Result<EntityConfig, WardenError> {
    let entity_type: String = row.try_get("entity_type").map_err(storage_err)?;
    let entity_type = match entity_type.as_str() {
        "community" => EntityType::Community,
        "chat" => EntityType::Chat,
        "ihl" => EntityType::Ihl,
        other => {
            return Err(WardenError::ConfigMalformed {
                what: format!("entity_type {other}"),
            });
        }
    };
    let commands: String = row.try_get("commands").map_err(storage_err)?;
    let timers: String = row.try_get("timers").map_err(storage_err)?;
    Ok(EntityConfig {
        guid: row.try_get("guid").map_err(storage_err)?,
        name: row.try_get("name").map_err(storage_err)?,
        entity_type,
        parent_guid: row.try_get("parent_guid").map_err(storage_err)?,
        commands: commands_from_json(&commands),
        timers: timers_from_json(&timers),
        timer_counter_max: row
            .try_get::<i32, _>("timer_counter_max")
            .map_err(storage_err)?
            .max(0) as u32,
        read_only: row.try_get("read_only").map_err(storage_err)?,
        welcome_message: row.try_get("welcome_message").map_err(storage_err)?,
    })
}

const ENTITY_COLUMNS: &str = "guid, entity_type, parent_guid, name, commands, timers, \
                              timer_counter_max, read_only, welcome_message";

/// All active entities owned by a bot.
pub async fn active_entities_for_bot(
    pool: &PgPool,
    bot_id: i64,
) -> Result<Vec<EntityConfig>, WardenError> {
    let rows = sqlx::query(&format!(
        "SELECT {ENTITY_COLUMNS} FROM entities e
         JOIN bot_entity_relations r ON r.entity_guid = e.guid
         WHERE r.bot_id = $1 AND e.status = 'active'
         ORDER BY e.guid"
    ))
    .bind(bot_id)
    .fetch_all(pool)
    .await
    .map_err(storage_err)?;
    rows.iter().map(entity_from_row).collect()
}

/// One entity by guid, regardless of status.
pub async fn entity_by_guid(
    pool: &PgPool,
    guid: &str,
) -> Result<Option<EntityConfig>, WardenError> {
    let row = sqlx::query(&format!(
        "SELECT {ENTITY_COLUMNS} FROM entities WHERE guid = $1"
    ))
    .bind(guid)
    .fetch_optional(pool)
    .await
    .map_err(storage_err)?;
    row.as_ref().map(entity_from_row).transpose()
}

/// Updates an entity's status. Returns false when the entity does not exist.
pub async fn set_entity_status(
    pool: &PgPool,
    guid: &str,
    status: &str,
) -> Result<bool, WardenError> {
    let result = sqlx::query("UPDATE entities SET status = $2 WHERE guid = $1")
        .bind(guid)
        .bind(status)
        .execute(pool)
        .await
        .map_err(storage_err)?;
    Ok(result.rows_affected() > 0)
}

/// The bot owning an entity, if any.
pub async fn bot_for_entity(pool: &PgPool, guid: &str) -> Result<Option<i64>, WardenError> {
    let row = sqlx::query("SELECT bot_id FROM bot_entity_relations WHERE entity_guid = $1")
        .bind(guid)
        .fetch_optional(pool)
        .await
        .map_err(storage_err)?;
    row.map(|r| r.try_get("bot_id").map_err(storage_err))
        .transpose()
}

/// One active preset by id.
pub async fn preset_by_id(pool: &PgPool, preset_id: i64) -> Result<Option<Preset>, WardenError> {
    let row = sqlx::query(
        "SELECT id, name, language, words FROM presets WHERE id = $1 AND status = 'active'",
    )
    .bind(preset_id)
    .fetch_optional(pool)
    .await
    .map_err(storage_err)?;
    row.map(|row| {
        let words: String = row.try_get("words").map_err(storage_err)?;
        Ok(Preset {
            preset_id: row.try_get("id").map_err(storage_err)?,
            preset_name: row.try_get("name").map_err(storage_err)?,
            language: row.try_get("language").map_err(storage_err)?,
            words: words_from_json(&words),
        })
    })
    .transpose()
}

/// Profanity configuration for an entity, extended with manager exemptions.
pub async fn profanity_config(
    pool: &PgPool,
    entity_guid: &str,
) -> Result<Option<ProfanityConfig>, WardenError> {
    let row = sqlx::query(
        "SELECT preset_id, custom_words, webhook_url, webhook_message, chat_reply,
                mute_duration_seconds, active
         FROM profanity_configs WHERE entity_guid = $1",
    )
    .bind(entity_guid)
    .fetch_optional(pool)
    .await
    .map_err(storage_err)?;
    let Some(row) = row else {
        return Ok(None);
    };

    let custom_words: String = row.try_get("custom_words").map_err(storage_err)?;
    let mute: i64 = row.try_get("mute_duration_seconds").map_err(storage_err)?;
    let manager_guids = manager_guids(pool, entity_guid).await?;
    Ok(Some(ProfanityConfig {
        preset_id: row.try_get("preset_id").map_err(storage_err)?,
        custom_words: words_from_json(&custom_words),
        webhook_url: row.try_get("webhook_url").map_err(storage_err)?,
        webhook_message: row.try_get("webhook_message").map_err(storage_err)?,
        chat_reply: row.try_get("chat_reply").map_err(storage_err)?,
        mute_duration_seconds: mute.max(0) as u64,
        active: row.try_get("active").map_err(storage_err)?,
        manager_guids,
    }))
}

/// Exempt user guids for an entity.
pub async fn manager_guids(pool: &PgPool, entity_guid: &str) -> Result<Vec<String>, WardenError> {
    let rows = sqlx::query(
        "SELECT user_guid FROM entity_managers WHERE entity_guid = $1 ORDER BY user_guid",
    )
    .bind(entity_guid)
    .fetch_all(pool)
    .await
    .map_err(storage_err)?;
    rows.iter()
        .map(|r| r.try_get("user_guid").map_err(storage_err))
        .collect()
}
