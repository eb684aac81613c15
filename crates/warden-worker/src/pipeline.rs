// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The moderation pipeline: banned words, read-only mode, timer tick,
//! commands. Stages run in order and the first action taken ends the
//! pipeline for that message.

use chrono::Utc;
use tracing::{info, warn};
use warden_core::{EntityConfig, ProfanityConfig, jid};
use warden_moderation::{Review, Violation, WebhookNotifier};
use warden_xmpp::stanza;

use crate::actor::{WorkerActor, new_stanza_id};

impl WorkerActor {
    /// Runs all pipeline stages for one valid inbound groupchat message.
    /// Exemptions and the delay/own-message filters were already applied.
    pub(crate) async fn run_pipeline(
        &mut self,
        entity_id: &str,
        msg_id: &str,
        author_guid: &str,
        author_jid: &str,
        body: &str,
    ) {
        let Some(entity) = self.state.rooms.get(entity_id).map(|r| r.entity.clone()) else {
            return;
        };
        let bot_guid = self.bot_guid();

        // Stage A: banned words.
        let hit = match self.engine.review(entity_id, author_guid, &bot_guid) {
            Review::Check(entry) => entry
                .check(body)
                .map(|violation| (violation, entry.config().clone())),
            Review::Skip | Review::Exempt => None,
        };
        if let Some((violation, config)) = hit {
            self.act_on_violation(&entity, msg_id, author_guid, author_jid, &violation, &config)
                .await;
            return;
        }

        // Stage B: read-only mode.
        if entity.read_only && !self.engine.is_exempt(entity_id, author_guid, &bot_guid) {
            info!(entity_id, author_guid, "read-only room, removing message");
            let mute_secs = self.worker_cfg().readonly_mute_secs;
            self.delete_and_mute(&entity, msg_id, author_jid, author_guid, mute_secs)
                .await;
            return;
        }

        // Stage C: timer tick.
        if self.tick_timer(&entity) {
            return;
        }

        // Stage D: command lookup.
        self.try_command(&entity, body);
    }

    /// Stage-A actions: webhook, reply, delete, mute, each at most once.
    async fn act_on_violation(
        &mut self,
        entity: &EntityConfig,
        msg_id: &str,
        author_guid: &str,
        author_jid: &str,
        violation: &Violation,
        config: &ProfanityConfig,
    ) {
        info!(
            entity_id = entity.guid.as_str(),
            author_guid,
            word = violation.word.as_str(),
            "banned word detected"
        );

        if let Some(url) = config.webhook_url.as_deref()
            && !url.is_empty()
        {
            let content = WebhookNotifier::violation_content(
                config.webhook_message.as_deref(),
                &entity.name,
                author_guid,
                &violation.word,
            );
            self.webhook.fire(url.to_string(), content);
        }

        if let Some(reply) = config.chat_reply.as_deref()
            && !reply.trim().is_empty()
        {
            let muc = jid::muc_jid(entity, &self.upstream().muc_domain);
            self.queue.push(
                Some(&entity.guid),
                stanza::groupchat_message(&new_stanza_id(), &muc, reply, None),
            );
        }

        self.delete_and_mute(entity, msg_id, author_jid, author_guid, config.mute_duration_seconds)
            .await;
    }

    /// Deletes the offending message and mutes its author (`mute_secs` of 0
    /// skips the mute). Admin-API failures never fail the pipeline.
    async fn delete_and_mute(
        &mut self,
        entity: &EntityConfig,
        msg_id: &str,
        author_jid: &str,
        author_guid: &str,
        mute_secs: u64,
    ) {
        let Some(admin) = self.admin.clone() else {
            warn!("no admin credential available, moderation action skipped");
            return;
        };
        if !msg_id.is_empty() {
            let muc = jid::muc_jid(entity, &self.upstream().muc_domain);
            if let Err(e) = admin.delete_message(msg_id, author_jid, &muc).await {
                warn!(msg_id, error = %e, "message delete failed");
            }
        }
        if mute_secs > 0 {
            let until = Utc::now() + chrono::Duration::seconds(mute_secs as i64);
            if let Err(e) = admin.mute(jid::club_id(entity), author_guid, until).await {
                warn!(author_guid, error = %e, "mute failed");
            }
        }
    }

    /// Stage C: increments the room counter; on rollover advances the
    /// round-robin cursor and queues the pointed timer message.
    fn tick_timer(&mut self, entity: &EntityConfig) -> bool {
        let timers_len = entity.timers.len();
        let counters = self.state.counters.entry(entity.guid.clone()).or_default();
        counters.counter += 1;
        if counters.counter <= entity.timer_counter_max || timers_len == 0 {
            return false;
        }
        // Cursor advances before emission.
        counters.cursor = (counters.cursor + 1) % timers_len;
        counters.counter = 0;
        let cursor = counters.cursor;

        let timer = &entity.timers[cursor];
        let muc = jid::muc_jid(entity, &self.upstream().muc_domain);
        self.queue.push(
            Some(&entity.guid),
            stanza::groupchat_message(
                &new_stanza_id(),
                &muc,
                &timer.message,
                timer.attachment_id.as_deref(),
            ),
        );
        true
    }

    /// Stage D: `!trigger` command lookup.
    fn try_command(&mut self, entity: &EntityConfig, body: &str) {
        let Some(rest) = body.strip_prefix('!') else {
            return;
        };
        let trigger = rest.trim().to_lowercase();
        if trigger.is_empty() {
            return;
        }
        let Some(command) = entity.commands.get(&trigger) else {
            return;
        };
        let muc = jid::muc_jid(entity, &self.upstream().muc_domain);
        self.queue.push(
            Some(&entity.guid),
            stanza::groupchat_message(
                &new_stanza_id(),
                &muc,
                &command.response,
                command.attachment_id.as_deref(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use warden_core::BotConfig;
    use warden_moderation::AdminApi;
    use warden_test_utils::fixtures;
    use warden_xmpp::transport::WsConnector;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::control::ControlEvent;
    use crate::watchdog::PingClock;

    fn test_config() -> warden_config::WardenConfig {
        warden_config::load_config_from_str(
            r#"
            [upstream]
            ws_url = "wss://chat.example.com/ws"
            auth_url = "http://127.0.0.1:9/auth"
            chat_admin_url = "http://127.0.0.1:9/admin"
            domain = "chat.example.com"
            muc_domain = "muc.x"
            supergroup_domain = "sg.x"

            [worker]
            delete_commit_delay_ms = 0
            "#,
        )
        .unwrap()
    }

    fn actor() -> WorkerActor {
        let (_tx, rx) = mpsc::channel::<ControlEvent>(8);
        let mut actor = WorkerActor::new(
            7,
            &test_config(),
            Arc::new(WsConnector),
            rx,
            CancellationToken::new(),
            PingClock::new(),
        )
        .unwrap();
        actor.bot = Some(BotConfig {
            bot_guid: "bot-guid".into(),
            bot_token: "tok".into(),
            nickname: "warden".into(),
        });
        actor
    }

    fn queued(actor: &mut WorkerActor) -> Vec<String> {
        let mut out = Vec::new();
        let none = std::collections::HashSet::new();
        while let Some(s) = actor.queue.pop_sendable(&none) {
            out.push(s.payload);
        }
        out
    }

    #[tokio::test]
    async fn exempt_authors_are_never_moderated() {
        let mut a = actor();
        let mut entity = fixtures::community("e1");
        entity.read_only = true;
        a.state.insert_entity(entity);
        a.engine
            .configure("e1", fixtures::profanity(&["badword"], &["mgr-1"]), None);

        // Manager and the bot itself pass stages A and B untouched.
        a.run_pipeline("e1", "m1", "mgr-1", "room@muc.x/mgr-1", "badword").await;
        a.run_pipeline("e1", "m2", "bot-guid", "room@muc.x/bot-guid", "badword").await;
        assert!(queued(&mut a).is_empty());
    }

    #[tokio::test]
    async fn violation_emits_each_action_at_most_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/messages/retract/.*$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/club/.*:mute$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/hook$"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut a = actor();
        a.admin = Some(AdminApi::new(&server.uri(), "tok", Duration::from_millis(0)).unwrap());
        a.state.insert_entity(fixtures::community("e1"));
        let mut config = fixtures::profanity(&["badword"], &[]);
        config.webhook_url = Some(format!("{}/hook", server.uri()));
        config.chat_reply = Some("watch your language".into());
        a.engine.configure("e1", config, None);

        a.run_pipeline("e1", "m9", "u1", "room@muc.x/u1", "this is b a d w o r d indeed")
            .await;

        // Exactly one reply stanza was queued.
        let sent = queued(&mut a);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("watch your language"));

        // Give the detached webhook task time to deliver before the mock
        // server verifies expectations on drop.
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn read_only_deletes_and_mutes_briefly() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/messages/retract/.*$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/club/e2/member/u1:mute$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut a = actor();
        a.admin = Some(AdminApi::new(&server.uri(), "tok", Duration::from_millis(0)).unwrap());
        let mut entity = fixtures::community("e2");
        entity.read_only = true;
        a.state.insert_entity(entity);

        a.run_pipeline("e2", "m1", "u1", "room@muc.x/u1", "hi").await;
        assert!(queued(&mut a).is_empty(), "read-only mode sends no reply");
    }

    #[tokio::test]
    async fn timer_rotates_round_robin() {
        let mut a = actor();
        let entity = fixtures::with_timers(fixtures::community("e3"), &["T0", "T1", "T2"], 2);
        a.state.insert_entity(entity);

        // Three messages per emission: counter must exceed 2.
        for batch in [("T1", 3), ("T2", 3), ("T0", 3)] {
            for i in 0..batch.1 {
                a.run_pipeline("e3", &format!("m{i}"), "u1", "r/u1", "chatter").await;
            }
            let sent = queued(&mut a);
            assert_eq!(sent.len(), 1, "one timer per rollover");
            assert!(
                sent[0].contains(&format!("<body>{}</body>", batch.0)),
                "expected {} in {}",
                batch.0,
                sent[0]
            );
        }
    }

    #[tokio::test]
    async fn commands_answer_bang_triggers() {
        let mut a = actor();
        let entity = fixtures::with_command(fixtures::community("e4"), "Rules", "be nice");
        a.state.insert_entity(entity);

        a.run_pipeline("e4", "m1", "u1", "r/u1", "!RULES").await;
        let sent = queued(&mut a);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("<body>be nice</body>"));

        a.run_pipeline("e4", "m2", "u1", "r/u1", "!unknown").await;
        a.run_pipeline("e4", "m3", "u1", "r/u1", "no prefix").await;
        assert!(queued(&mut a).is_empty());
    }

    #[tokio::test]
    async fn first_action_short_circuits_later_stages() {
        let mut a = actor();
        let entity = fixtures::with_command(
            fixtures::with_timers(fixtures::community("e5"), &["T0"], 0),
            "badword",
            "never",
        );
        a.state.insert_entity(entity);
        a.engine.configure("e5", fixtures::profanity(&["badword"], &[]), None);

        // The message violates stage A and would also trigger the timer and
        // the command stage; only the violation acts. With no reply
        // configured and no admin client, nothing is queued at all.
        a.run_pipeline("e5", "m1", "u1", "r/u1", "!badword").await;
        assert!(queued(&mut a).is_empty());
        assert_eq!(a.state.counters["e5"].counter, 0, "timer stage never ran");
    }
}
