// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The worker actor: session lifecycle, inbound classification, room-set
//! reconciliation, and outgoing pacing.
//!
//! All worker state is owned by this one task. Sub-activities (control
//! surface, data-plane fan-out) communicate through [`ControlEvent`]s; the
//! session transport is taken out for the duration of each online phase.
//!
//! Lifecycle: credentials are fetched (startup-retry budget), the session is
//! established (reconnect budget with circuit breaker), then the online loop
//! runs until the transport drops, the reception watchdog fires, or shutdown
//! is requested.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_config::model::{UpstreamConfig, WardenConfig, WorkerConfig};
use warden_core::{BotConfig, EntityConfig, WardenError, jid};
use warden_moderation::{AdminApi, ModerationEngine, WebhookNotifier};
use warden_xmpp::session::{SessionParams, establish};
use warden_xmpp::stanza;
use warden_xmpp::transport::{Connector, Transport};
use warden_xmpp::Stanza;

use crate::auth::UpstreamAuth;
use crate::control::ControlEvent;
use crate::dataplane::DataPlaneClient;
use crate::queue::OutgoingQueue;
use crate::reconnect::ReconnectState;
use crate::state::WorkerState;
use crate::watchdog::{PingClock, reception_stale};

/// How an online phase ended.
enum OnlineExit {
    /// Shutdown was requested; drain and exit cleanly.
    Shutdown,
    /// The session was lost; back off and reconnect.
    Lost(WardenError),
}

/// Credentials assembled during the FetchingCreds phase.
struct SessionCreds {
    chat_token: String,
}

/// The per-bot worker actor. Constructed once, consumed by [`run`](Self::run).
pub struct WorkerActor {
    bot_id: i64,
    worker_cfg: WorkerConfig,
    upstream: UpstreamConfig,
    dataplane: DataPlaneClient,
    auth: UpstreamAuth,
    connector: Arc<dyn Connector>,
    pub(crate) engine: ModerationEngine,
    pub(crate) webhook: WebhookNotifier,
    pub(crate) admin: Option<AdminApi>,
    pub(crate) bot: Option<BotConfig>,
    pub(crate) state: WorkerState,
    pub(crate) queue: OutgoingQueue,
    reconnect: ReconnectState,
    last_server_ping: Instant,
    last_reception_warn: Option<Instant>,
    ping_clock: PingClock,
    online: bool,
    events: Option<mpsc::Receiver<ControlEvent>>,
    cancel: CancellationToken,
}

impl WorkerActor {
    pub fn new(
        bot_id: i64,
        config: &WardenConfig,
        connector: Arc<dyn Connector>,
        events: mpsc::Receiver<ControlEvent>,
        cancel: CancellationToken,
        ping_clock: PingClock,
    ) -> Result<Self, WardenError> {
        Ok(Self {
            bot_id,
            worker_cfg: config.worker.clone(),
            upstream: config.upstream.clone(),
            dataplane: DataPlaneClient::new(&config.dataplane.base_url)?,
            auth: UpstreamAuth::new(&config.upstream.auth_url)?,
            connector,
            engine: ModerationEngine::new(),
            webhook: WebhookNotifier::new()?,
            admin: None,
            bot: None,
            state: WorkerState::new(Duration::from_secs(config.worker.unassign_debounce_secs)),
            queue: OutgoingQueue::new(),
            reconnect: ReconnectState::new(&config.worker),
            last_server_ping: Instant::now(),
            last_reception_warn: None,
            ping_clock,
            online: false,
            events: Some(events),
            cancel,
        })
    }

    /// Runs the worker until shutdown (Ok) or an unrecoverable condition
    /// (Err, nonzero exit; the manager restarts the process).
    pub async fn run(mut self) -> Result<(), WardenError> {
        let mut events = self
            .events
            .take()
            .ok_or_else(|| WardenError::Internal("worker actor started twice".into()))?;

        loop {
            if self.cancel.is_cancelled() {
                info!(bot_id = self.bot_id, "shutdown requested, exiting");
                return Ok(());
            }

            // FetchingCreds
            let creds = match self.fetch_credentials().await {
                Ok(creds) => creds,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(bot_id = self.bot_id, error = %e, "credential fetch failed");
                    let delay = self.reconnect.record_startup_failure()?;
                    self.backoff_wait(delay, &mut events).await;
                    continue;
                }
            };

            // Connecting
            let mut transport = match self.open_session(&creds).await {
                Ok(transport) => transport,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    if matches!(e, WardenError::AuthExpired) {
                        self.reconnect.note_auth_expired();
                    }
                    warn!(bot_id = self.bot_id, error = %e, "session establishment failed");
                    let delay = self.reconnect.schedule()?;
                    self.backoff_wait(delay, &mut events).await;
                    continue;
                }
            };

            // Online
            self.reconnect.reset();
            self.online = true;
            info!(bot_id = self.bot_id, entities = self.state.rooms.len(), "session online");

            let exit = self.online_loop(&mut *transport, &mut events).await;
            self.online = false;
            transport.close().await;

            match exit {
                OnlineExit::Shutdown => {
                    info!(bot_id = self.bot_id, "session drained, exiting");
                    return Ok(());
                }
                OnlineExit::Lost(e) => {
                    if matches!(e, WardenError::AuthExpired) {
                        self.reconnect.note_auth_expired();
                    }
                    warn!(bot_id = self.bot_id, error = %e, "session lost");
                    let delay = self.reconnect.schedule()?;
                    self.backoff_wait(delay, &mut events).await;
                }
            }
        }
    }

    /// FetchingCreds: bot config (optionally forced) and the chat-session
    /// credential exchange.
    async fn fetch_credentials(&mut self) -> Result<SessionCreds, WardenError> {
        let force = self.reconnect.force_refresh();
        let bot = self.dataplane.bot_config(self.bot_id, force).await?;
        let chat_token = self.auth.chat_token(&bot.bot_token).await?;
        self.admin = Some(AdminApi::new(
            &self.upstream.chat_admin_url,
            &bot.bot_token,
            Duration::from_millis(self.worker_cfg.delete_commit_delay_ms),
        )?);
        self.bot = Some(bot);
        Ok(SessionCreds { chat_token })
    }

    /// Connecting: open the transport, run the handshake, queue the room
    /// joins for every entity currently in the map.
    async fn open_session(
        &mut self,
        creds: &SessionCreds,
    ) -> Result<Box<dyn Transport>, WardenError> {
        let bot = self
            .bot
            .as_ref()
            .ok_or_else(|| WardenError::Internal("connecting without credentials".into()))?;

        let mut transport = self.connector.connect(&self.upstream.ws_url).await?;
        let params = SessionParams {
            domain: self.upstream.domain.clone(),
            account_guid: bot.bot_guid.clone(),
            chat_token: creds.chat_token.clone(),
            resource: format!("wdn-{}", self.bot_id),
        };
        let bound = establish(&mut *transport, &params).await?;
        debug!(bot_id = self.bot_id, jid = %bound, "stream bound");

        self.last_server_ping = Instant::now();
        self.ping_clock.touch();

        // (Re)join every room we believe we own. The presence group must be
        // re-learned on every new session.
        let room_ids: Vec<String> = self.state.rooms.keys().cloned().collect();
        for id in room_ids {
            if let Some(room) = self.state.rooms.get_mut(&id) {
                room.presence_group = None;
                let muc = jid::muc_jid(&room.entity, &self.upstream.muc_domain);
                self.queue
                    .push(Some(&id), stanza::muclight_config_query(&new_stanza_id(), &muc));
            }
        }
        Ok(transport)
    }

    /// Online: serve frames, events, and tickers until the session ends.
    async fn online_loop(
        &mut self,
        transport: &mut dyn Transport,
        events: &mut mpsc::Receiver<ControlEvent>,
    ) -> OnlineExit {
        if let Err(e) = self.reconcile().await {
            warn!(error = %e, "initial reconciliation failed");
        }

        let mut queue_tick =
            tokio::time::interval(Duration::from_millis(self.worker_cfg.queue_tick_ms));
        let mut reconcile_tick =
            tokio::time::interval(Duration::from_secs(self.worker_cfg.reconcile_secs));
        let mut health_tick =
            tokio::time::interval(Duration::from_secs(self.worker_cfg.health_check_secs));
        let mut cleanup_tick =
            tokio::time::interval(Duration::from_secs(self.worker_cfg.memory_cleanup_secs));
        // An interval's first tick is immediate; skip it for the slow timers
        // (the initial reconcile just ran).
        reconcile_tick.reset();
        health_tick.reset();
        cleanup_tick.reset();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return OnlineExit::Shutdown,
                frame = transport.recv() => match frame {
                    Ok(Some(frame)) => {
                        if let Err(e) = self.handle_frame(transport, &frame).await {
                            return OnlineExit::Lost(e);
                        }
                    }
                    Ok(None) => {
                        return OnlineExit::Lost(WardenError::TransportLost {
                            message: "stream closed by peer".into(),
                            source: None,
                        });
                    }
                    Err(e) => return OnlineExit::Lost(e),
                },
                event = events.recv() => match event {
                    Some(ControlEvent::Exit) => {
                        self.cancel.cancel();
                        return OnlineExit::Shutdown;
                    }
                    Some(event) => self.handle_event(event).await,
                    None => return OnlineExit::Shutdown,
                },
                _ = queue_tick.tick() => {
                    if let Err(e) = self.flush_one(transport).await {
                        return OnlineExit::Lost(e);
                    }
                }
                _ = reconcile_tick.tick() => {
                    if let Err(e) = self.reconcile().await {
                        warn!(error = %e, "periodic reconciliation failed");
                    }
                }
                _ = health_tick.tick() => {
                    if self.reception_watchdog_fired() {
                        return OnlineExit::Lost(WardenError::TransportLost {
                            message: "reception watchdog: no server ping".into(),
                            source: None,
                        });
                    }
                }
                _ = cleanup_tick.tick() => self.state.cleanup(Instant::now()),
            }
        }
    }

    /// Backoff: sleep the scheduled delay while still serving control events.
    async fn backoff_wait(&mut self, delay: Duration, events: &mut mpsc::Receiver<ControlEvent>) {
        debug!(bot_id = self.bot_id, delay_secs = delay.as_secs(), "backing off");
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = &mut sleep => return,
                event = events.recv() => match event {
                    Some(ControlEvent::Exit) => {
                        self.cancel.cancel();
                        return;
                    }
                    Some(event) => self.handle_event(event).await,
                    None => return,
                },
            }
        }
    }

    /// Sends at most one queued stanza, dropping suppressed ones.
    async fn flush_one(&mut self, transport: &mut dyn Transport) -> Result<(), WardenError> {
        if let Some(stanza) = self.queue.pop_sendable(&self.state.non_existent) {
            if let Err(e) = transport.send(&stanza.payload).await {
                // The stanza is dropped, not retried; the dead session is
                // the caller's problem.
                warn!(error = %e, "outgoing send failed, dropping stanza");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Classifies and handles one inbound frame. Errors end the session.
    async fn handle_frame(
        &mut self,
        transport: &mut dyn Transport,
        frame: &str,
    ) -> Result<(), WardenError> {
        match Stanza::parse(frame) {
            Stanza::IqPing { id, from } => {
                self.last_server_ping = Instant::now();
                self.ping_clock.touch();
                transport.send(&stanza::ping_result(&id, &from)).await?;
            }
            Stanza::IqGet { id, from } => {
                transport
                    .send(&stanza::feature_not_implemented(&id, &from))
                    .await?;
            }
            Stanza::IqResult {
                from,
                presence_group: Some(group),
                ..
            } => self.handle_presence_group(&from, &group),
            Stanza::IqResult { .. } => {}
            Stanza::IqError {
                from,
                code: Some(404),
                ..
            } => self.handle_entity_gone(&from).await,
            Stanza::IqError { not_authorized, from, .. } => {
                if not_authorized {
                    return Err(WardenError::AuthExpired);
                }
                debug!(from = from.as_str(), "ignoring non-404 iq error");
            }
            Stanza::Groupchat {
                id,
                room,
                author_guid,
                author_jid,
                body,
                delayed,
            } => {
                // History replays are never moderated.
                if delayed {
                    return Ok(());
                }
                self.handle_groupchat(&id, &room, author_guid.as_deref(), &author_jid, &body)
                    .await;
            }
            Stanza::MemberAdded { room, member_guid } => {
                self.handle_member_added(&room, &member_guid);
            }
            Stanza::StreamError { kind } => {
                return Err(WardenError::TransportLost {
                    message: format!("stream error: {kind}"),
                    source: None,
                });
            }
            Stanza::StreamEnd => {
                return Err(WardenError::TransportLost {
                    message: "server closed the stream".into(),
                    source: None,
                });
            }
            Stanza::SaslFailure { not_authorized } => {
                return Err(if not_authorized {
                    WardenError::AuthExpired
                } else {
                    WardenError::TransportLost {
                        message: "unexpected sasl failure".into(),
                        source: None,
                    }
                });
            }
            Stanza::StreamOpen | Stanza::StreamFeatures { .. } | Stanza::SaslSuccess => {
                debug!("ignoring stray handshake frame");
            }
            Stanza::Other => debug!("ignoring unrecognized stanza"),
        }
        Ok(())
    }

    /// MUC-Light configuration reply: learn the presence group, subscribe.
    fn handle_presence_group(&mut self, from: &str, group: &str) {
        let bare = jid::bare_jid(from);
        let Some(entity_id) =
            self.state
                .room_by_jid(bare, &self.upstream.muc_domain, &self.upstream.supergroup_domain)
        else {
            debug!(from, "configuration reply for unknown room");
            return;
        };
        if let Some(room) = self.state.rooms.get_mut(&entity_id) {
            room.presence_group = Some(group.to_string());
        }
        debug!(entity_id = entity_id.as_str(), group, "presence group learned, subscribing");
        self.queue.push(
            Some(&entity_id),
            stanza::supergroup_subscribe(&new_stanza_id(), group, true),
        );
    }

    /// Upstream reported a room gone: drop it, suppress it, tell the
    /// data-plane.
    async fn handle_entity_gone(&mut self, from: &str) {
        let bare = jid::bare_jid(from);
        let Some(entity_id) =
            self.state
                .room_by_jid(bare, &self.upstream.muc_domain, &self.upstream.supergroup_domain)
        else {
            debug!(from, "404 for unknown room");
            return;
        };
        warn!(entity_id = entity_id.as_str(), "entity no longer exists upstream");
        self.engine.remove(&entity_id);
        self.state.remove_entity(&entity_id);
        self.state.non_existent.insert(entity_id.clone());
        if let Err(e) = self.dataplane.report_entity_inactive(&entity_id).await {
            warn!(entity_id = entity_id.as_str(), error = %e, "failed to report entity inactive");
        }
    }

    /// Welcome message for a newly added member.
    fn handle_member_added(&mut self, room: &str, member_guid: &str) {
        let Some(entity_id) =
            self.state
                .room_by_jid(room, &self.upstream.muc_domain, &self.upstream.supergroup_domain)
        else {
            return;
        };
        let Some(bot_guid) = self.bot.as_ref().map(|b| b.bot_guid.to_lowercase()) else {
            return;
        };
        if member_guid == bot_guid {
            return;
        }
        let Some(welcome) = self
            .state
            .rooms
            .get(&entity_id)
            .and_then(|r| r.entity.welcome_message.clone())
        else {
            return;
        };
        let to = format!("{member_guid}@{}", self.upstream.domain);
        debug!(entity_id = entity_id.as_str(), member_guid, "queueing welcome message");
        self.queue.push(
            Some(&entity_id),
            stanza::direct_message(&new_stanza_id(), &to, &welcome),
        );
    }

    /// Groupchat dispatch: suppression checks, then the pipeline.
    async fn handle_groupchat(
        &mut self,
        msg_id: &str,
        room: &str,
        author_guid: Option<&str>,
        author_jid: &str,
        body: &str,
    ) {
        let Some(entity_id) =
            self.state
                .room_by_jid(room, &self.upstream.muc_domain, &self.upstream.supergroup_domain)
        else {
            // Unknown or recently unassigned room; race messages land here.
            return;
        };
        if self.state.recently_unassigned(&entity_id, Instant::now()) {
            return;
        }
        let Some(author) = author_guid else {
            return;
        };
        let bot_guid = self
            .bot
            .as_ref()
            .map(|b| b.bot_guid.to_lowercase())
            .unwrap_or_default();
        if author == bot_guid {
            return;
        }
        self.run_pipeline(&entity_id, msg_id, author, author_jid, body)
            .await;
    }

    /// Applies one control event.
    pub(crate) async fn handle_event(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Assign {
                entity_id,
                data,
                ack,
            } => {
                if let Err(e) = self.apply_assign(&entity_id, data).await {
                    warn!(entity_id = entity_id.as_str(), error = %e, "assign failed");
                }
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            ControlEvent::Unassign { entity_id, ack } => {
                self.apply_unassign(&entity_id);
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            ControlEvent::Update { entity_id, ack } => {
                if let Err(e) = self.apply_update(&entity_id).await {
                    warn!(entity_id = entity_id.as_str(), error = %e, "update failed");
                }
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            ControlEvent::RefreshPreset { preset_id, ack } => {
                if let Err(e) = self.apply_preset_refresh(preset_id).await {
                    warn!(preset_id, error = %e, "preset refresh failed");
                }
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            ControlEvent::Diagnostics { reply } => {
                let _ = reply.send(self.diagnostics());
            }
            ControlEvent::Exit => self.cancel.cancel(),
        }
    }

    /// Assignment: clear suppression, install the entity, configure
    /// moderation, queue the room join.
    async fn apply_assign(
        &mut self,
        entity_id: &str,
        data: Option<EntityConfig>,
    ) -> Result<(), WardenError> {
        let entity = match data {
            Some(entity) => entity,
            None => self
                .dataplane
                .entity_data(entity_id)
                .await?
                .ok_or_else(|| WardenError::Http {
                    message: format!("entity {entity_id} not found on assign"),
                    source: None,
                })?,
        };
        self.state.clear_unassigned(entity_id);
        self.state.non_existent.remove(entity_id);
        let muc = jid::muc_jid(&entity, &self.upstream.muc_domain);
        self.state.insert_entity(entity);
        self.configure_moderation(entity_id).await;
        self.queue.push(
            Some(entity_id),
            stanza::muclight_config_query(&new_stanza_id(), &muc),
        );
        info!(entity_id, "entity assigned");
        Ok(())
    }

    /// Unassignment: release moderation, leave the supergroup, debounce.
    fn apply_unassign(&mut self, entity_id: &str) {
        self.engine.remove(entity_id);
        if let Some(room) = self.state.remove_entity(entity_id) {
            let group = room.presence_group.clone().unwrap_or_else(|| {
                jid::presence_group(&room.entity, &self.upstream.supergroup_domain)
            });
            self.queue.push(
                Some(entity_id),
                stanza::supergroup_subscribe(&new_stanza_id(), &group, false),
            );
            info!(entity_id, "entity unassigned");
        }
        self.state.mark_unassigned(entity_id, Instant::now());
    }

    /// Update: re-fetch entity data, overwrite in place, reconfigure
    /// moderation. No join stanza is issued.
    async fn apply_update(&mut self, entity_id: &str) -> Result<(), WardenError> {
        match self.dataplane.entity_data(entity_id).await? {
            Some(entity) => {
                self.state.update_entity(entity);
                self.configure_moderation(entity_id).await;
                debug!(entity_id, "entity configuration updated");
                Ok(())
            }
            None => {
                warn!(entity_id, "update for unknown entity ignored");
                Ok(())
            }
        }
    }

    /// Preset refresh: re-fetch and swap, invalidating compiled patterns.
    /// Presets nothing references are ignored.
    async fn apply_preset_refresh(&mut self, preset_id: i64) -> Result<(), WardenError> {
        if self.engine.needs_preset(preset_id) {
            debug!(preset_id, "refresh for uncached preset ignored");
            return Ok(());
        }
        match self.dataplane.preset(preset_id).await? {
            Some(preset) => {
                self.engine.refresh_preset(preset);
                info!(preset_id, "preset refreshed");
            }
            None => warn!(preset_id, "refreshed preset no longer exists"),
        }
        Ok(())
    }

    /// Fetches and installs an entity's moderation configuration.
    pub(crate) async fn configure_moderation(&mut self, entity_id: &str) {
        match self.dataplane.profanity_config(entity_id).await {
            Ok(Some(config)) => {
                let fetched = match config.preset_id {
                    Some(preset_id) if self.engine.needs_preset(preset_id) => {
                        match self.dataplane.preset(preset_id).await {
                            Ok(preset) => preset,
                            Err(e) => {
                                warn!(entity_id, preset_id, error = %e, "preset fetch failed");
                                None
                            }
                        }
                    }
                    _ => None,
                };
                self.engine.configure(entity_id, config, fetched);
            }
            Ok(None) => self.engine.remove(entity_id),
            Err(e) => warn!(entity_id, error = %e, "profanity config fetch failed"),
        }
    }

    /// Room-set reconciliation against the data-plane's authoritative set.
    pub(crate) async fn reconcile(&mut self) -> Result<(), WardenError> {
        let authoritative = self.dataplane.entities(self.bot_id).await?;
        let current = self.state.entity_ids();

        for (id, entity) in &authoritative {
            if current.contains(id) {
                // Kept: overwrite configuration in place, no stanza.
                self.state.update_entity(entity.clone());
            } else if let Err(e) = self.apply_assign(id, Some(entity.clone())).await {
                warn!(entity_id = id.as_str(), error = %e, "reconcile assign failed");
            }
        }
        for id in current {
            if !authoritative.contains_key(&id) {
                self.apply_unassign(&id);
            }
        }
        Ok(())
    }

    /// Reception watchdog check; warnings rate-limited to one per minute.
    fn reception_watchdog_fired(&mut self) -> bool {
        let silence = Duration::from_secs(self.worker_cfg.reception_silence_secs);
        if !reception_stale(self.last_server_ping, Instant::now(), silence) {
            return false;
        }
        let warn_due = self
            .last_reception_warn
            .is_none_or(|last| last.elapsed() >= Duration::from_secs(60));
        if warn_due {
            warn!(
                bot_id = self.bot_id,
                silence_secs = self.last_server_ping.elapsed().as_secs(),
                "no server ping received, restarting session"
            );
            self.last_reception_warn = Some(Instant::now());
        }
        true
    }

    /// Diagnostics for `GET /reconnection-state`.
    fn diagnostics(&self) -> serde_json::Value {
        json!({
            "bot_id": self.bot_id,
            "online": self.online,
            "entities": self.state.rooms.len(),
            "queue_len": self.queue.len(),
            "non_existent": self.state.non_existent.iter().collect::<Vec<_>>(),
            "reconnection": self.reconnect.diagnostics(),
        })
    }

    /// The bot's lowercased account guid, empty before the first
    /// credential fetch.
    pub(crate) fn bot_guid(&self) -> String {
        self.bot
            .as_ref()
            .map(|b| b.bot_guid.to_lowercase())
            .unwrap_or_default()
    }

    pub(crate) fn worker_cfg(&self) -> &WorkerConfig {
        &self.worker_cfg
    }

    pub(crate) fn upstream(&self) -> &UpstreamConfig {
        &self.upstream
    }
}

/// Fresh id for an outgoing stanza.
pub(crate) fn new_stanza_id() -> String {
    Uuid::new_v4().to_string()
}
