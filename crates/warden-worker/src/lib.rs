// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The chatwarden worker: one process per active bot identity.
//!
//! The worker owns a single authenticated chat session, an outgoing stanza
//! queue, the set of joined rooms with their moderation state, and a small
//! HTTP control surface on a port derived from the bot id. All state lives
//! in one actor task ([`actor::WorkerActor`]); the control surface and the
//! watchdogs talk to it through typed events.

pub mod actor;
pub mod auth;
pub mod control;
pub mod dataplane;
pub mod pipeline;
pub mod queue;
pub mod reconnect;
pub mod state;
pub mod watchdog;

pub use actor::WorkerActor;
pub use control::ControlEvent;
