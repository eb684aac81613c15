// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The chatwarden manager: supervises one worker process per active bot.
//!
//! Children that exit are restarted with exponential backoff capped at one
//! hour; a periodic recovery sweep forgives bots whose failures have gone
//! stale. A small HTTP surface exposes fleet health and explicit restarts.

pub mod http;
pub mod startup;
pub mod supervisor;

pub use supervisor::{Supervisor, SupervisorEvent};
