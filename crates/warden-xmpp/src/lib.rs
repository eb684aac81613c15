// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The upstream chat dialect: stanza building, stanza reading, and the
//! WebSocket session.
//!
//! The upstream speaks XMPP over WebSocket framing (one stanza per text
//! frame). Only a handful of stanza shapes matter to the fleet, so this
//! crate implements a purpose-built writer and a tolerant reader for exactly
//! those shapes rather than a general XML stack. Unknown stanzas parse to
//! [`parse::Stanza::Other`] and are never an error.

pub mod parse;
pub mod session;
pub mod stanza;
pub mod transport;

pub use parse::Stanza;
pub use session::{SessionParams, establish};
pub use transport::{Connector, Transport, WsConnector, WsTransport};
