// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock transport and fixtures for deterministic chatwarden tests.
//!
//! [`MockTransport`] implements the worker's [`Transport`] seam with
//! injectable inbound frames and captured outbound frames. A
//! [`MockConnector`] scripts connection outcomes so reconnect behavior can
//! be driven without a network.

pub mod fixtures;
pub mod mock_transport;

pub use mock_transport::{MockConnector, MockTransport, TransportHandle, handshake_frames};
