// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session establishment: stream open, SASL-PLAIN, stream restart, resource
//! bind, initial presence.
//!
//! The handshake is strict about outcomes but tolerant about interleaving:
//! unknown frames between the expected ones are skipped, up to a bounded
//! count, so upstream protocol additions do not break connects.

use std::time::Duration;

use tracing::debug;
use warden_core::WardenError;

use crate::parse::Stanza;
use crate::stanza;
use crate::transport::Transport;

/// Per-step wait before the handshake is abandoned.
const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Frames skipped per step before the handshake is considered off the rails.
const MAX_SKIPPED_FRAMES: usize = 16;

/// Everything needed to authenticate one bot session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// XMPP domain of the upstream.
    pub domain: String,
    /// Account guid the bot authenticates as.
    pub account_guid: String,
    /// Short-lived chat-session credential.
    pub chat_token: String,
    /// Resource to bind, derived from the bot id.
    pub resource: String,
}

/// Runs the full establishment handshake. On success the stream is bound and
/// the initial presence has been sent; returns the bound JID.
pub async fn establish(
    transport: &mut dyn Transport,
    params: &SessionParams,
) -> Result<String, WardenError> {
    transport.send(&stanza::open_stream(&params.domain)).await?;
    expect(transport, "stream open", |s| {
        matches!(s, Stanza::StreamOpen).then_some(())
    })
    .await?;
    expect(transport, "stream features", |s| {
        matches!(s, Stanza::StreamFeatures { .. }).then_some(())
    })
    .await?;

    let payload =
        stanza::sasl_plain_payload(&params.account_guid, &params.domain, &params.chat_token);
    transport.send(&stanza::sasl_auth(&payload)).await?;
    match next_meaningful(transport, "sasl outcome").await? {
        Stanza::SaslSuccess => {}
        Stanza::SaslFailure { not_authorized } => {
            return Err(if not_authorized {
                WardenError::AuthExpired
            } else {
                WardenError::TransportLost {
                    message: "sasl negotiation failed".into(),
                    source: None,
                }
            });
        }
        other => {
            return Err(WardenError::TransportLost {
                message: format!("unexpected sasl outcome: {other:?}"),
                source: None,
            });
        }
    }

    // Authenticated streams restart from the top.
    transport.send(&stanza::open_stream(&params.domain)).await?;
    expect(transport, "restarted stream open", |s| {
        matches!(s, Stanza::StreamOpen).then_some(())
    })
    .await?;
    expect(transport, "bind features", |s| {
        matches!(s, Stanza::StreamFeatures { .. }).then_some(())
    })
    .await?;

    transport.send(&stanza::bind("bind-1", &params.resource)).await?;
    let bound_jid = expect(transport, "bind result", |s| match s {
        Stanza::IqResult { jid: Some(jid), .. } => Some(jid),
        _ => None,
    })
    .await?;

    transport.send(&stanza::initial_presence()).await?;
    debug!(jid = %bound_jid, "session established");
    Ok(bound_jid)
}

/// Reads frames until `matcher` accepts one, skipping a bounded number of
/// unrelated frames.
async fn expect<T>(
    transport: &mut dyn Transport,
    step: &str,
    matcher: impl Fn(Stanza) -> Option<T>,
) -> Result<T, WardenError> {
    for _ in 0..MAX_SKIPPED_FRAMES {
        let parsed = next_meaningful(transport, step).await?;
        match matcher(parsed) {
            Some(value) => return Ok(value),
            None => debug!(step, "skipping unrelated frame during handshake"),
        }
    }
    Err(WardenError::TransportLost {
        message: format!("handshake stalled waiting for {step}"),
        source: None,
    })
}

/// Reads one parsed frame with the per-step timeout, surfacing stream-level
/// failures as errors.
async fn next_meaningful(
    transport: &mut dyn Transport,
    step: &str,
) -> Result<Stanza, WardenError> {
    let frame = tokio::time::timeout(STEP_TIMEOUT, transport.recv())
        .await
        .map_err(|_| WardenError::TransportLost {
            message: format!("timed out waiting for {step}"),
            source: None,
        })??
        .ok_or_else(|| WardenError::TransportLost {
            message: format!("stream closed waiting for {step}"),
            source: None,
        })?;
    match Stanza::parse(&frame) {
        Stanza::StreamError { kind } => Err(WardenError::TransportLost {
            message: format!("stream error during handshake: {kind}"),
            source: None,
        }),
        Stanza::StreamEnd => Err(WardenError::TransportLost {
            message: format!("stream closed waiting for {step}"),
            source: None,
        }),
        parsed => Ok(parsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Scripted transport for handshake tests.
    struct Script {
        inbound: VecDeque<String>,
        sent: Vec<String>,
    }

    impl Script {
        fn new(frames: &[&str]) -> Self {
            Self {
                inbound: frames.iter().map(|f| f.to_string()).collect(),
                sent: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Transport for Script {
        async fn send(&mut self, frame: &str) -> Result<(), WardenError> {
            self.sent.push(frame.to_string());
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<String>, WardenError> {
            Ok(self.inbound.pop_front())
        }

        async fn close(&mut self) {}
    }

    fn params() -> SessionParams {
        SessionParams {
            domain: "chat.example.com".into(),
            account_guid: "bot-guid".into(),
            chat_token: "tok".into(),
            resource: "wdn-3".into(),
        }
    }

    #[tokio::test]
    async fn happy_path_binds_and_sends_presence() {
        let mut script = Script::new(&[
            "<open xmlns='urn:ietf:params:xml:ns:xmpp-framing' from='chat.example.com'/>",
            "<stream:features><mechanisms><mechanism>PLAIN</mechanism></mechanisms></stream:features>",
            "<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>",
            "<open xmlns='urn:ietf:params:xml:ns:xmpp-framing' from='chat.example.com'/>",
            "<stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></stream:features>",
            "<iq type='result' id='bind-1'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
             <jid>bot-guid@chat.example.com/wdn-3</jid></bind></iq>",
        ]);

        let jid = establish(&mut script, &params()).await.unwrap();
        assert_eq!(jid, "bot-guid@chat.example.com/wdn-3");

        // open, auth, open, bind, presence
        assert_eq!(script.sent.len(), 5);
        assert!(script.sent[0].starts_with("<open"));
        assert!(script.sent[1].contains("mechanism='PLAIN'"));
        assert!(script.sent[2].starts_with("<open"));
        assert!(script.sent[3].contains("<resource>wdn-3</resource>"));
        assert_eq!(script.sent[4], "<presence/>");
    }

    #[tokio::test]
    async fn not_authorized_maps_to_auth_expired() {
        let mut script = Script::new(&[
            "<open xmlns='urn:ietf:params:xml:ns:xmpp-framing'/>",
            "<stream:features/>",
            "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><not-authorized/></failure>",
        ]);
        match establish(&mut script, &params()).await {
            Err(WardenError::AuthExpired) => {}
            other => panic!("expected AuthExpired, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_stream_is_transport_lost() {
        let mut script = Script::new(&["<open xmlns='urn:ietf:params:xml:ns:xmpp-framing'/>"]);
        match establish(&mut script, &params()).await {
            Err(WardenError::TransportLost { .. }) => {}
            other => panic!("expected TransportLost, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn system_shutdown_aborts_handshake() {
        let mut script = Script::new(&[
            "<open xmlns='urn:ietf:params:xml:ns:xmpp-framing'/>",
            "<stream:error><system-shutdown xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></stream:error>",
        ]);
        match establish(&mut script, &params()).await {
            Err(WardenError::TransportLost { message, .. }) => {
                assert!(message.contains("system-shutdown"));
            }
            other => panic!("expected TransportLost, got {other:?}"),
        }
    }
}
