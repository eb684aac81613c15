// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted transport for worker tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use warden_core::WardenError;
use warden_xmpp::transport::{Connector, Transport};

/// Shared handle to a [`MockTransport`], kept by the test to inject frames
/// and inspect what the worker sent.
#[derive(Clone, Default)]
pub struct TransportHandle {
    inbound: Arc<Mutex<VecDeque<String>>>,
    sent: Arc<Mutex<Vec<String>>>,
    notify: Arc<Notify>,
    ended: Arc<AtomicBool>,
}

impl TransportHandle {
    /// Queues an inbound frame for the worker to receive.
    pub async fn inject(&self, frame: impl Into<String>) {
        self.inbound.lock().await.push_back(frame.into());
        self.notify.notify_one();
    }

    /// Ends the inbound stream: after the queue drains, `recv` returns `None`.
    pub fn end_stream(&self) {
        self.ended.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Everything the worker sent so far.
    pub async fn sent(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }

    /// Frames sent after the session handshake (open, auth, open, bind,
    /// presence occupy the first five slots).
    pub async fn sent_after_handshake(&self) -> Vec<String> {
        self.sent.lock().await.iter().skip(5).cloned().collect()
    }

    /// Clears the sent capture.
    pub async fn clear_sent(&self) {
        self.sent.lock().await.clear();
    }
}

/// A scripted [`Transport`].
pub struct MockTransport {
    handle: TransportHandle,
}

impl MockTransport {
    pub fn new() -> (Self, TransportHandle) {
        let handle = TransportHandle::default();
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: &str) -> Result<(), WardenError> {
        if self.handle.ended.load(Ordering::SeqCst) {
            return Err(WardenError::TransportLost {
                message: "mock transport ended".into(),
                source: None,
            });
        }
        self.handle.sent.lock().await.push(frame.to_string());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, WardenError> {
        loop {
            if let Some(frame) = self.handle.inbound.lock().await.pop_front() {
                return Ok(Some(frame));
            }
            if self.handle.ended.load(Ordering::SeqCst) {
                return Ok(None);
            }
            self.handle.notify.notified().await;
        }
    }

    async fn close(&mut self) {
        self.handle.ended.store(true, Ordering::SeqCst);
    }
}

/// The inbound frames completing a successful session handshake for the
/// given bound JID. Preload these before handing the transport to a worker.
pub fn handshake_frames(bound_jid: &str) -> Vec<String> {
    vec![
        "<open xmlns='urn:ietf:params:xml:ns:xmpp-framing' from='chat.example.com'/>".to_string(),
        "<stream:features><mechanisms><mechanism>PLAIN</mechanism></mechanisms></stream:features>"
            .to_string(),
        "<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>".to_string(),
        "<open xmlns='urn:ietf:params:xml:ns:xmpp-framing' from='chat.example.com'/>".to_string(),
        "<stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></stream:features>"
            .to_string(),
        format!(
            "<iq type='result' id='bind-1'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
             <jid>{bound_jid}</jid></bind></iq>"
        ),
    ]
}

/// One scripted connection outcome.
pub enum ConnectOutcome {
    /// Hand out a transport (its handle was given to the test beforehand).
    Transport(MockTransport),
    /// Fail the connect.
    Fail,
}

/// Connector yielding scripted outcomes in order; connects past the script
/// fail. Counts connect attempts for circuit-breaker assertions.
#[derive(Clone)]
pub struct MockConnector {
    outcomes: Arc<Mutex<VecDeque<ConnectOutcome>>>,
    attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(VecDeque::new())),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Scripts a successful connection; returns the transport handle and
    /// preloads the session handshake.
    pub async fn push_session(&self, bound_jid: &str) -> TransportHandle {
        let (transport, handle) = MockTransport::new();
        for frame in handshake_frames(bound_jid) {
            handle.inject(frame).await;
        }
        self.outcomes
            .lock()
            .await
            .push_back(ConnectOutcome::Transport(transport));
        handle
    }

    /// Scripts a failed connection attempt.
    pub async fn push_failure(&self) {
        self.outcomes.lock().await.push_back(ConnectOutcome::Fail);
    }

    /// Connect attempts made so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>, WardenError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.lock().await.pop_front() {
            Some(ConnectOutcome::Transport(transport)) => Ok(Box::new(transport)),
            Some(ConnectOutcome::Fail) | None => Err(WardenError::TransportLost {
                message: "scripted connect failure".into(),
                source: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_frames_round_trip() {
        let (mut transport, handle) = MockTransport::new();
        handle.inject("<presence/>").await;
        assert_eq!(transport.recv().await.unwrap().as_deref(), Some("<presence/>"));

        transport.send("<iq/>").await.unwrap();
        assert_eq!(handle.sent().await, vec!["<iq/>"]);
    }

    #[tokio::test]
    async fn ended_stream_returns_none() {
        let (mut transport, handle) = MockTransport::new();
        handle.inject("last").await;
        handle.end_stream();
        assert!(transport.recv().await.unwrap().is_some());
        assert!(transport.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn connector_counts_attempts() {
        let connector = MockConnector::new();
        connector.push_failure().await;
        assert!(connector.connect("wss://x").await.is_err());
        assert!(connector.connect("wss://x").await.is_err(), "past script fails");
        assert_eq!(connector.attempts(), 2);
    }
}
