//! Test helpers

use std::sync::Arc;

use conduit_protocol::{decode, encode, Envelope};
use parking_lot::Mutex;

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::error::TransportError;
use crate::transport::Transport;

/// Transport that records every envelope it is asked to send.
#[derive(Clone, Default)]
pub(crate) struct RecordingTransport {
    sent: Arc<Mutex<Vec<Envelope>>>,
    failure: Arc<Mutex<Option<TransportError>>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn fail_with(&self, error: Option<TransportError>) {
        *self.failure.lock() = error;
    }

    /// Yield to spawned tasks until at least `count` envelopes were sent.
    pub async fn wait_for(&self, count: usize) -> Vec<Envelope> {
        for _ in 0..10_000 {
            if self.len() >= count {
                return self.sent();
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {count} sent envelopes, got {}", self.len());
    }
}

impl Transport for RecordingTransport {
    fn send(&self, payload: String) -> Result<(), TransportError> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        let envelope = decode(&payload).expect("bridge sent a malformed envelope");
        self.sent.lock().push(envelope);
        Ok(())
    }
}

pub(crate) fn bridge_with(config: BridgeConfig) -> (Bridge, RecordingTransport) {
    let transport = RecordingTransport::default();
    (Bridge::new(config, transport.clone()), transport)
}

/// Feed an envelope to the bridge the way a transport adapter would.
pub(crate) fn deliver(bridge: &Bridge, envelope: &Envelope) {
    bridge.receive(&encode(envelope).unwrap());
}

/// Yield until `condition` holds.
pub(crate) async fn until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
