//! Transport abstraction
//!
//! The bridge depends on exactly one capability: hand an encoded envelope to
//! the native peer. The embedding host picks the concrete mechanism once and
//! passes it to `Bridge::new`; inbound traffic comes back through
//! `Bridge::receive`.

use tokio::sync::mpsc;

use crate::error::TransportError;

pub trait Transport: Send + Sync + 'static {
    /// Deliver one encoded envelope. Must not block.
    fn send(&self, payload: String) -> Result<(), TransportError>;
}

impl<F> Transport for F
where
    F: Fn(String) -> Result<(), TransportError> + Send + Sync + 'static,
{
    fn send(&self, payload: String) -> Result<(), TransportError> {
        self(payload)
    }
}

/// In-process channel transport, the generic fallback when no platform
/// message hook is available.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, payload: String) -> Result<(), TransportError> {
        self.tx.send(payload).map_err(|_| TransportError::Closed)
    }
}
