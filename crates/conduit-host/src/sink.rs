//! Producer end of a native stream

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use conduit_protocol::Envelope;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::HostError;
use crate::host::NativeHost;
use crate::Result;

/// Handed to a stream handler to push items to the web side.
///
/// A sink closes once, through `end` or `error`, or when the web side
/// cancels. Every send after that returns `HostError::StreamClosed`.
#[derive(Clone)]
pub struct StreamSink {
    stream_id: String,
    host: NativeHost,
    cancelled: watch::Receiver<bool>,
    closed: Arc<AtomicBool>,
}

impl StreamSink {
    pub(crate) fn new(stream_id: String, host: NativeHost, cancelled: watch::Receiver<bool>) -> Self {
        Self {
            stream_id,
            host,
            cancelled,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.is_cancelled()
    }

    /// Resolves once the web side cancels or the stream is otherwise over.
    pub async fn cancelled(&self) {
        let mut rx = self.cancelled.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    pub fn data(&self, value: Value) -> Result<()> {
        if self.is_closed() {
            return Err(HostError::StreamClosed(self.stream_id.clone()));
        }
        self.host.send(&Envelope::stream_data(
            self.host.next_id(),
            self.stream_id.as_str(),
            value,
        ))
    }

    pub fn end(&self) -> Result<()> {
        self.close()?;
        tracing::debug!(stream_id = %self.stream_id, "Stream ended");
        self.host
            .send(&Envelope::stream_end(self.host.next_id(), self.stream_id.as_str()))
    }

    pub fn error(&self, error: HostError) -> Result<()> {
        self.close()?;
        tracing::debug!(stream_id = %self.stream_id, error = %error, "Stream failed");
        self.host.send(&Envelope::stream_error(
            self.host.next_id(),
            self.stream_id.as_str(),
            Some(error.to_payload()),
        ))
    }

    fn close(&self) -> Result<()> {
        if self.is_cancelled() || self.closed.swap(true, Ordering::SeqCst) {
            return Err(HostError::StreamClosed(self.stream_id.clone()));
        }
        self.host.forget_stream(&self.stream_id);
        Ok(())
    }
}

impl std::fmt::Debug for StreamSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSink")
            .field("stream_id", &self.stream_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
