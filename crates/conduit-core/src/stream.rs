//! Multiplexed stream channels
//!
//! Each open stream is an unbounded channel keyed by its stream id. Removing
//! the sender is what terminates a stream: once it is gone, later events for
//! that id find nothing to deliver to.

use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use conduit_protocol::{codes, Envelope, StreamEvent};
use futures_util::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::bridge::WeakBridge;
use crate::error::BridgeError;
use crate::Result;

type StreamSender = mpsc::UnboundedSender<Result<Value>>;

#[derive(Default)]
pub(crate) struct StreamManager {
    subscriptions: HashMap<String, StreamSender>,
}

impl StreamManager {
    pub fn register(&mut self, stream_id: String) -> mpsc::UnboundedReceiver<Result<Value>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions.insert(stream_id, tx);
        rx
    }

    /// Route one inbound `stream` envelope to its subscription.
    pub fn dispatch(&mut self, envelope: Envelope) {
        let Some(stream_id) = envelope.stream_id.as_deref() else {
            tracing::warn!(id = %envelope.id, "Dropping stream envelope without streamId");
            return;
        };

        let Some(tx) = self.subscriptions.get(stream_id) else {
            tracing::debug!(stream_id = %stream_id, "Ignoring event for unknown stream");
            return;
        };

        match envelope.stream_event {
            Some(StreamEvent::Data) => {
                let data = envelope.result.unwrap_or(Value::Null);
                if tx.send(Ok(data)).is_err() {
                    // Controller dropped without cancelling
                    self.subscriptions.remove(stream_id);
                }
            }
            Some(StreamEvent::End) => {
                tracing::debug!(stream_id = %stream_id, "Stream ended");
                self.subscriptions.remove(stream_id);
            }
            Some(StreamEvent::Error) => {
                let error = envelope.error.map(BridgeError::from).unwrap_or_else(|| {
                    BridgeError::Remote {
                        code: codes::STREAM_ERROR,
                        message: "stream error".to_string(),
                        data: None,
                    }
                });
                tracing::debug!(stream_id = %stream_id, error = %error, "Stream failed");
                let _ = tx.send(Err(error));
                self.subscriptions.remove(stream_id);
            }
            None => {
                tracing::warn!(stream_id = %stream_id, "Dropping stream envelope without streamEvent");
            }
        }
    }

    pub fn remove(&mut self, stream_id: &str) -> bool {
        self.subscriptions.remove(stream_id).is_some()
    }

    /// Terminate one stream with `error`.
    pub fn fail(&mut self, stream_id: &str, error: BridgeError) -> bool {
        match self.subscriptions.remove(stream_id) {
            Some(tx) => {
                let _ = tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Terminate every stream with `error`.
    pub fn fail_all(&mut self, error: &BridgeError) {
        for (_, tx) in self.subscriptions.drain() {
            let _ = tx.send(Err(error.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }
}

/// Client end of a stream opened with `Bridge::stream`.
///
/// Yields `Ok(data)` for every data event in arrival order. An error event
/// yields one `Err` and then the stream is over; an end event simply ends
/// it. Dropping an active controller cancels the stream.
pub struct StreamController {
    stream_id: String,
    rx: mpsc::UnboundedReceiver<Result<Value>>,
    bridge: WeakBridge,
    finished: bool,
}

impl StreamController {
    pub(crate) fn new(
        stream_id: String,
        rx: mpsc::UnboundedReceiver<Result<Value>>,
        bridge: WeakBridge,
    ) -> Self {
        Self {
            stream_id,
            rx,
            bridge,
            finished: false,
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Wait for the next item; `None` once the stream is over.
    pub async fn recv(&mut self) -> Option<Result<Value>> {
        if self.finished {
            return None;
        }
        let item = self.rx.recv().await;
        self.observe(&item);
        item
    }

    /// Stop local delivery now and ask the native side to stop producing.
    pub fn cancel(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.rx.close();

        if let Some(bridge) = self.bridge.upgrade() {
            bridge.cancel_stream(&self.stream_id);
        }
    }

    fn observe(&mut self, item: &Option<Result<Value>>) {
        if matches!(item, None | Some(Err(_))) {
            self.finished = true;
        }
    }
}

impl Stream for StreamController {
    type Item = Result<Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(item) => {
                this.observe(&item);
                Poll::Ready(item)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for StreamController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamController")
            .field("stream_id", &self.stream_id)
            .field("finished", &self.finished)
            .finish()
    }
}
