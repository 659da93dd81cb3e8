//! Native host dispatcher
//!
//! Decodes inbound envelopes and routes them:
//! - `request` runs the registered handler and answers with a `response`
//! - `request` carrying a `streamId` feeds a stream handler through a
//!   [`StreamSink`]
//! - `_batch` runs every sub-call and answers with one slot per call
//! - `event` reaches event handlers, except `_stream.cancel`
//!
//! Registration and cancellation happen inline in `handle`, so they keep
//! the arrival order. Handler bodies run on spawned tasks.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use conduit_core::{BatchCall, Transport};
use conduit_protocol::{decode, encode, Envelope, EnvelopeKind, BATCH_METHOD, STREAM_CANCEL_METHOD};
use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;

use crate::error::HostError;
use crate::sink::StreamSink;
use crate::Result;

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
type StreamHandler = Arc<dyn Fn(Value, StreamSink) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Deserialize)]
struct BatchParams {
    requests: Vec<BatchCall>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelParams {
    stream_id: String,
}

struct HostInner {
    transport: Box<dyn Transport>,
    handlers: RwLock<HashMap<String, Handler>>,
    stream_handlers: RwLock<HashMap<String, StreamHandler>>,
    event_handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
    /// Open streams and their cancellation signal
    streams: RwLock<HashMap<String, watch::Sender<bool>>>,
    next_id: AtomicU64,
}

/// Method registry for the native side of one bridge.
#[derive(Clone)]
pub struct NativeHost {
    inner: Arc<HostInner>,
}

impl NativeHost {
    pub fn new(transport: impl Transport) -> Self {
        Self {
            inner: Arc::new(HostInner {
                transport: Box::new(transport),
                handlers: RwLock::new(HashMap::new()),
                stream_handlers: RwLock::new(HashMap::new()),
                event_handlers: RwLock::new(HashMap::new()),
                streams: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a request handler. A later registration for the same
    /// method replaces the earlier one.
    pub fn register<F, Fut>(&self, method: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |params| handler(params).boxed());
        self.inner
            .handlers
            .write()
            .insert(method.to_string(), handler);
        tracing::debug!(method = %method, "Registered handler");
    }

    /// Register a stream handler.
    ///
    /// Returning `Ok` ends the stream and returning `Err` fails it, unless
    /// the handler already closed the sink or the web side cancelled.
    pub fn register_stream<F, Fut>(&self, method: &str, handler: F)
    where
        F: Fn(Value, StreamSink) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: StreamHandler = Arc::new(move |params, sink| handler(params, sink).boxed());
        self.inner
            .stream_handlers
            .write()
            .insert(method.to_string(), handler);
        tracing::debug!(method = %method, "Registered stream handler");
    }

    /// Listen for notifications sent by the web side.
    pub fn on<F>(&self, event: &str, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner
            .event_handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Push an event to the web side.
    pub fn emit(&self, event: &str, payload: Value) -> Result<()> {
        self.send(&Envelope::event(self.next_id(), event, payload))
    }

    /// Decode and route one inbound payload. Must be called within a Tokio
    /// runtime. Malformed payloads are dropped.
    pub fn handle(&self, payload: &str) {
        if let Some(envelope) = decode(payload) {
            self.handle_envelope(envelope);
        }
    }

    pub fn handle_envelope(&self, envelope: Envelope) {
        match envelope.kind {
            EnvelopeKind::Request if envelope.stream_id.is_some() => self.open_stream(envelope),
            EnvelopeKind::Request => self.respond(envelope),
            EnvelopeKind::Event => self.dispatch_event(envelope),
            EnvelopeKind::Response | EnvelopeKind::Stream => {
                tracing::debug!(
                    id = %envelope.id,
                    kind = %envelope.kind,
                    "Ignoring envelope addressed to the web side"
                );
            }
        }
    }

    pub fn open_streams(&self) -> usize {
        self.inner.streams.read().len()
    }

    fn respond(&self, envelope: Envelope) {
        let host = self.clone();
        tokio::spawn(async move {
            let id = envelope.id;
            let method = envelope.method.unwrap_or_default();
            let params = envelope.params.unwrap_or(Value::Null);

            let reply = match host.call(&method, params).await {
                Ok(result) => Envelope::response_ok(id, result),
                Err(e) => {
                    tracing::debug!(request_id = %id, method = %method, error = %e, "Handler failed");
                    Envelope::response_err(id, e.to_payload())
                }
            };

            if let Err(e) = host.send(&reply) {
                tracing::warn!(method = %method, error = %e, "Response not delivered");
            }
        });
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        if method == BATCH_METHOD {
            self.run_batch(params).await
        } else {
            self.invoke(method, params).await
        }
    }

    fn invoke(&self, method: &str, params: Value) -> BoxFuture<'static, Result<Value>> {
        let handler = self.inner.handlers.read().get(method).cloned();
        match handler {
            Some(handler) => handler(params),
            None => {
                tracing::debug!(method = %method, "No handler registered");
                future::ready(Err(HostError::MethodNotFound(method.to_string()))).boxed()
            }
        }
    }

    /// Sub-calls run concurrently; slots keep the request order.
    async fn run_batch(&self, params: Value) -> Result<Value> {
        let batch: BatchParams = serde_json::from_value(params)?;
        let calls: Vec<_> = batch
            .requests
            .into_iter()
            .map(|call| self.invoke(&call.method, call.params))
            .collect();

        let slots: Vec<Value> = future::join_all(calls)
            .await
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| match outcome {
                Ok(result) => json!({ "index": index, "result": result }),
                Err(e) => json!({ "index": index, "error": e.to_payload() }),
            })
            .collect();

        tracing::debug!(size = slots.len(), "Answered batch");
        Ok(Value::Array(slots))
    }

    fn open_stream(&self, envelope: Envelope) {
        let Some(stream_id) = envelope.stream_id else {
            return;
        };
        let method = envelope.method.unwrap_or_default();
        let params = envelope.params.unwrap_or(Value::Null);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.inner
            .streams
            .write()
            .insert(stream_id.clone(), cancel_tx);
        let sink = StreamSink::new(stream_id.clone(), self.clone(), cancel_rx);

        let handler = self.inner.stream_handlers.read().get(&method).cloned();
        let Some(handler) = handler else {
            tracing::debug!(stream_id = %stream_id, method = %method, "No stream handler registered");
            if let Err(e) = sink.error(HostError::MethodNotFound(method)) {
                tracing::warn!(stream_id = %stream_id, error = %e, "Stream error not delivered");
            }
            return;
        };

        tracing::debug!(stream_id = %stream_id, method = %method, "Opened stream");
        let running = handler(params, sink.clone());
        tokio::spawn(async move {
            let outcome = running.await;
            if sink.is_closed() {
                return;
            }
            let closed = match outcome {
                Ok(()) => sink.end(),
                Err(e) => sink.error(e),
            };
            if let Err(e) = closed {
                tracing::warn!(stream_id = %sink.stream_id(), error = %e, "Stream close not delivered");
            }
        });
    }

    fn dispatch_event(&self, envelope: Envelope) {
        let Some(name) = envelope.method else {
            tracing::warn!(id = %envelope.id, "Dropping event without a name");
            return;
        };
        let params = envelope.params.unwrap_or(Value::Null);

        if name == STREAM_CANCEL_METHOD {
            match serde_json::from_value::<CancelParams>(params) {
                Ok(cancel) => self.cancel_stream(&cancel.stream_id),
                Err(e) => tracing::warn!(error = %e, "Malformed stream cancel"),
            }
            return;
        }

        let handlers = self
            .inner
            .event_handlers
            .read()
            .get(&name)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            tracing::debug!(event = %name, "No listener for event");
        }
        for handler in handlers {
            handler(&params);
        }
    }

    fn cancel_stream(&self, stream_id: &str) {
        let signal = self.inner.streams.write().remove(stream_id);
        match signal {
            Some(tx) => {
                let _ = tx.send(true);
                tracing::debug!(stream_id = %stream_id, "Stream cancelled by web side");
            }
            None => tracing::debug!(stream_id = %stream_id, "Cancel for unknown stream"),
        }
    }

    pub(crate) fn forget_stream(&self, stream_id: &str) {
        self.inner.streams.write().remove(stream_id);
    }

    pub(crate) fn next_id(&self) -> String {
        format!("n{}", self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn send(&self, envelope: &Envelope) -> Result<()> {
        let payload = encode(envelope)?;
        self.inner.transport.send(payload).map_err(|e| {
            tracing::warn!(id = %envelope.id, error = %e, "Transport send failed");
            HostError::from(e)
        })
    }
}

impl std::fmt::Debug for NativeHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeHost")
            .field("handlers", &self.inner.handlers.read().len())
            .field("stream_handlers", &self.inner.stream_handlers.read().len())
            .field("open_streams", &self.open_streams())
            .finish()
    }
}
