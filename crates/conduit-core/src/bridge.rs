//! Bridge facade
//!
//! Composes the correlator, retry policy, offline queue, stream manager,
//! batch buffer and event listeners behind one cloneable handle. All state
//! lives behind a single lock that is never held across an await point, a
//! transport call or a user callback.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use conduit_protocol::{binary, decode, encode, Envelope, EnvelopeKind};
use conduit_protocol::{BATCH_METHOD, STREAM_CANCEL_METHOD};
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::batch::{self, BatchBuffer, BatchCall};
use crate::config::BridgeConfig;
use crate::correlator::{Correlator, Settlement};
use crate::error::{BridgeError, TransportError};
use crate::events::{EventBus, ListenerId};
use crate::queue::OfflineQueue;
use crate::retry::RetryPolicy;
use crate::stream::{StreamController, StreamManager};
use crate::transport::Transport;
use crate::{Result, CONNECTED_EVENT, DISCONNECTED_EVENT};

struct State {
    connected: bool,
    /// Reconnect in progress: the queue is being replayed
    draining: bool,
    destroyed: bool,
    pending: Correlator,
    queue: OfflineQueue,
    streams: StreamManager,
    batch: BatchBuffer,
    events: EventBus,
}

struct Inner {
    config: BridgeConfig,
    retry: RetryPolicy,
    transport: Box<dyn Transport>,
    state: Mutex<State>,
    next_id: AtomicU64,
}

/// Handle to one bridge instance. Clones share the same bridge.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

/// Non-owning handle held by background timers and stream controllers.
#[derive(Clone)]
pub(crate) struct WeakBridge(Weak<Inner>);

impl WeakBridge {
    pub fn upgrade(&self) -> Option<Bridge> {
        self.0.upgrade().map(|inner| Bridge { inner })
    }
}

/// Removes an unsettled request (and its queued envelope) when the
/// attempt that registered it finishes for any reason.
struct PendingGuard<'a> {
    bridge: &'a Bridge,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.bridge.inner.state.lock();
        if state.pending.remove(self.id) {
            state.queue.remove(self.id);
        }
    }
}

impl Bridge {
    pub fn new(config: BridgeConfig, transport: impl Transport) -> Self {
        let state = State {
            connected: true,
            draining: false,
            destroyed: false,
            pending: Correlator::default(),
            queue: OfflineQueue::new(config.queue_size),
            streams: StreamManager::default(),
            batch: BatchBuffer::default(),
            events: EventBus::default(),
        };

        Self {
            inner: Arc::new(Inner {
                retry: RetryPolicy::from_config(&config),
                config,
                transport: Box::new(transport),
                state: Mutex::new(state),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub(crate) fn downgrade(&self) -> WeakBridge {
        WeakBridge(Arc::downgrade(&self.inner))
    }

    fn next_id(&self) -> String {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    // ---- Requests ----

    /// Call a native method and wait for its result.
    ///
    /// Timeouts and disconnects are retried per the configured policy, each
    /// attempt under a fresh id. Errors returned by the native handler are
    /// surfaced as `BridgeError::Remote` without retrying.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.inner
            .retry
            .run(method, || self.request_once(method, params.clone()))
            .await
    }

    async fn request_once(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id();
        let rx = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return Err(BridgeError::Destroyed);
            }
            state.pending.register(id.clone(), method)
        };
        let _guard = PendingGuard {
            bridge: self,
            id: &id,
        };

        self.dispatch(Envelope::request(id.as_str(), method, params))?;

        match tokio::time::timeout(self.inner.config.timeout(), rx).await {
            Ok(Ok(outcome)) => outcome,
            // Settlement dropped without an answer: the bridge went away
            Ok(Err(_)) => Err(BridgeError::Destroyed),
            Err(_) => {
                tracing::warn!(
                    request_id = %id,
                    method = %method,
                    timeout_ms = self.inner.config.timeout_ms,
                    "Request timed out"
                );
                Err(BridgeError::TimedOut {
                    method: method.to_string(),
                    timeout_ms: self.inner.config.timeout_ms,
                })
            }
        }
    }

    /// Fire-and-forget notification to the native side.
    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.dispatch(Envelope::event(self.next_id(), method, params))
    }

    /// Send now, or queue while offline.
    fn dispatch(&self, envelope: Envelope) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return Err(BridgeError::Destroyed);
            }
            if !state.connected {
                if !self.inner.config.enable_offline_queue {
                    return Err(BridgeError::Transport(TransportError::Disconnected));
                }
                tracing::debug!(
                    id = %envelope.id,
                    method = ?envelope.method,
                    "Queued envelope while offline"
                );
                return state.queue.push(envelope);
            }
        }

        self.transmit(&envelope)
    }

    fn transmit(&self, envelope: &Envelope) -> Result<()> {
        let payload = encode(envelope)?;
        self.inner.transport.send(payload).map_err(|e| {
            tracing::warn!(id = %envelope.id, error = %e, "Transport send failed");
            BridgeError::Transport(e)
        })
    }

    // ---- Inbound ----

    /// Entry point for the transport adapter. Safe to call from any thread.
    pub fn receive(&self, payload: &str) {
        if let Some(envelope) = decode(payload) {
            self.handle_envelope(envelope);
        }
    }

    pub fn handle_envelope(&self, envelope: Envelope) {
        match envelope.kind {
            EnvelopeKind::Response => {
                let mut state = self.inner.state.lock();
                if state.destroyed {
                    return;
                }
                let id = envelope.id.clone();
                if !state.pending.settle(envelope) {
                    tracing::debug!(request_id = %id, "Discarding response with no pending request");
                }
            }
            EnvelopeKind::Stream => {
                let mut state = self.inner.state.lock();
                if state.destroyed {
                    return;
                }
                state.streams.dispatch(envelope);
            }
            EnvelopeKind::Event => {
                let Some(name) = envelope.method else {
                    tracing::warn!(id = %envelope.id, "Dropping event without a name");
                    return;
                };
                // Connection events only ever come from the bridge itself
                if name == CONNECTED_EVENT || name == DISCONNECTED_EVENT {
                    tracing::warn!(id = %envelope.id, event = %name, "Dropping reserved event from native side");
                    return;
                }
                self.emit(&name, &envelope.params.unwrap_or(Value::Null));
            }
            EnvelopeKind::Request => {
                tracing::warn!(
                    id = %envelope.id,
                    method = ?envelope.method,
                    "Ignoring request sent to the web side"
                );
            }
        }
    }

    // ---- Connection ----

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    /// Going online replays the offline queue in order before any new call
    /// is sent directly.
    pub fn set_connected(&self, connected: bool) {
        if connected {
            self.reconnect();
        } else {
            self.disconnect();
        }
    }

    fn disconnect(&self) {
        let was_connected = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return;
            }
            state.draining = false;
            std::mem::replace(&mut state.connected, false)
        };

        if was_connected {
            tracing::info!("Bridge disconnected");
            self.emit(DISCONNECTED_EVENT, &Value::Null);
        }
    }

    fn reconnect(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.destroyed || state.connected || state.draining {
                return;
            }
            state.draining = true;
        }

        // While draining, `connected` stays false so new calls queue behind
        // the replayed ones.
        let mut replayed = 0usize;
        loop {
            let next = {
                let mut state = self.inner.state.lock();
                if state.destroyed || !state.draining {
                    return;
                }
                match state.queue.pop_front() {
                    Some(envelope) => envelope,
                    None => {
                        state.draining = false;
                        state.connected = true;
                        break;
                    }
                }
            };

            if let Err(e) = self.transmit(&next) {
                self.fail_unsent(&next, e);
            }
            replayed += 1;
        }

        tracing::info!(replayed, "Bridge connected");
        self.emit(CONNECTED_EVENT, &Value::Null);
    }

    fn fail_unsent(&self, envelope: &Envelope, error: BridgeError) {
        let mut state = self.inner.state.lock();
        if let Some(stream_id) = envelope.stream_id() {
            state.streams.fail(stream_id, error);
        } else if envelope.kind == EnvelopeKind::Request {
            state.pending.reject(&envelope.id, error);
        } else {
            tracing::warn!(
                id = %envelope.id,
                method = ?envelope.method,
                "Dropped queued notification"
            );
        }
    }

    // ---- Streams ----

    /// Open a stream channel. Items arrive on the returned controller.
    pub fn stream(&self, method: &str, params: Value) -> Result<StreamController> {
        let stream_id = Uuid::new_v4().to_string();
        let rx = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return Err(BridgeError::Destroyed);
            }
            state.streams.register(stream_id.clone())
        };

        let envelope = Envelope::stream_request(self.next_id(), method, params, stream_id.as_str());
        if let Err(e) = self.dispatch(envelope) {
            self.inner.state.lock().streams.remove(&stream_id);
            return Err(e);
        }

        tracing::debug!(stream_id = %stream_id, method = %method, "Opened stream");
        Ok(StreamController::new(stream_id, rx, self.downgrade()))
    }

    pub(crate) fn cancel_stream(&self, stream_id: &str) {
        let removed = {
            let mut state = self.inner.state.lock();
            !state.destroyed && state.streams.remove(stream_id)
        };
        if !removed {
            return;
        }

        let envelope = Envelope::event(
            self.next_id(),
            STREAM_CANCEL_METHOD,
            json!({ "streamId": stream_id }),
        );
        if let Err(e) = self.dispatch(envelope) {
            tracing::debug!(stream_id = %stream_id, error = %e, "Stream cancel not delivered");
        }
    }

    // ---- Batching ----

    /// Run several calls in one round trip. Results line up with `calls`.
    pub async fn batch(&self, calls: Vec<BatchCall>) -> Result<Vec<Result<Value>>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let expected = calls.len();
        let result = self.request(BATCH_METHOD, batch::wrap(&calls)).await?;
        batch::unwrap_slots(result, expected)
    }

    /// Buffer a call for the next background batch.
    ///
    /// The call is enqueued before this returns. The buffer flushes once it
    /// holds `batch_size` calls or after `batch_delay` without a new call.
    /// Must be called within a Tokio runtime.
    pub fn add_to_batch(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value>> + Send + 'static {
        let (rx, flush_now) = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                (None, false)
            } else {
                let rx = state.batch.push(BatchCall::new(method, params));
                if state.batch.len() >= self.inner.config.batch_size.max(1) {
                    state.batch.cancel_timer();
                    (Some(rx), true)
                } else {
                    let bridge = self.downgrade();
                    let delay = self.inner.config.batch_delay();
                    state.batch.arm(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Some(bridge) = bridge.upgrade() {
                            bridge.flush(true);
                        }
                    }));
                    (Some(rx), false)
                }
            }
        };

        if flush_now {
            self.flush_batch();
        }

        async move {
            match rx {
                Some(rx) => rx.await.unwrap_or(Err(BridgeError::Destroyed)),
                None => Err(BridgeError::Destroyed),
            }
        }
    }

    /// Send whatever the background buffer holds right now. The pending
    /// idle timer is cancelled so it cannot flush later calls early.
    pub fn flush_batch(&self) {
        self.flush(false);
    }

    fn flush(&self, from_timer: bool) {
        let entries = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return;
            }
            if from_timer {
                state.batch.release_timer();
            } else {
                state.batch.cancel_timer();
            }
            state.batch.take()
        };
        if entries.is_empty() {
            return;
        }

        let (calls, waiters): (Vec<BatchCall>, Vec<Settlement>) = entries.into_iter().unzip();
        tracing::debug!(size = calls.len(), "Flushing batch");

        let bridge = self.clone();
        tokio::spawn(async move {
            match bridge.batch(calls).await {
                Ok(outcomes) => {
                    for (tx, outcome) in waiters.into_iter().zip(outcomes) {
                        let _ = tx.send(outcome);
                    }
                }
                Err(e) => {
                    for tx in waiters {
                        let _ = tx.send(Err(e.clone()));
                    }
                }
            }
        });
    }

    // ---- Binary ----

    /// Send raw bytes; the native answer must be binary as well.
    pub async fn send_binary(&self, method: &str, bytes: &[u8]) -> Result<Vec<u8>> {
        self.ensure_binary()?;
        let result = self.request(method, binary::frame(bytes)).await?;
        Ok(binary::unframe(&result)?)
    }

    /// Call a method whose result is a binary frame.
    pub async fn receive_binary(&self, method: &str, params: Value) -> Result<Vec<u8>> {
        self.ensure_binary()?;
        let result = self.request(method, params).await?;
        Ok(binary::unframe(&result)?)
    }

    fn ensure_binary(&self) -> Result<()> {
        if self.inner.config.enable_binary_transfer {
            Ok(())
        } else {
            Err(BridgeError::Protocol("binary transfer disabled".to_string()))
        }
    }

    // ---- Events ----

    pub fn on<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.state.lock().events.on(event, Arc::new(callback))
    }

    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.inner.state.lock().events.off(event, id)
    }

    pub fn emit(&self, event: &str, payload: &Value) {
        let listeners = {
            let state = self.inner.state.lock();
            if state.destroyed {
                return;
            }
            state.events.listeners(event)
        };

        for callback in listeners {
            callback(payload);
        }
    }

    // ---- Teardown ----

    /// Tear the bridge down. Every pending request fails with `Destroyed`,
    /// every open stream receives one `Destroyed` error, queued and buffered
    /// traffic is dropped, and nothing is delivered afterwards.
    pub fn destroy(&self) {
        let (waiters, buffered) = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.connected = false;
            state.draining = false;
            state.queue.clear();
            state.batch.cancel_timer();
            state.events.clear();
            state.streams.fail_all(&BridgeError::Destroyed);
            (state.pending.drain(), state.batch.take())
        };

        let rejected = waiters.len() + buffered.len();
        for tx in waiters {
            let _ = tx.send(Err(BridgeError::Destroyed));
        }
        for (_, tx) in buffered {
            let _ = tx.send(Err(BridgeError::Destroyed));
        }

        tracing::info!(rejected, "Bridge destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    // ---- Introspection ----

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn open_streams(&self) -> usize {
        self.inner.state.lock().streams.len()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Bridge")
            .field("connected", &state.connected)
            .field("destroyed", &state.destroyed)
            .field("pending", &state.pending.len())
            .field("queued", &state.queue.len())
            .field("streams", &state.streams.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{bridge_with, deliver, until};
    use conduit_protocol::{codes, ErrorPayload};
    use futures_util::StreamExt;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio::time::Instant;

    fn quick() -> BridgeConfig {
        BridgeConfig::default().with_retries(0)
    }

    fn spawn_request(bridge: &Bridge, method: &str, params: Value) -> JoinHandle<Result<Value>> {
        let bridge = bridge.clone();
        let method = method.to_string();
        tokio::spawn(async move { bridge.request(&method, params).await })
    }

    #[tokio::test]
    async fn test_request_matches_response_by_id() {
        let (bridge, transport) = bridge_with(quick());
        let a = spawn_request(&bridge, "a", json!(1));
        let b = spawn_request(&bridge, "b", json!(2));

        let sent = transport.wait_for(2).await;
        let id_of = |method: &str| {
            sent.iter()
                .find(|e| e.method() == Some(method))
                .map(|e| e.id.clone())
                .unwrap()
        };

        // Answer out of order
        deliver(&bridge, &Envelope::response_ok(id_of("b"), json!("B")));
        deliver(&bridge, &Envelope::response_ok(id_of("a"), json!("A")));

        assert_eq!(a.await.unwrap(), Ok(json!("A")));
        assert_eq!(b.await.unwrap(), Ok(json!("B")));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_response_settles_once() {
        let (bridge, transport) = bridge_with(quick());
        let handle = spawn_request(&bridge, "a", Value::Null);
        let id = transport.wait_for(1).await[0].id.clone();

        deliver(&bridge, &Envelope::response_ok(id.as_str(), json!(1)));
        deliver(&bridge, &Envelope::response_ok(id.as_str(), json!(2)));

        assert_eq!(handle.await.unwrap(), Ok(json!(1)));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_error_is_not_retried() {
        let (bridge, transport) = bridge_with(BridgeConfig::default());
        let handle = spawn_request(&bridge, "fs.read", json!({"path": "/nope"}));
        let id = transport.wait_for(1).await[0].id.clone();

        deliver(
            &bridge,
            &Envelope::response_err(
                id,
                ErrorPayload::new(404, "not found").with_data(json!({"path": "/nope"})),
            ),
        );

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            BridgeError::Remote {
                code: 404,
                message: "not found".to_string(),
                data: Some(json!({"path": "/nope"})),
            }
        );
        assert_eq!(transport.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_discards_late_response() {
        let (bridge, transport) = bridge_with(quick());
        let start = Instant::now();
        let handle = spawn_request(&bridge, "slow", Value::Null);
        let id = transport.wait_for(1).await[0].id.clone();

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            BridgeError::TimedOut {
                method: "slow".to_string(),
                timeout_ms: 30_000,
            }
        );
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));

        // Response shows up a second later
        tokio::time::sleep(Duration::from_secs(1)).await;
        deliver(&bridge, &Envelope::response_ok(id, json!("late")));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_uses_fresh_ids() {
        let config = BridgeConfig::default()
            .with_timeout(Duration::from_millis(100))
            .with_retries(2)
            .with_retry_delay(Duration::from_secs(1));
        let (bridge, transport) = bridge_with(config);

        let err = bridge.request("flaky", Value::Null).await.unwrap_err();
        assert!(matches!(err, BridgeError::TimedOut { .. }));

        let ids: Vec<String> = transport.sent().into_iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), 3);
        let unique: std::collections::HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), 3);
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_on_later_attempt() {
        let config = BridgeConfig::default()
            .with_timeout(Duration::from_millis(100))
            .with_retry_delay(Duration::from_millis(10));
        let (bridge, transport) = bridge_with(config);
        let handle = spawn_request(&bridge, "flaky", Value::Null);

        // First attempt times out at 100ms, second goes out at 110ms
        tokio::time::sleep(Duration::from_millis(150)).await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_ne!(sent[0].id, sent[1].id);

        deliver(&bridge, &Envelope::response_ok(sent[0].id.as_str(), json!("stale")));
        deliver(&bridge, &Envelope::response_ok(sent[1].id.as_str(), json!("fresh")));

        assert_eq!(handle.await.unwrap(), Ok(json!("fresh")));
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces() {
        let (bridge, transport) = bridge_with(BridgeConfig::default());
        transport.fail_with(Some(TransportError::Failed("pipe broken".to_string())));

        let err = bridge.request("a", Value::Null).await.unwrap_err();
        assert_eq!(
            err,
            BridgeError::Transport(TransportError::Failed("pipe broken".to_string()))
        );
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_notify_sends_event() {
        let (bridge, transport) = bridge_with(quick());
        bridge.notify("window.focus", json!({"label": "main"})).unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, EnvelopeKind::Event);
        assert_eq!(sent[0].method(), Some("window.focus"));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_offline_queue_replays_in_order() {
        let (bridge, transport) = bridge_with(quick());
        bridge.set_connected(false);

        let mut handles = Vec::new();
        for (n, method) in ["A", "B", "C"].into_iter().enumerate() {
            handles.push(spawn_request(&bridge, method, Value::Null));
            until(|| bridge.queued_count() == n + 1).await;
        }
        assert_eq!(transport.len(), 0);
        assert_eq!(bridge.pending_count(), 3);

        bridge.set_connected(true);
        let sent = transport.sent();
        let methods: Vec<&str> = sent.iter().filter_map(|e| e.method()).collect();
        assert_eq!(methods, vec!["A", "B", "C"]);
        assert_eq!(bridge.queued_count(), 0);

        for envelope in &sent {
            deliver(
                &bridge,
                &Envelope::response_ok(envelope.id.as_str(), json!(envelope.method())),
            );
        }
        for (handle, method) in handles.into_iter().zip(["A", "B", "C"]) {
            assert_eq!(handle.await.unwrap(), Ok(json!(method)));
        }
        // Each replayed exactly once
        assert_eq!(transport.len(), 3);
    }

    #[tokio::test]
    async fn test_queue_full_rejects_immediately() {
        let (bridge, transport) = bridge_with(quick());
        bridge.set_connected(false);

        let handles: Vec<_> = (0..1000)
            .map(|i| spawn_request(&bridge, "fill", json!(i)))
            .collect();
        until(|| bridge.queued_count() == 1000).await;

        let err = bridge.request("overflow", Value::Null).await.unwrap_err();
        assert_eq!(err, BridgeError::QueueFull { capacity: 1000 });
        assert_eq!(bridge.queued_count(), 1000);
        assert_eq!(bridge.pending_count(), 1000);
        assert_eq!(transport.len(), 0);

        bridge.destroy();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Err(BridgeError::Destroyed));
        }
    }

    #[tokio::test]
    async fn test_disconnected_without_queue_fails() {
        let (bridge, transport) = bridge_with(quick().with_offline_queue(false));
        bridge.set_connected(false);

        assert_eq!(
            bridge.request("a", Value::Null).await,
            Err(BridgeError::Transport(TransportError::Disconnected))
        );
        assert_eq!(transport.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_request_keeps_its_deadline() {
        let (bridge, transport) = bridge_with(quick().with_timeout(Duration::from_secs(5)));
        bridge.set_connected(false);

        let err = bridge.request("a", Value::Null).await.unwrap_err();
        assert!(matches!(err, BridgeError::TimedOut { .. }));
        assert_eq!(bridge.queued_count(), 0);

        // Nothing stale is replayed
        bridge.set_connected(true);
        assert_eq!(transport.len(), 0);
    }

    #[tokio::test]
    async fn test_stream_delivers_until_end() {
        let (bridge, transport) = bridge_with(quick());
        let mut stream = bridge.stream("fs.watch", json!({"path": "/tmp"})).unwrap();
        let stream_id = stream.stream_id().to_string();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, EnvelopeKind::Request);
        assert_eq!(sent[0].stream_id(), Some(stream_id.as_str()));
        assert_ne!(sent[0].id, stream_id);

        deliver(&bridge, &Envelope::stream_data("n1", stream_id.as_str(), json!(1)));
        deliver(&bridge, &Envelope::stream_data("n2", stream_id.as_str(), json!(2)));
        deliver(&bridge, &Envelope::stream_end("n3", stream_id.as_str()));
        deliver(&bridge, &Envelope::stream_data("n4", stream_id.as_str(), json!(3)));

        let items: Vec<Result<Value>> = stream.by_ref().collect().await;
        assert_eq!(items, vec![Ok(json!(1)), Ok(json!(2))]);
        assert!(stream.is_finished());
        assert_eq!(bridge.open_streams(), 0);

        // An ended stream is not cancelled on drop
        drop(stream);
        assert_eq!(transport.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_error_terminates() {
        let (bridge, _transport) = bridge_with(quick());
        let mut stream = bridge.stream("fs.watch", Value::Null).unwrap();
        let stream_id = stream.stream_id().to_string();

        deliver(&bridge, &Envelope::stream_data("n1", stream_id.as_str(), json!(1)));
        deliver(&bridge, &Envelope::stream_error("n2", stream_id.as_str(), None));
        deliver(&bridge, &Envelope::stream_data("n3", stream_id.as_str(), json!(2)));

        assert_eq!(stream.recv().await, Some(Ok(json!(1))));
        let err = stream.recv().await.unwrap().unwrap_err();
        assert_eq!(err.code(), codes::STREAM_ERROR);
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn test_stream_cancel() {
        let (bridge, transport) = bridge_with(quick());
        let mut stream = bridge.stream("ticks", Value::Null).unwrap();
        let stream_id = stream.stream_id().to_string();

        stream.cancel();

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].kind, EnvelopeKind::Event);
        assert_eq!(sent[1].method(), Some(STREAM_CANCEL_METHOD));
        assert_eq!(sent[1].params, Some(json!({"streamId": stream_id})));

        deliver(&bridge, &Envelope::stream_data("n1", stream_id.as_str(), json!(1)));
        assert_eq!(stream.recv().await, None);
        assert_eq!(bridge.open_streams(), 0);

        stream.cancel();
        assert_eq!(transport.len(), 2);
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels() {
        let (bridge, transport) = bridge_with(quick());
        let stream = bridge.stream("ticks", Value::Null).unwrap();
        drop(stream);

        assert_eq!(bridge.open_streams(), 0);
        assert_eq!(transport.sent()[1].method(), Some(STREAM_CANCEL_METHOD));
    }

    #[tokio::test]
    async fn test_batch_results_align_with_input() {
        let (bridge, transport) = bridge_with(quick());
        let b = bridge.clone();
        let handle = tokio::spawn(async move {
            b.batch(vec![
                BatchCall::new("a", json!(1)),
                BatchCall::new("b", json!(2)),
                BatchCall::new("c", json!(3)),
            ])
            .await
        });

        let sent = transport.wait_for(1).await;
        assert_eq!(sent[0].method(), Some(BATCH_METHOD));
        assert_eq!(
            sent[0].params,
            Some(json!({"requests": [
                {"method": "a", "params": 1},
                {"method": "b", "params": 2},
                {"method": "c", "params": 3}
            ]}))
        );

        // Native side finished c first and tagged every slot
        deliver(
            &bridge,
            &Envelope::response_ok(
                sent[0].id.as_str(),
                json!([
                    {"index": 2, "result": "C"},
                    {"index": 0, "result": "A"},
                    {"index": 1, "error": {"code": 500, "message": "b failed"}}
                ]),
            ),
        );

        let results = handle.await.unwrap().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], Ok(json!("A")));
        assert_eq!(results[1].as_ref().unwrap_err().code(), 500);
        assert_eq!(results[2], Ok(json!("C")));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_round_trip() {
        let (bridge, transport) = bridge_with(quick());
        assert!(bridge.batch(Vec::new()).await.unwrap().is_empty());
        assert_eq!(transport.len(), 0);
    }

    #[tokio::test]
    async fn test_background_batch_flushes_at_size() {
        let (bridge, transport) = bridge_with(quick().with_batch_size(3));
        let a = bridge.add_to_batch("a", json!(1));
        let b = bridge.add_to_batch("b", json!(2));
        assert_eq!(transport.len(), 0);
        let c = bridge.add_to_batch("c", json!(3));

        let sent = transport.wait_for(1).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method(), Some(BATCH_METHOD));

        deliver(
            &bridge,
            &Envelope::response_ok(
                sent[0].id.as_str(),
                json!([{"result": "A"}, {"result": "B"}, {"result": "C"}]),
            ),
        );

        assert_eq!(a.await, Ok(json!("A")));
        assert_eq!(b.await, Ok(json!("B")));
        assert_eq!(c.await, Ok(json!("C")));
        assert_eq!(transport.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_batch_flushes_after_idle_delay() {
        let (bridge, transport) = bridge_with(quick());
        let a = bridge.add_to_batch("a", json!(1));
        tokio::time::sleep(Duration::from_millis(30)).await;
        let b = bridge.add_to_batch("b", json!(2));
        tokio::time::sleep(Duration::from_millis(30)).await;

        // 60ms since the first call, but only 30ms idle
        assert_eq!(transport.len(), 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let sent = transport.wait_for(1).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].params,
            Some(json!({"requests": [
                {"method": "a", "params": 1},
                {"method": "b", "params": 2}
            ]}))
        );

        deliver(
            &bridge,
            &Envelope::response_ok(sent[0].id.as_str(), json!([{"result": 1}, {"result": 2}])),
        );
        assert_eq!(a.await, Ok(json!(1)));
        assert_eq!(b.await, Ok(json!(2)));
    }

    #[tokio::test]
    async fn test_background_batch_failure_rejects_members() {
        let (bridge, transport) = bridge_with(quick().with_batch_size(2));
        transport.fail_with(Some(TransportError::Closed));

        let a = bridge.add_to_batch("a", Value::Null);
        let b = bridge.add_to_batch("b", Value::Null);

        let expected = Err(BridgeError::Transport(TransportError::Closed));
        assert_eq!(a.await, expected);
        assert_eq!(b.await, expected);
    }

    #[tokio::test]
    async fn test_send_binary_round_trip() {
        let (bridge, transport) = bridge_with(quick());
        let b = bridge.clone();
        let handle = tokio::spawn(async move { b.send_binary("save", &[0u8, 1, 2, 255]).await });

        let sent = transport.wait_for(1).await;
        assert_eq!(sent[0].params, Some(binary::frame(&[0, 1, 2, 255])));

        deliver(
            &bridge,
            &Envelope::response_ok(sent[0].id.as_str(), binary::frame(b"ok")),
        );
        assert_eq!(handle.await.unwrap(), Ok(b"ok".to_vec()));
    }

    #[tokio::test]
    async fn test_send_binary_requires_marker() {
        let (bridge, transport) = bridge_with(quick());
        let b = bridge.clone();
        let handle = tokio::spawn(async move { b.send_binary("save", b"data").await });

        let sent = transport.wait_for(1).await;
        deliver(
            &bridge,
            &Envelope::response_ok(sent[0].id.as_str(), json!({"saved": true})),
        );

        assert_eq!(
            handle.await.unwrap(),
            Err(BridgeError::Protocol("Expected binary response".to_string()))
        );
    }

    #[tokio::test]
    async fn test_receive_binary() {
        let (bridge, transport) = bridge_with(quick());
        let b = bridge.clone();
        let handle = tokio::spawn(async move {
            b.receive_binary("fs.readBytes", json!({"path": "icon.png"}))
                .await
        });

        let sent = transport.wait_for(1).await;
        assert_eq!(sent[0].params, Some(json!({"path": "icon.png"})));
        deliver(
            &bridge,
            &Envelope::response_ok(sent[0].id.as_str(), binary::frame(b"\x89PNG")),
        );

        assert_eq!(handle.await.unwrap(), Ok(b"\x89PNG".to_vec()));
    }

    #[tokio::test]
    async fn test_binary_disabled() {
        let (bridge, transport) = bridge_with(quick().with_binary_transfer(false));

        assert_eq!(
            bridge.send_binary("save", b"data").await,
            Err(BridgeError::Protocol("binary transfer disabled".to_string()))
        );
        assert_eq!(transport.len(), 0);
    }

    #[tokio::test]
    async fn test_native_and_connection_events() {
        let (bridge, _transport) = bridge_with(quick());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = bridge.on("menu.clicked", move |v| sink.lock().push(v.clone()));

        let transitions = Arc::new(AtomicUsize::new(0));
        for name in [CONNECTED_EVENT, DISCONNECTED_EVENT] {
            let counter = Arc::clone(&transitions);
            bridge.on(name, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        deliver(&bridge, &Envelope::event("n1", "menu.clicked", json!({"item": "quit"})));
        bridge.set_connected(false);
        bridge.set_connected(false);
        bridge.set_connected(true);

        assert!(bridge.off("menu.clicked", id));
        deliver(&bridge, &Envelope::event("n2", "menu.clicked", json!({"item": "about"})));

        assert_eq!(*seen.lock(), vec![json!({"item": "quit"})]);
        assert_eq!(transitions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_inbound_is_ignored() {
        let (bridge, transport) = bridge_with(quick());
        let handle = spawn_request(&bridge, "a", Value::Null);
        let id = transport.wait_for(1).await[0].id.clone();

        bridge.receive("garbage");
        bridge.receive(r#"{"kind":"response","result":1}"#);
        bridge.receive(r#"{"id":"x","kind":"teleport"}"#);
        assert_eq!(bridge.pending_count(), 1);

        deliver(&bridge, &Envelope::response_ok(id, json!("ok")));
        assert_eq!(handle.await.unwrap(), Ok(json!("ok")));
    }

    #[tokio::test]
    async fn test_destroy_rejects_everything() {
        let (bridge, transport) = bridge_with(BridgeConfig::default());
        let first = spawn_request(&bridge, "a", Value::Null);
        let second = spawn_request(&bridge, "b", Value::Null);
        let mut stream = bridge.stream("ticks", Value::Null).unwrap();
        until(|| bridge.pending_count() == 2).await;

        bridge.set_connected(false);
        bridge.notify("log", json!("queued")).unwrap();
        assert_eq!(bridge.queued_count(), 1);
        let buffered = bridge.add_to_batch("x", Value::Null);

        bridge.destroy();

        assert_eq!(first.await.unwrap(), Err(BridgeError::Destroyed));
        assert_eq!(second.await.unwrap(), Err(BridgeError::Destroyed));
        assert_eq!(stream.recv().await, Some(Err(BridgeError::Destroyed)));
        assert_eq!(stream.recv().await, None);
        assert_eq!(buffered.await, Err(BridgeError::Destroyed));
        assert_eq!(bridge.queued_count(), 0);
        assert_eq!(bridge.pending_count(), 0);
        assert_eq!(bridge.open_streams(), 0);

        assert_eq!(
            bridge.request("c", Value::Null).await,
            Err(BridgeError::Destroyed)
        );
        assert!(matches!(
            bridge.stream("s", Value::Null),
            Err(BridgeError::Destroyed)
        ));
        assert_eq!(bridge.notify("n", Value::Null), Err(BridgeError::Destroyed));
        assert_eq!(
            bridge.add_to_batch("y", Value::Null).await,
            Err(BridgeError::Destroyed)
        );

        // No further traffic after teardown
        let sent = transport.len();
        bridge.set_connected(true);
        drop(stream);
        bridge.destroy();
        assert_eq!(transport.len(), sent);
        assert!(bridge.is_destroyed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_flush_cancels_idle_timer() {
        let (bridge, transport) = bridge_with(quick());
        let _a = bridge.add_to_batch("a", json!(1));
        bridge.flush_batch();
        transport.wait_for(1).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        let _b = bridge.add_to_batch("b", json!(2));
        tokio::time::sleep(Duration::from_millis(15)).await;

        // The timer armed for "a" would have fired by now
        assert_eq!(transport.len(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1].params,
            Some(json!({"requests": [{"method": "b", "params": 2}]}))
        );
    }

    #[tokio::test]
    async fn test_stream_opened_offline_replays_on_reconnect() {
        let (bridge, transport) = bridge_with(quick());
        bridge.set_connected(false);

        let mut stream = bridge.stream("fs.watch", json!({"path": "/tmp"})).unwrap();
        let stream_id = stream.stream_id().to_string();
        assert_eq!(bridge.queued_count(), 1);
        assert_eq!(bridge.open_streams(), 1);
        assert_eq!(transport.len(), 0);

        bridge.set_connected(true);
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].stream_id(), Some(stream_id.as_str()));

        deliver(&bridge, &Envelope::stream_data("n1", stream_id.as_str(), json!("changed")));
        assert_eq!(stream.recv().await, Some(Ok(json!("changed"))));
    }

    #[tokio::test]
    async fn test_stream_cancel_while_offline_is_queued() {
        let (bridge, transport) = bridge_with(quick());
        let mut stream = bridge.stream("ticks", Value::Null).unwrap();
        let stream_id = stream.stream_id().to_string();
        bridge.set_connected(false);

        stream.cancel();
        assert_eq!(bridge.open_streams(), 0);
        assert_eq!(bridge.queued_count(), 1);
        assert_eq!(transport.len(), 1);

        bridge.set_connected(true);
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].method(), Some(STREAM_CANCEL_METHOD));
        assert_eq!(sent[1].params, Some(json!({"streamId": stream_id})));
    }

    #[tokio::test]
    async fn test_replay_failure_rejects_queued_work() {
        let (bridge, transport) = bridge_with(quick());
        bridge.set_connected(false);

        let request = spawn_request(&bridge, "a", Value::Null);
        until(|| bridge.queued_count() == 1).await;
        let mut stream = bridge.stream("ticks", Value::Null).unwrap();
        bridge.notify("log", json!("offline")).unwrap();
        assert_eq!(bridge.queued_count(), 3);

        let failure = TransportError::Failed("webview gone".to_string());
        transport.fail_with(Some(failure.clone()));
        bridge.set_connected(true);

        let expected = Err(BridgeError::Transport(failure));
        assert_eq!(request.await.unwrap(), expected);
        assert_eq!(stream.recv().await, Some(expected));
        assert_eq!(stream.recv().await, None);

        assert!(bridge.is_connected());
        assert_eq!(bridge.queued_count(), 0);
        assert_eq!(bridge.pending_count(), 0);
        assert_eq!(bridge.open_streams(), 0);
        assert_eq!(transport.len(), 0);
    }

    #[tokio::test]
    async fn test_connection_event_names_are_reserved() {
        let (bridge, _transport) = bridge_with(quick());
        let fired = Arc::new(AtomicUsize::new(0));
        for name in [CONNECTED_EVENT, DISCONNECTED_EVENT] {
            let counter = Arc::clone(&fired);
            bridge.on(name, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        deliver(&bridge, &Envelope::event("n1", CONNECTED_EVENT, Value::Null));
        deliver(&bridge, &Envelope::event("n2", DISCONNECTED_EVENT, Value::Null));

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(bridge.is_connected());
    }
}
