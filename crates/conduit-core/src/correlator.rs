//! Request correlation
//!
//! Maps outstanding request ids to the channel that settles them. An entry
//! leaves the map exactly once, so a request settles at most once no matter
//! how many responses carry its id.

use std::collections::HashMap;

use conduit_protocol::Envelope;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::BridgeError;
use crate::Result;

pub(crate) type Settlement = oneshot::Sender<Result<Value>>;

struct PendingRequest {
    method: String,
    tx: Settlement,
}

#[derive(Default)]
pub(crate) struct Correlator {
    pending: HashMap<String, PendingRequest>,
}

impl Correlator {
    pub fn register(&mut self, id: String, method: &str) -> oneshot::Receiver<Result<Value>> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                tx,
            },
        );
        rx
    }

    /// Settle the request answered by `response`. Returns false when no
    /// request is waiting on that id (late, duplicate or unknown).
    pub fn settle(&mut self, response: Envelope) -> bool {
        let Some(pending) = self.pending.remove(&response.id) else {
            return false;
        };

        let outcome = match response.error {
            Some(error) => Err(BridgeError::from(error)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };

        tracing::debug!(
            request_id = %response.id,
            method = %pending.method,
            ok = outcome.is_ok(),
            "Settled request"
        );

        // The caller may have stopped waiting; nothing to do then
        let _ = pending.tx.send(outcome);
        true
    }

    /// Reject a single pending request, if still present.
    pub fn reject(&mut self, id: &str, error: BridgeError) -> bool {
        match self.pending.remove(id) {
            Some(pending) => {
                let _ = pending.tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Forget a request without settling it. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        self.pending.remove(id).is_some()
    }

    pub fn drain(&mut self) -> Vec<Settlement> {
        self.pending.drain().map(|(_, p)| p.tx).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
