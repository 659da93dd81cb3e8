//! Request batching
//!
//! Wire shape shared by explicit `Bridge::batch` calls and the background
//! coalescing buffer:
//! ```text
//! request  _batch { "requests": [ {method, params}, ... ] }
//! response [ {result} | {error}, ... ]   // one slot per call, same order
//! ```

use conduit_protocol::ErrorPayload;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::correlator::Settlement;
use crate::error::BridgeError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCall {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl BatchCall {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Slot {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorPayload>,
}

pub(crate) fn wrap(calls: &[BatchCall]) -> Value {
    json!({ "requests": calls })
}

/// Split a `_batch` result into per-call outcomes aligned with the input.
pub(crate) fn unwrap_slots(result: Value, expected: usize) -> Result<Vec<Result<Value>>> {
    let slots: Vec<Slot> = serde_json::from_value(result)
        .map_err(|e| BridgeError::Protocol(format!("malformed batch response: {e}")))?;

    if slots.len() != expected {
        return Err(BridgeError::Protocol(format!(
            "batch response has {} slots, expected {}",
            slots.len(),
            expected
        )));
    }

    let mut outcomes: Vec<Option<Result<Value>>> = vec![None; expected];
    for (position, slot) in slots.into_iter().enumerate() {
        let index = slot.index.unwrap_or(position);
        let Some(target) = outcomes.get_mut(index) else {
            return Err(BridgeError::Protocol(format!(
                "batch slot index {index} out of range"
            )));
        };
        if target.is_some() {
            return Err(BridgeError::Protocol(format!(
                "duplicate batch slot index {index}"
            )));
        }
        *target = Some(match slot.error {
            Some(error) => Err(BridgeError::from(error)),
            None => Ok(slot.result.unwrap_or(Value::Null)),
        });
    }

    // Every index was filled exactly once, so none are missing
    Ok(outcomes.into_iter().flatten().collect())
}

/// Calls waiting for the next background flush.
#[derive(Default)]
pub(crate) struct BatchBuffer {
    entries: Vec<(BatchCall, Settlement)>,
    timer: Option<JoinHandle<()>>,
}

impl BatchBuffer {
    pub fn push(&mut self, call: BatchCall) -> oneshot::Receiver<Result<Value>> {
        let (tx, rx) = oneshot::channel();
        self.entries.push((call, tx));
        rx
    }

    /// Replace the idle timer, restarting the inactivity window.
    pub fn arm(&mut self, timer: JoinHandle<()>) {
        if let Some(previous) = self.timer.replace(timer) {
            previous.abort();
        }
    }

    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Forget the timer handle without aborting it. Only the timer task
    /// itself calls this, right before it flushes.
    pub fn release_timer(&mut self) {
        self.timer = None;
    }

    pub fn take(&mut self) -> Vec<(BatchCall, Settlement)> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
