//! Offline outbound queue
//!
//! Holds envelopes produced while the bridge is disconnected and hands them
//! back in FIFO order on reconnect.

use std::collections::VecDeque;

use conduit_protocol::Envelope;

use crate::error::BridgeError;
use crate::Result;

pub(crate) struct OfflineQueue {
    entries: VecDeque<Envelope>,
    capacity: usize,
}

impl OfflineQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Append an envelope; a full queue is left untouched.
    pub fn push(&mut self, envelope: Envelope) -> Result<()> {
        if self.entries.len() >= self.capacity {
            tracing::warn!(
                capacity = self.capacity,
                method = ?envelope.method,
                "Offline queue full, rejecting envelope"
            );
            return Err(BridgeError::QueueFull {
                capacity: self.capacity,
            });
        }

        self.entries.push_back(envelope);
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<Envelope> {
        self.entries.pop_front()
    }

    /// Drop the queued envelope with the given id, if any.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.entries.iter().position(|e| e.id == id) {
            Some(index) => self.entries.remove(index).is_some(),
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
