//! Event listeners
//!
//! Connection changes and native `event` envelopes are fanned out to
//! callbacks registered by name.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub(crate) struct EventBus {
    listeners: HashMap<String, Vec<(ListenerId, EventCallback)>>,
    next_id: u64,
}

impl EventBus {
    pub fn on(&mut self, event: &str, callback: EventCallback) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners
            .entry(event.to_string())
            .or_default()
            .push((id, callback));
        id
    }

    pub fn off(&mut self, event: &str, id: ListenerId) -> bool {
        let Some(listeners) = self.listeners.get_mut(event) else {
            return false;
        };

        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        let removed = listeners.len() != before;

        if listeners.is_empty() {
            self.listeners.remove(event);
        }
        removed
    }

    /// Snapshot of the callbacks for `event`, so they can run unlocked.
    pub fn listeners(&self, event: &str) -> Vec<EventCallback> {
        self.listeners
            .get(event)
            .map(|l| l.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}
