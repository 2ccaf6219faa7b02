//! A shared document-like event target.
//!
//! Every script in the same document sees every event dispatched on it,
//! including the events it dispatched itself.

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;

use super::listeners::ListenerSet;

/// A named event carrying a structured `detail` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomEvent {
    pub event_type: String,
    pub detail: Value,
}

/// Shared event target keyed by event type.
#[derive(Debug, Default)]
pub struct Document {
    listeners: DashMap<String, ListenerSet<CustomEvent>>,
}

impl Document {
    /// Creates a document with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatches an event to every listener of `event_type`.
    ///
    /// Returns the number of listeners that received it.
    pub fn dispatch_event(&self, event_type: &str, detail: Value) -> usize {
        let event = CustomEvent {
            event_type: event_type.to_string(),
            detail,
        };
        self.listeners
            .get(event_type)
            .map_or(0, |set| set.emit(&event))
    }

    /// Registers a listener for `event_type`. Drop the receiver to remove it.
    pub fn add_event_listener(&self, event_type: &str) -> mpsc::UnboundedReceiver<CustomEvent> {
        self.listeners
            .entry(event_type.to_string())
            .or_default()
            .subscribe()
    }

    /// Returns the number of live listeners for `event_type`.
    #[must_use]
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners.get(event_type).map_or(0, |set| set.len())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn dispatch_reaches_listeners_of_same_type_only() {
        let doc = Document::new();
        let mut ours = doc.add_event_listener("bridge");
        let mut other = doc.add_event_listener("unrelated");

        assert_eq!(doc.dispatch_event("bridge", json!({"n": 1})), 1);

        let event = ours.try_recv().unwrap();
        assert_eq!(event.event_type, "bridge");
        assert_eq!(event.detail, json!({"n": 1}));
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn dispatch_without_listeners_is_dropped() {
        let doc = Document::new();
        assert_eq!(doc.dispatch_event("nobody", json!(null)), 0);
    }

    #[test]
    fn removed_listener_stops_counting() {
        let doc = Document::new();
        let rx = doc.add_event_listener("bridge");
        assert_eq!(doc.listener_count("bridge"), 1);
        drop(rx);
        assert_eq!(doc.listener_count("bridge"), 0);
    }
}
