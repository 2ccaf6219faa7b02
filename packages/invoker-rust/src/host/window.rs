//! Windows and frames exchanging cross-origin messages.
//!
//! `post_message` delivers a `MessageEvent` to every "message" listener of
//! the target window, but only when the caller's target-origin restriction
//! is `"*"` or matches the window's origin. Mismatches and closed windows
//! drop the message silently, as a browser does.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;

use super::listeners::ListenerSet;

/// Origin wildcard accepted by `post_message`.
pub const ANY_ORIGIN: &str = "*";

/// Origin reported for messages without a source window.
pub const OPAQUE_ORIGIN: &str = "null";

static NEXT_WINDOW_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a window. A reloaded frame gets a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window#{}", self.0)
    }
}

/// Shared reference to a window.
pub type WindowRef = Arc<Window>;

/// A message as observed by a window's listeners.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub data: Value,
    /// Origin of the sending window, or `"null"` if unknown.
    pub origin: String,
    /// The sending window, if any. Responses are posted back to it.
    pub source: Option<WindowRef>,
}

/// A browsing context with an origin and a message channel.
pub struct Window {
    id: WindowId,
    origin: String,
    listeners: ListenerSet<MessageEvent>,
    closed: AtomicBool,
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Window {
    /// Opens a new window with the given origin.
    pub fn open(origin: impl Into<String>) -> WindowRef {
        Arc::new(Self {
            id: WindowId(NEXT_WINDOW_ID.fetch_add(1, Ordering::Relaxed)),
            origin: origin.into(),
            listeners: ListenerSet::new(),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn id(&self) -> WindowId {
        self.id
    }

    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Registers a "message" listener. Drop the receiver to remove it.
    pub fn add_message_listener(&self) -> mpsc::UnboundedReceiver<MessageEvent> {
        self.listeners.subscribe()
    }

    /// Posts `data` to this window on behalf of `source`.
    ///
    /// Returns the number of listeners reached; zero when the window is
    /// closed or `target_origin` excludes it.
    pub fn post_message(&self, data: Value, target_origin: &str, source: Option<&WindowRef>) -> usize {
        if self.is_closed() {
            return 0;
        }
        if target_origin != ANY_ORIGIN && target_origin != self.origin {
            tracing::debug!(
                target_origin,
                window_origin = %self.origin,
                "dropping message: target origin does not match recipient"
            );
            return 0;
        }
        let event = MessageEvent {
            data,
            origin: source.map_or_else(|| OPAQUE_ORIGIN.to_string(), |w| w.origin.clone()),
            source: source.cloned(),
        };
        self.listeners.emit(&event)
    }

    /// Closes the window; later posts to it are dropped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// An embedded frame whose content window is replaced on every reload.
#[derive(Debug)]
pub struct Frame {
    origin: String,
    content: RwLock<WindowRef>,
}

impl Frame {
    /// Creates a frame with a freshly loaded content window.
    pub fn new(origin: impl Into<String>) -> Arc<Self> {
        let origin = origin.into();
        Arc::new(Self {
            content: RwLock::new(Window::open(origin.clone())),
            origin,
        })
    }

    /// The frame's current content window.
    #[must_use]
    pub fn content_window(&self) -> WindowRef {
        Arc::clone(&self.content.read())
    }

    /// Discards the current content window and loads a new one.
    ///
    /// Listeners on the old window stop receiving messages; the new window
    /// has a different identity.
    pub fn reload(&self) -> WindowRef {
        let fresh = Window::open(self.origin.clone());
        let old = std::mem::replace(&mut *self.content.write(), Arc::clone(&fresh));
        old.close();
        fresh
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn window_ids_are_unique() {
        let a = Window::open("https://a.test");
        let b = Window::open("https://a.test");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn post_message_carries_source_and_origin() {
        let page = Window::open("https://page.test");
        let popup = Window::open("https://popup.test");
        let mut rx = popup.add_message_listener();

        assert_eq!(popup.post_message(json!({"x": 1}), "*", Some(&page)), 1);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.data, json!({"x": 1}));
        assert_eq!(event.origin, "https://page.test");
        assert_eq!(event.source.unwrap().id(), page.id());
    }

    #[test]
    fn origin_restriction_is_enforced() {
        let target = Window::open("https://target.test");
        let mut rx = target.add_message_listener();

        assert_eq!(target.post_message(json!(1), "https://other.test", None), 0);
        assert!(rx.try_recv().is_err());

        assert_eq!(target.post_message(json!(2), "https://target.test", None), 1);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.origin, OPAQUE_ORIGIN);
        assert!(event.source.is_none());
    }

    #[test]
    fn closed_window_drops_messages() {
        let target = Window::open("https://target.test");
        let _rx = target.add_message_listener();
        target.close();
        assert_eq!(target.post_message(json!(1), "*", None), 0);
    }

    #[test]
    fn frame_reload_replaces_content_window() {
        let frame = Frame::new("https://frame.test");
        let first = frame.content_window();
        let second = frame.reload();

        assert_ne!(first.id(), second.id());
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(frame.content_window().id(), second.id());
        assert_eq!(second.origin(), "https://frame.test");
    }
}
