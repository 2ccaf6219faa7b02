//! Cross-window messaging.
//!
//! The engine listens on its own window and posts to a peer window with
//! an origin restriction. The peer is resolved lazily and cached; once the
//! cached window closes (a reloaded frame, a closed popup) the next send
//! resolves it again.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use portcall_core::{RequestEnvelope, ResponseEnvelope};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::config::WindowConfig;
use super::{dispatch, InboundSink, Listener, Transport, TransportError};
use crate::host::window::ANY_ORIGIN;
use crate::host::{EndpointId, Frame, MessageEvent, WindowRef};

/// Supplies the current peer window on demand.
pub type Resolver = Arc<dyn Fn() -> Option<WindowRef> + Send + Sync>;

/// How the peer window is found.
#[derive(Clone)]
pub enum Peer {
    /// A fixed window, such as an opener or a popup.
    Window(WindowRef),
    /// An embedded frame; follows its content window across reloads.
    Frame(Arc<Frame>),
    /// Arbitrary lookup, consulted whenever the cached window is gone.
    Resolver(Resolver),
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Window(window) => f.debug_tuple("Window").field(&window.id()).finish(),
            Self::Frame(frame) => f.debug_tuple("Frame").field(&frame.content_window().id()).finish(),
            Self::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

impl Peer {
    fn resolve(&self) -> Option<WindowRef> {
        match self {
            Self::Window(window) => Some(Arc::clone(window)),
            Self::Frame(frame) => Some(frame.content_window()),
            Self::Resolver(resolve) => resolve(),
        }
    }
}

#[derive(Debug)]
struct PeerCache {
    peer: Peer,
    cached: Mutex<Option<WindowRef>>,
}

impl PeerCache {
    fn current(&self) -> Option<WindowRef> {
        let mut cached = self.cached.lock();
        if let Some(window) = cached.as_ref().filter(|window| !window.is_closed()) {
            return Some(Arc::clone(window));
        }
        let fresh = self.peer.resolve().filter(|window| !window.is_closed());
        cached.clone_from(&fresh);
        fresh
    }
}

/// Transport between a local window and a peer window.
#[derive(Debug)]
pub struct WindowTransport {
    local: WindowRef,
    peer: Arc<PeerCache>,
    config: WindowConfig,
    subscription: Mutex<Option<CancellationToken>>,
}

impl WindowTransport {
    /// Creates a transport listening on `local` and talking to `peer`.
    pub fn new(local: WindowRef, peer: Peer, config: WindowConfig) -> Self {
        Self {
            local,
            peer: Arc::new(PeerCache {
                peer,
                cached: Mutex::new(None),
            }),
            config,
            subscription: Mutex::new(None),
        }
    }

    /// The window this transport listens on.
    #[must_use]
    pub fn local(&self) -> &WindowRef {
        &self.local
    }

    /// The peer window as currently resolved.
    #[must_use]
    pub fn peer(&self) -> Option<WindowRef> {
        self.peer.current()
    }

    fn post(&self, target: &WindowRef, message: Value) {
        let reached = target.post_message(message, &self.config.peer_origin, Some(&self.local));
        if reached == 0 {
            tracing::debug!(window = %target.id(), origin = %self.config.peer_origin, "window message reached no listener");
        }
    }
}

/// Applies the inbound origin and source filters.
fn accepts(config: &WindowConfig, peer: &PeerCache, event: &MessageEvent) -> bool {
    if config.check_origin && config.peer_origin != ANY_ORIGIN && event.origin != config.peer_origin {
        tracing::debug!(origin = %event.origin, expected = %config.peer_origin, "dropping message from unexpected origin");
        return false;
    }
    if config.require_peer_source {
        let from_peer = match (&event.source, peer.current()) {
            (Some(source), Some(current)) => source.id() == current.id(),
            _ => false,
        };
        if !from_peer {
            tracing::debug!("dropping message whose source is not the peer window");
            return false;
        }
    }
    true
}

#[async_trait]
impl Transport for WindowTransport {
    type Sender = WindowRef;

    async fn transmit(
        &self,
        request: &RequestEnvelope,
        _endpoint: Option<EndpointId>,
    ) -> Result<(), TransportError> {
        let target = self.peer.current().ok_or(TransportError::PeerUnavailable)?;
        self.post(&target, self.config.tags.tag_request(request)?);
        Ok(())
    }

    async fn transmit_response(
        &self,
        response: &ResponseEnvelope,
        sender: &WindowRef,
    ) -> Result<(), TransportError> {
        if sender.is_closed() {
            return Err(TransportError::PeerUnavailable);
        }
        self.post(sender, self.config.tags.tag_response(response)?);
        Ok(())
    }

    /// Listens on the local window, replacing any previous subscription.
    fn subscribe(&self, sink: Arc<dyn InboundSink<WindowRef>>) -> Result<Listener, TransportError> {
        let mut events = self.local.add_message_listener();
        let mut listener = Listener::new(CancellationToken::new());
        if let Some(previous) = self.subscription.lock().replace(listener.token().clone()) {
            previous.cancel();
        }

        let config = self.config.clone();
        let peer = Arc::clone(&self.peer);
        listener.spawn(async move {
            while let Some(event) = events.recv().await {
                if !accepts(&config, &peer, &event) {
                    continue;
                }
                if let Some(inbound) = config.tags.classify(&event.data) {
                    dispatch(sink.as_ref(), inbound, event.source);
                }
            }
        });
        Ok(listener)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use portcall_core::{FuncName, InstanceId};
    use serde_json::json;

    use super::*;
    use crate::host::Window;

    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<(RequestEnvelope, Option<WindowRef>)>>,
        responses: Mutex<Vec<ResponseEnvelope>>,
    }

    impl InboundSink<WindowRef> for Recorder {
        fn on_request(&self, request: RequestEnvelope, sender: Option<WindowRef>) {
            self.requests.lock().push((request, sender));
        }

        fn on_response(&self, response: ResponseEnvelope) {
            self.responses.lock().push(response);
        }
    }

    fn request() -> RequestEnvelope {
        RequestEnvelope {
            func: FuncName::from("sum"),
            args: vec![json!(2), json!(3)],
            reply: true,
            key: "k-1".into(),
            sender_instance: InstanceId::from("abc"),
            target_name: None,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn request_reaches_frame_and_response_returns_to_source() {
        let page = Window::open("https://page.test");
        let frame = Frame::new("https://frame.test");

        let outer = WindowTransport::new(Arc::clone(&page), Peer::Frame(Arc::clone(&frame)), WindowConfig::default());
        let inner = WindowTransport::new(frame.content_window(), Peer::Window(Arc::clone(&page)), WindowConfig::default());
        let outer_sink = Arc::new(Recorder::default());
        let inner_sink = Arc::new(Recorder::default());
        let _outer = outer.subscribe(outer_sink.clone()).unwrap();
        let _inner = inner.subscribe(inner_sink.clone()).unwrap();

        outer.transmit(&request(), None).await.unwrap();
        settle().await;
        let (received, source) = inner_sink.requests.lock().pop().unwrap();
        let source = source.unwrap();
        assert_eq!(source.id(), page.id());

        let response = ResponseEnvelope::success(&received, "frame", json!(5));
        inner.transmit_response(&response, &source).await.unwrap();
        settle().await;
        assert_eq!(outer_sink.responses.lock().as_slice(), &[response]);
    }

    #[tokio::test]
    async fn origin_restriction_blocks_delivery() {
        let page = Window::open("https://page.test");
        let popup = Window::open("https://popup.test");
        let config = WindowConfig {
            peer_origin: "https://elsewhere.test".to_string(),
            ..WindowConfig::default()
        };
        let outer = WindowTransport::new(page, Peer::Window(Arc::clone(&popup)), config);
        let inner = WindowTransport::new(popup, Peer::Resolver(Arc::new(|| None::<WindowRef>)), WindowConfig::default());
        let sink = Arc::new(Recorder::default());
        let _inner = inner.subscribe(sink.clone()).unwrap();

        outer.transmit(&request(), None).await.unwrap();
        settle().await;
        assert!(sink.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn check_origin_drops_unexpected_senders() {
        let page = Window::open("https://page.test");
        let stranger = Window::open("https://stranger.test");
        let config = WindowConfig {
            peer_origin: "https://frame.test".to_string(),
            check_origin: true,
            ..WindowConfig::default()
        };
        let local = WindowTransport::new(Arc::clone(&page), Peer::Resolver(Arc::new(|| None::<WindowRef>)), config.clone());
        let sink = Arc::new(Recorder::default());
        let _listener = local.subscribe(sink.clone()).unwrap();

        let tagged = config.tags.tag_request(&request()).unwrap();
        page.post_message(tagged, "*", Some(&stranger));
        settle().await;
        assert!(sink.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn require_peer_source_filters_other_windows() {
        let page = Window::open("https://page.test");
        let peer = Window::open("https://peer.test");
        let other = Window::open("https://peer.test");
        let config = WindowConfig {
            require_peer_source: true,
            ..WindowConfig::default()
        };
        let local = WindowTransport::new(Arc::clone(&page), Peer::Window(Arc::clone(&peer)), config.clone());
        let sink = Arc::new(Recorder::default());
        let _listener = local.subscribe(sink.clone()).unwrap();

        let tagged = config.tags.tag_request(&request()).unwrap();
        page.post_message(tagged.clone(), "*", Some(&other));
        page.post_message(tagged, "*", Some(&peer));
        settle().await;

        let requests = sink.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1.as_ref().unwrap().id(), peer.id());
    }

    #[tokio::test]
    async fn reloaded_frame_is_resolved_again() {
        let page = Window::open("https://page.test");
        let frame = Frame::new("https://frame.test");
        let outer = WindowTransport::new(page, Peer::Frame(Arc::clone(&frame)), WindowConfig::default());

        let first = outer.peer().unwrap();
        let second = frame.reload();
        assert_eq!(outer.peer().unwrap().id(), second.id());
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn unresolvable_peer_is_an_error() {
        let page = Window::open("https://page.test");
        let outer = WindowTransport::new(page, Peer::Resolver(Arc::new(|| None::<WindowRef>)), WindowConfig::default());
        assert!(matches!(
            outer.transmit(&request(), None).await,
            Err(TransportError::PeerUnavailable)
        ));
    }

    #[tokio::test]
    async fn relistening_replaces_previous_subscription() {
        let page = Window::open("https://page.test");
        let local = WindowTransport::new(Arc::clone(&page), Peer::Resolver(Arc::new(|| None::<WindowRef>)), WindowConfig::default());
        let first_sink = Arc::new(Recorder::default());
        let second_sink = Arc::new(Recorder::default());
        let first = local.subscribe(first_sink.clone()).unwrap();
        let _second = local.subscribe(second_sink.clone()).unwrap();
        assert!(!first.is_active());

        let tagged = WindowConfig::default().tags.tag_request(&request()).unwrap();
        page.post_message(tagged, "*", None);
        settle().await;
        assert!(first_sink.requests.lock().is_empty());
        assert_eq!(second_sink.requests.lock().len(), 1);
    }
}
