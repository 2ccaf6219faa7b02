//! Persistent named connection between two runtime contexts.
//!
//! One side calls [`ConnectionTransport::connect`]; the other accepts the
//! offer from its connect listener when the connection name matches. Both
//! ends then exchange flat-tagged envelopes over the port.
//!
//! State machine: Disconnected -> Connecting -> Connected -> Disconnected.
//! The current link lives in an `ArcSwap`, so `transmit` acts on a single
//! atomic snapshot and a racing disconnect can never leave it holding a
//! half-torn-down port.

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use portcall_core::{MessageTags, RequestEnvelope, ResponseEnvelope};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::config::ConnectionConfig;
use super::{dispatch, spawn_until_cancelled, InboundSink, Listener, Transport, TransportError};
use crate::host::{Context, EndpointId, Port, PortHandle};

/// Observable lifecycle of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug)]
enum Link {
    Disconnected,
    Connecting,
    Connected(Arc<PortHandle>),
}

impl Link {
    fn state(&self) -> ConnectionState {
        match self {
            Self::Disconnected => ConnectionState::Disconnected,
            Self::Connecting => ConnectionState::Connecting,
            Self::Connected(_) => ConnectionState::Connected,
        }
    }
}

type Sink = Arc<dyn InboundSink<Arc<PortHandle>>>;

struct Subscription {
    sink: Sink,
    token: CancellationToken,
}

struct Shared {
    link: ArcSwap<Link>,
    state_tx: watch::Sender<ConnectionState>,
    subscription: Mutex<Option<Subscription>>,
    tags: MessageTags,
}

impl Shared {
    fn set(&self, link: Link) -> Arc<Link> {
        let state = link.state();
        let previous = self.link.swap(Arc::new(link));
        self.state_tx.send_replace(state);
        previous
    }

    fn subscription(&self) -> Option<(Sink, CancellationToken)> {
        self.subscription
            .lock()
            .as_ref()
            .filter(|sub| !sub.token.is_cancelled())
            .map(|sub| (Arc::clone(&sub.sink), sub.token.clone()))
    }

    /// Makes `port` the current link and starts reading from it.
    fn attach(self: &Arc<Self>, port: Port, sink: Sink, token: &CancellationToken) {
        let (handle, mut receiver) = port.split();
        tracing::debug!(port = handle.id.0, name = %handle.name, remote = %handle.remote, "connection established");

        if let Link::Connected(old) = &*self.set(Link::Connected(Arc::clone(&handle))) {
            if !Arc::ptr_eq(old, &handle) {
                old.disconnect(Some("replaced"));
            }
        }

        let shared = Arc::clone(self);
        let tags = self.tags.clone();
        spawn_until_cancelled(token.clone(), async move {
            while let Some(payload) = receiver.recv().await {
                if let Some(inbound) = tags.classify(&payload) {
                    dispatch(sink.as_ref(), inbound, Some(Arc::clone(&handle)));
                }
            }
            shared.detach(&handle);
        });
    }

    /// Clears the current link if it is still `handle`.
    fn detach(&self, handle: &Arc<PortHandle>) {
        let previous = self.link.rcu(|link| match &**link {
            Link::Connected(current) if Arc::ptr_eq(current, handle) => Arc::new(Link::Disconnected),
            _ => Arc::clone(link),
        });
        if matches!(&*previous, Link::Connected(current) if Arc::ptr_eq(current, handle)) {
            tracing::debug!(port = handle.id.0, "connection lost");
            self.state_tx.send_replace(ConnectionState::Disconnected);
        }
    }
}

/// Transport over a named port of a runtime [`Context`].
pub struct ConnectionTransport {
    context: Arc<Context>,
    connection_name: String,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTransport")
            .field("context", &self.context.id())
            .field("connection_name", &self.connection_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionTransport {
    /// Creates a disconnected transport on `context`.
    pub fn new(context: Arc<Context>, config: ConnectionConfig) -> Self {
        let (state_tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            context,
            connection_name: config.connection_name,
            shared: Arc::new(Shared {
                link: ArcSwap::from_pointee(Link::Disconnected),
                state_tx,
                subscription: Mutex::new(None),
                tags: config.tags,
            }),
        }
    }

    /// Connects to `target`, or to the runtime's default context.
    ///
    /// Replaces any current connection.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::NotListening` before `subscribe`, or the
    /// host error when no context accepts connections there.
    pub fn connect(&self, target: Option<EndpointId>) -> Result<(), TransportError> {
        let Some((sink, token)) = self.shared.subscription() else {
            return Err(TransportError::NotListening);
        };
        if let Link::Connected(old) = &*self.shared.set(Link::Connecting) {
            old.disconnect(Some("reconnecting"));
        }
        match self.context.connect(&self.connection_name, target) {
            Ok(port) => {
                self.shared.attach(port, sink, &token);
                Ok(())
            }
            Err(err) => {
                tracing::debug!(error = %err, "connect failed");
                self.shared.set(Link::Disconnected);
                Err(err.into())
            }
        }
    }

    /// Closes the current connection, if any.
    pub fn disconnect(&self) {
        if let Link::Connected(handle) = &*self.shared.set(Link::Disconnected) {
            handle.disconnect(None);
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.link.load().state()
    }

    /// Receiver notified on every state transition.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Waits until the connection is established.
    pub async fn connected(&self) {
        let mut rx = self.state_receiver();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|state| *state == ConnectionState::Connected).await;
    }

    fn current(&self) -> Result<Arc<PortHandle>, TransportError> {
        match &**self.shared.link.load() {
            Link::Connected(handle) => Ok(Arc::clone(handle)),
            Link::Disconnected | Link::Connecting => Err(TransportError::NotConnected),
        }
    }
}

#[async_trait]
impl Transport for ConnectionTransport {
    type Sender = Arc<PortHandle>;

    async fn transmit(
        &self,
        request: &RequestEnvelope,
        _endpoint: Option<EndpointId>,
    ) -> Result<(), TransportError> {
        let handle = self.current()?;
        handle.post_message(&self.shared.tags.tag_request(request)?)?;
        Ok(())
    }

    async fn transmit_response(
        &self,
        response: &ResponseEnvelope,
        sender: &Arc<PortHandle>,
    ) -> Result<(), TransportError> {
        sender.post_message(&self.shared.tags.tag_response(response)?)?;
        Ok(())
    }

    fn subscribe(&self, sink: Sink) -> Result<Listener, TransportError> {
        let mut offers = self.context.on_connect();
        let mut listener = Listener::new(CancellationToken::new());
        let token = listener.token().clone();
        if let Some(previous) = self.shared.subscription.lock().replace(Subscription {
            sink: Arc::clone(&sink),
            token: token.clone(),
        }) {
            previous.token.cancel();
        }

        let shared = Arc::clone(&self.shared);
        let name = self.connection_name.clone();
        listener.spawn(async move {
            while let Some(offer) = offers.recv().await {
                if offer.name() != name {
                    tracing::trace!(offered = offer.name(), expected = %name, "ignoring connection with another name");
                    continue;
                }
                if let Some(port) = offer.accept() {
                    shared.attach(port, Arc::clone(&sink), &token);
                }
            }
        });
        Ok(listener)
    }
}
