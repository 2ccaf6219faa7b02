//! Transport adapters binding the engine to physical channels.
//!
//! The engine only needs two things from a channel: sending a tagged
//! envelope (`transmit` / `transmit_response`) and delivering decoded inbound
//! envelopes to it (`subscribe`). Each adapter owns its channel plumbing and
//! nothing else; all correlation state stays in the engine.

pub mod config;
pub mod connection;
pub mod event_bus;
pub mod relay;
pub mod window;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use portcall_core::{CodecError, Inbound, RequestEnvelope, ResponseEnvelope};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::host::{EndpointId, HostError, PortError};

pub use config::{ConnectionConfig, EventBusConfig, RelayConfig, WindowConfig};
pub use connection::{ConnectionState, ConnectionTransport};
pub use event_bus::EventBusTransport;
pub use relay::RelayTransport;
pub use window::{Peer, WindowTransport};

/// Errors raised while moving envelopes over a channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The persistent connection is not established.
    #[error("not connected")]
    NotConnected,
    /// `connect` was called before the transport was subscribed.
    #[error("transport is not listening; call listen() before connect()")]
    NotListening,
    /// The target window could not be resolved or has been closed.
    #[error("peer window is unavailable")]
    PeerUnavailable,
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Port(PortError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<PortError> for TransportError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Disconnected => Self::NotConnected,
            other => Self::Port(other),
        }
    }
}

/// Receives the envelopes a transport decodes from its channel.
///
/// `sender` identifies where a response to `request` must go; `None` means
/// the channel gave no way to answer.
pub trait InboundSink<S>: Send + Sync + 'static {
    fn on_request(&self, request: RequestEnvelope, sender: Option<S>);
    fn on_response(&self, response: ResponseEnvelope);
}

/// Routes a classified payload to the matching sink callback.
pub(crate) fn dispatch<S: 'static>(sink: &dyn InboundSink<S>, inbound: Inbound, sender: Option<S>) {
    match inbound {
        Inbound::Request(request) => sink.on_request(request, sender),
        Inbound::Response(response) => sink.on_response(response),
    }
}

/// A physical channel adapted to the two primitives the engine needs.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Channel-specific handle identifying the origin of a request.
    type Sender: Clone + fmt::Debug + Send + Sync + 'static;

    /// Sends a request. `endpoint` addresses a specific peer on channels
    /// that support it and is ignored elsewhere.
    async fn transmit(
        &self,
        request: &RequestEnvelope,
        endpoint: Option<EndpointId>,
    ) -> Result<(), TransportError>;

    /// Sends a response back to the origin of a request.
    async fn transmit_response(
        &self,
        response: &ResponseEnvelope,
        sender: &Self::Sender,
    ) -> Result<(), TransportError>;

    /// Starts delivering inbound envelopes to `sink`.
    ///
    /// Registration with the channel happens before this returns; the
    /// returned guard stops delivery when dropped.
    fn subscribe(&self, sink: Arc<dyn InboundSink<Self::Sender>>) -> Result<Listener, TransportError>;
}

/// Guard for an active subscription.
///
/// Dropping it (or calling [`unlisten`](Self::unlisten)) cancels its token
/// and aborts its tasks.
#[must_use = "dropping a Listener unsubscribes it immediately"]
#[derive(Debug)]
pub struct Listener {
    token: CancellationToken,
    tasks: Vec<AbortHandle>,
    armed: bool,
}

impl Listener {
    /// Creates a guard around `token` with no tasks yet.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            tasks: Vec::new(),
            armed: true,
        }
    }

    /// Spawns `task` onto the current runtime, bound to this listener.
    ///
    /// The task is stopped at its next await point once the listener is
    /// cancelled.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(spawn_until_cancelled(self.token.clone(), task));
    }

    /// The token cancelled when this listener stops.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns `true` until the listener is cancelled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Stops the subscription.
    pub fn unlisten(self) {}

    /// Keeps the subscription alive for the rest of the process.
    pub fn detach(mut self) {
        self.armed = false;
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.token.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Spawns `task` so that it ends when `token` is cancelled.
pub(crate) fn spawn_until_cancelled<F>(token: CancellationToken, task: F) -> AbortHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            biased;
            () = token.cancelled() => {}
            () = task => {}
        }
    })
    .abort_handle()
}
