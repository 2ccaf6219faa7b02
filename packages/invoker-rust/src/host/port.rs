//! Named bidirectional ports between two runtime contexts.
//!
//! Each direction is a bounded mpsc channel carrying `MsgPack` frames. Both
//! ends share one cancellation token, so disconnecting either end closes the
//! port for both. Open ports are tracked lock-free in a `PortRegistry`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use portcall_core::{decode_frame, encode_frame, CodecError};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::runtime::EndpointId;

/// Identifier of a port pair, assigned by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(pub u64);

/// Frame travelling over one direction of a port.
#[derive(Debug)]
pub enum OutboundMessage {
    /// A `MsgPack`-encoded payload.
    Binary(Vec<u8>),
    /// A close frame with an optional reason.
    Close(Option<String>),
}

/// Error returned when posting to a port fails.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("port is disconnected")]
    Disconnected,
    #[error("port buffer is full")]
    Full,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Sending half of one port end, plus its metadata.
#[derive(Debug)]
pub struct PortHandle {
    /// Pair identifier, shared by both ends.
    pub id: PortId,
    /// Connection name chosen by the initiator.
    pub name: String,
    /// Context on the other end of the port.
    pub remote: EndpointId,
    /// When the port was opened.
    pub connected_at: Instant,
    tx: mpsc::Sender<OutboundMessage>,
    closed: CancellationToken,
}

impl PortHandle {
    /// Encodes and enqueues a payload for the other end without blocking.
    ///
    /// # Errors
    ///
    /// Returns `PortError::Disconnected` once either end has disconnected,
    /// `PortError::Full` if the other end is not draining its buffer.
    pub fn post_message(&self, payload: &Value) -> Result<(), PortError> {
        if self.closed.is_cancelled() {
            return Err(PortError::Disconnected);
        }
        let frame = encode_frame(payload)?;
        self.tx
            .try_send(OutboundMessage::Binary(frame))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => PortError::Full,
                mpsc::error::TrySendError::Closed(_) => PortError::Disconnected,
            })
    }

    /// Closes the port for both ends. Idempotent.
    pub fn disconnect(&self, reason: Option<&str>) {
        if self.closed.is_cancelled() {
            return;
        }
        // Best effort: a full or closed buffer just loses the reason.
        let _ = self
            .tx
            .try_send(OutboundMessage::Close(reason.map(str::to_string)));
        self.closed.cancel();
    }

    /// Returns `true` while neither end has disconnected or been dropped.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.closed.is_cancelled() && !self.tx.is_closed()
    }
}

/// Receiving half of one port end.
#[derive(Debug)]
pub struct PortReceiver {
    rx: mpsc::Receiver<OutboundMessage>,
    closed: CancellationToken,
}

impl PortReceiver {
    /// Waits for the next payload. Returns `None` once the port is closed.
    ///
    /// Undecodable frames are skipped.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            let message = tokio::select! {
                // Drain what is already queued (including a close frame)
                // before honouring the shared cancellation.
                biased;
                message = self.rx.recv() => message,
                () = self.closed.cancelled() => None,
            };

            match message {
                Some(OutboundMessage::Binary(bytes)) => match decode_frame(&bytes) {
                    Ok(payload) => return Some(payload),
                    Err(err) => tracing::trace!(error = %err, "skipping undecodable port frame"),
                },
                Some(OutboundMessage::Close(reason)) => {
                    tracing::debug!(reason = ?reason, "port closed by peer");
                    self.closed.cancel();
                    return None;
                }
                None => {
                    self.closed.cancel();
                    return None;
                }
            }
        }
    }
}

/// One end of an open port.
#[derive(Debug)]
pub struct Port {
    pub handle: Arc<PortHandle>,
    pub receiver: PortReceiver,
}

impl Port {
    /// Splits the port into its sending handle and receiver.
    #[must_use]
    pub fn split(self) -> (Arc<PortHandle>, PortReceiver) {
        (self.handle, self.receiver)
    }
}

/// Registry of all ports opened through one runtime.
#[derive(Debug)]
pub struct PortRegistry {
    ports: DashMap<PortId, Arc<PortHandle>>,
    next_id: AtomicU64,
}

impl PortRegistry {
    /// Creates an empty registry. Port ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ports: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Opens a port pair between `initiator` and `acceptor`.
    ///
    /// The first returned end belongs to the initiator, the second to the acceptor.
    pub fn open(
        &self,
        name: &str,
        initiator: EndpointId,
        acceptor: EndpointId,
        capacity: usize,
    ) -> (Port, Port) {
        let id = PortId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let closed = CancellationToken::new();
        let (to_acceptor, acceptor_rx) = mpsc::channel(capacity);
        let (to_initiator, initiator_rx) = mpsc::channel(capacity);
        let connected_at = Instant::now();

        let initiator_handle = Arc::new(PortHandle {
            id,
            name: name.to_string(),
            remote: acceptor,
            connected_at,
            tx: to_acceptor,
            closed: closed.clone(),
        });
        let acceptor_handle = Arc::new(PortHandle {
            id,
            name: name.to_string(),
            remote: initiator,
            connected_at,
            tx: to_initiator,
            closed: closed.clone(),
        });

        self.ports.insert(id, Arc::clone(&initiator_handle));

        (
            Port {
                handle: initiator_handle,
                receiver: PortReceiver {
                    rx: initiator_rx,
                    closed: closed.clone(),
                },
            },
            Port {
                handle: acceptor_handle,
                receiver: PortReceiver {
                    rx: acceptor_rx,
                    closed,
                },
            },
        )
    }

    /// Looks up a port by id.
    pub fn get(&self, id: PortId) -> Option<Arc<PortHandle>> {
        self.ports.get(&id).map(|r| r.value().clone())
    }

    /// Returns the number of ports that are still connected.
    #[must_use]
    pub fn count(&self) -> usize {
        self.ports
            .iter()
            .filter(|entry| entry.value().is_connected())
            .count()
    }

    /// Forgets ports that have disconnected.
    pub fn prune(&self) {
        self.ports.retain(|_, handle| handle.is_connected());
    }

    /// Disconnects and removes every port. Returns how many were open.
    pub fn drain_all(&self, reason: &str) -> usize {
        let keys: Vec<PortId> = self.ports.iter().map(|entry| *entry.key()).collect();

        let mut open = 0;
        for key in keys {
            if let Some((_, handle)) = self.ports.remove(&key) {
                if handle.is_connected() {
                    open += 1;
                }
                handle.disconnect(Some(reason));
            }
        }
        open
    }
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}
