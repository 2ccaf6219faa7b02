//! An extension-style runtime hub connecting numbered contexts.
//!
//! Contexts exchange one-shot messages (`send_message`) and open named
//! ports to each other (`connect`). The first context created is the
//! default recipient, the way a background process is for its tabs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::listeners::ListenerSet;
use super::port::{Port, PortRegistry};
use super::{HostConfig, HostError};

/// Identifier of a runtime context (a background process, a tab, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub u64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who sent a one-shot message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSender {
    pub endpoint: EndpointId,
}

/// A one-shot message as seen by a listener.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: Value,
    pub sender: MessageSender,
}

/// A port offered to the connect listeners of a context.
///
/// Every listener sees the offer; the first to [`accept`](Self::accept) it
/// takes the port. An offer nobody accepts is dropped, which disconnects the
/// initiator.
#[derive(Debug)]
pub struct IncomingPort {
    name: String,
    remote: EndpointId,
    port: Mutex<Option<Port>>,
}

impl IncomingPort {
    /// Connection name chosen by the initiator.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Context that initiated the connection.
    #[must_use]
    pub fn remote(&self) -> EndpointId {
        self.remote
    }

    /// Takes the port. Returns `None` if another listener already took it.
    pub fn accept(&self) -> Option<Port> {
        self.port.lock().take()
    }
}

#[derive(Debug, Default)]
struct ContextSlot {
    messages: ListenerSet<Delivery>,
    connects: ListenerSet<Arc<IncomingPort>>,
}

/// Hub routing messages and ports between contexts.
#[derive(Debug)]
pub struct Runtime {
    config: HostConfig,
    contexts: DashMap<EndpointId, Arc<ContextSlot>>,
    next_id: AtomicU64,
    ports: PortRegistry,
}

impl Runtime {
    /// Creates an empty runtime. Context ids start at 1.
    #[must_use]
    pub fn new(config: HostConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            contexts: DashMap::new(),
            next_id: AtomicU64::new(1),
            ports: PortRegistry::new(),
        })
    }

    /// Registers a new context.
    pub fn create_context(self: &Arc<Self>) -> Context {
        let id = EndpointId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(ContextSlot::default());
        self.contexts.insert(id, Arc::clone(&slot));
        Context {
            id,
            runtime: Arc::clone(self),
            slot,
        }
    }

    /// The lowest-numbered live context, used when no target is given.
    #[must_use]
    pub fn default_endpoint(&self) -> Option<EndpointId> {
        self.contexts.iter().map(|entry| *entry.key()).min()
    }

    /// Returns the number of live contexts.
    #[must_use]
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Registry of every port opened through this runtime.
    #[must_use]
    pub fn ports(&self) -> &PortRegistry {
        &self.ports
    }

    /// Disconnects every open port. Returns how many were still connected.
    pub fn shutdown(&self, reason: &str) -> usize {
        let open = self.ports.drain_all(reason);
        tracing::debug!(open, reason, "runtime shut down");
        open
    }

    fn slot(&self, id: EndpointId) -> Option<Arc<ContextSlot>> {
        self.contexts.get(&id).map(|entry| entry.value().clone())
    }
}

/// One program instance attached to a runtime.
///
/// Dropping the context detaches it: later messages and connects addressed
/// to it fail.
#[derive(Debug)]
pub struct Context {
    id: EndpointId,
    runtime: Arc<Runtime>,
    slot: Arc<ContextSlot>,
}

impl Context {
    /// This context's endpoint id.
    #[must_use]
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// The runtime this context belongs to.
    #[must_use]
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Sends a one-shot message.
    ///
    /// With a target, only that context's listeners receive it. Without
    /// one, every other context's listeners do. Returns the number of
    /// listeners reached.
    ///
    /// # Errors
    ///
    /// Returns `HostError::NoSuchEndpoint` if the target context does not exist.
    pub fn send_message(
        &self,
        target: Option<EndpointId>,
        message: Value,
    ) -> Result<usize, HostError> {
        let delivery = Delivery {
            message,
            sender: MessageSender { endpoint: self.id },
        };

        if let Some(target) = target {
            let slot = self
                .runtime
                .slot(target)
                .ok_or(HostError::NoSuchEndpoint(target))?;
            return Ok(slot.messages.emit(&delivery));
        }

        let slots: Vec<Arc<ContextSlot>> = self
            .runtime
            .contexts
            .iter()
            .filter(|entry| *entry.key() != self.id)
            .map(|entry| entry.value().clone())
            .collect();
        Ok(slots.iter().map(|slot| slot.messages.emit(&delivery)).sum())
    }

    /// Registers a one-shot message listener.
    pub fn on_message(&self) -> mpsc::UnboundedReceiver<Delivery> {
        self.slot.messages.subscribe()
    }

    /// Opens a named port to `target`, or to the default context if `None`.
    ///
    /// The returned end is already connected; the offer reaches the target's
    /// connect listeners, and the port disconnects if none of them accepts.
    ///
    /// # Errors
    ///
    /// Returns `HostError::NoReceivingEnd` if the target does not exist, is
    /// this context itself, or has no connect listener.
    pub fn connect(&self, name: &str, target: Option<EndpointId>) -> Result<Port, HostError> {
        let target = match target {
            Some(target) => target,
            None => self
                .runtime
                .default_endpoint()
                .ok_or(HostError::NoDefaultEndpoint)?,
        };
        if target == self.id {
            return Err(HostError::NoReceivingEnd { endpoint: target });
        }
        let slot = self
            .runtime
            .slot(target)
            .ok_or(HostError::NoReceivingEnd { endpoint: target })?;
        if slot.connects.is_empty() {
            return Err(HostError::NoReceivingEnd { endpoint: target });
        }

        self.runtime.ports.prune();
        let (local, remote) =
            self.runtime
                .ports
                .open(name, self.id, target, self.runtime.config.port_capacity);
        let offer = Arc::new(IncomingPort {
            name: name.to_string(),
            remote: self.id,
            port: Mutex::new(Some(remote)),
        });
        if slot.connects.emit(&offer) == 0 {
            return Err(HostError::NoReceivingEnd { endpoint: target });
        }
        Ok(local)
    }

    /// Registers a connect listener.
    pub fn on_connect(&self) -> mpsc::UnboundedReceiver<Arc<IncomingPort>> {
        self.slot.connects.subscribe()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.runtime.contexts.remove(&self.id);
    }
}
