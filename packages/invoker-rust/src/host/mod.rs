//! In-process models of the physical channels the transports bind to.
//!
//! Each host primitive delivers a message to its listeners exactly once or
//! not at all. None of them know about envelopes: they move opaque
//! structured values (or, for ports, binary frames) and nothing else.

pub mod document;
pub mod listeners;
pub mod port;
pub mod runtime;
pub mod window;

pub use document::{CustomEvent, Document};
pub use port::{OutboundMessage, Port, PortError, PortHandle, PortId, PortReceiver, PortRegistry};
pub use runtime::{Context, Delivery, EndpointId, IncomingPort, MessageSender, Runtime};
pub use window::{Frame, MessageEvent, Window, WindowId, WindowRef};

/// Configuration shared by the host channels.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Bounded capacity of each direction of a port.
    pub port_capacity: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self { port_capacity: 256 }
    }
}

/// Errors raised by the host channels themselves.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("could not establish connection: receiving end {endpoint} does not exist")]
    NoReceivingEnd { endpoint: EndpointId },
    #[error("no such endpoint: {0}")]
    NoSuchEndpoint(EndpointId),
    #[error("no default endpoint is registered")]
    NoDefaultEndpoint,
    #[error(transparent)]
    Port(#[from] PortError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_config_defaults() {
        assert_eq!(HostConfig::default().port_capacity, 256);
    }
}
