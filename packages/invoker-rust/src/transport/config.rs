//! Per-adapter configuration.

use portcall_core::MessageTags;

use crate::host::EndpointId;
use crate::host::window::ANY_ORIGIN;

/// Settings for the same-document event bus.
#[derive(Debug, Clone, Default)]
pub struct EventBusConfig {
    /// Custom event type carrying envelopes. Empty means the engine name.
    pub event_type: String,
    pub tags: MessageTags,
}

/// Settings for the persistent connection adapter.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Connection name; both ends must use the same one.
    pub connection_name: String,
    pub tags: MessageTags,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_name: "portcall".to_string(),
            tags: MessageTags::default(),
        }
    }
}

/// Settings for one-shot relay messaging.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    /// Endpoint used when a request names none. `None` broadcasts.
    pub default_endpoint: Option<EndpointId>,
    pub tags: MessageTags,
}

/// Settings for cross-window messaging.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Origin restriction applied when posting to the peer.
    pub peer_origin: String,
    /// Drop inbound messages whose origin differs from `peer_origin`.
    pub check_origin: bool,
    /// Drop inbound messages whose source is not the peer window.
    pub require_peer_source: bool,
    pub tags: MessageTags,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            peer_origin: ANY_ORIGIN.to_string(),
            check_origin: false,
            require_peer_source: false,
            tags: MessageTags::default(),
        }
    }
}
