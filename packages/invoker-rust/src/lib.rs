//! portcall: remote-procedure invocation over narrow message channels.
//!
//! An [`Invoker`] gives two program instances uniform call semantics
//! (correlation, timeouts, cancellation, fire-and-forget) over whichever
//! [`Transport`] connects them: a shared event bus, a persistent port,
//! one-shot relay messages, or cross-window messaging.

pub mod config;
pub mod engine;
pub mod host;
pub mod telemetry;
pub mod transport;

pub use config::InvokerConfig;
pub use engine::{
    service_fn, AbortSignal, CallContext, InvokeError, InvokeRequest, Invoker, Outcome, Service,
    WaitError,
};
pub use portcall_core::{CorrelationKey, FuncName, InstanceId, MessageTags, RequestEnvelope, ResponseEnvelope};
pub use transport::{
    ConnectionConfig, ConnectionState, ConnectionTransport, EventBusConfig, EventBusTransport,
    InboundSink, Listener, Peer, RelayConfig, RelayTransport, Transport, TransportError,
    WindowConfig, WindowTransport,
};
