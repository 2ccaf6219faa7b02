//! Same-document event bus.
//!
//! Envelopes travel in the wrapped layout as the detail of one custom event
//! type. Every listener on the document sees every event, including the
//! dispatcher's own, so the engine's self-echo suppression does the
//! filtering. There is no connection state; the bus is always up.

use std::sync::Arc;

use async_trait::async_trait;
use portcall_core::{MessageTags, RequestEnvelope, ResponseEnvelope};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::config::EventBusConfig;
use super::{dispatch, InboundSink, Listener, Transport, TransportError};
use crate::host::{Document, EndpointId};

/// Transport over a shared [`Document`].
#[derive(Debug)]
pub struct EventBusTransport {
    document: Arc<Document>,
    event_type: String,
    tags: MessageTags,
}

impl EventBusTransport {
    /// Creates an event bus transport for the engine called `engine_name`.
    pub fn new(document: Arc<Document>, engine_name: &str, config: EventBusConfig) -> Self {
        let event_type = if config.event_type.is_empty() {
            engine_name.to_string()
        } else {
            config.event_type
        };
        Self {
            document,
            event_type,
            tags: config.tags,
        }
    }

    /// The custom event type this transport dispatches and observes.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    fn emit(&self, detail: Value) {
        let reached = self.document.dispatch_event(&self.event_type, detail);
        tracing::trace!(event_type = %self.event_type, reached, "dispatched envelope");
    }
}

#[async_trait]
impl Transport for EventBusTransport {
    type Sender = ();

    async fn transmit(
        &self,
        request: &RequestEnvelope,
        _endpoint: Option<EndpointId>,
    ) -> Result<(), TransportError> {
        self.emit(self.tags.wrap_request(request)?);
        Ok(())
    }

    async fn transmit_response(
        &self,
        response: &ResponseEnvelope,
        _sender: &(),
    ) -> Result<(), TransportError> {
        self.emit(self.tags.wrap_response(response)?);
        Ok(())
    }

    fn subscribe(&self, sink: Arc<dyn InboundSink<()>>) -> Result<Listener, TransportError> {
        let mut events = self.document.add_event_listener(&self.event_type);
        let tags = self.tags.clone();
        let mut listener = Listener::new(CancellationToken::new());
        listener.spawn(async move {
            while let Some(event) = events.recv().await {
                if let Some(inbound) = tags.classify_wrapped(&event.detail) {
                    dispatch(sink.as_ref(), inbound, Some(()));
                }
            }
        });
        Ok(listener)
    }
}
