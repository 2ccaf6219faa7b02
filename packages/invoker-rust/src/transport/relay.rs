//! One-shot relay messaging between runtime contexts.
//!
//! Every envelope is an independent `send_message`. Requests go to the
//! endpoint named by the call, the configured default, or (with neither)
//! to every other context. Responses go back to the requesting endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use portcall_core::{MessageTags, RequestEnvelope, ResponseEnvelope};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::config::RelayConfig;
use super::{dispatch, InboundSink, Listener, Transport, TransportError};
use crate::host::{Context, EndpointId, MessageSender};

/// Transport over the one-shot messages of a runtime [`Context`].
#[derive(Debug)]
pub struct RelayTransport {
    context: Arc<Context>,
    default_endpoint: Option<EndpointId>,
    tags: MessageTags,
}

impl RelayTransport {
    pub fn new(context: Arc<Context>, config: RelayConfig) -> Self {
        Self {
            context,
            default_endpoint: config.default_endpoint,
            tags: config.tags,
        }
    }

    fn send(&self, target: Option<EndpointId>, message: Value) -> Result<(), TransportError> {
        let reached = self.context.send_message(target, message)?;
        if reached == 0 {
            tracing::debug!(endpoint = ?target, "relay message reached no listener");
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for RelayTransport {
    type Sender = MessageSender;

    async fn transmit(
        &self,
        request: &RequestEnvelope,
        endpoint: Option<EndpointId>,
    ) -> Result<(), TransportError> {
        let target = endpoint.or(self.default_endpoint);
        self.send(target, self.tags.tag_request(request)?)
    }

    async fn transmit_response(
        &self,
        response: &ResponseEnvelope,
        sender: &MessageSender,
    ) -> Result<(), TransportError> {
        self.send(Some(sender.endpoint), self.tags.tag_response(response)?)
    }

    fn subscribe(&self, sink: Arc<dyn InboundSink<MessageSender>>) -> Result<Listener, TransportError> {
        let mut deliveries = self.context.on_message();
        let tags = self.tags.clone();
        let mut listener = Listener::new(CancellationToken::new());
        listener.spawn(async move {
            while let Some(delivery) = deliveries.recv().await {
                if let Some(inbound) = tags.classify(&delivery.message) {
                    dispatch(sink.as_ref(), inbound, Some(delivery.sender));
                }
            }
        });
        Ok(listener)
    }
}
