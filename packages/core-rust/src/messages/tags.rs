//! Message-type tagging and demultiplexing for shared channels.
//!
//! Several physical channels carry unrelated traffic next to invocation
//! envelopes, so every outgoing envelope is tagged with a `type`
//! discriminator and every incoming payload is classified by it. Payloads
//! that are not objects, carry an unknown tag, or fail to decode are foreign
//! and yield `None`; they are never reported as errors.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::codec::CodecError;

/// Name of the discriminator field added to every outgoing envelope.
pub const TYPE_FIELD: &str = "type";

/// Field holding the envelope in the wrapped (`{type, message}`) layout.
pub const MESSAGE_FIELD: &str = "message";

/// Default tag for request envelopes.
pub const DEFAULT_REQUEST_TAG: &str = "invoke-request";

/// Default tag for response envelopes.
pub const DEFAULT_RESPONSE_TAG: &str = "invoke-response";

/// A recognized envelope demultiplexed from a channel payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
}

/// The pair of `type` strings an engine uses on its channel.
///
/// Overriding them lets independent engines share one physical channel
/// without seeing each other's traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTags {
    pub request: String,
    pub response: String,
}

impl Default for MessageTags {
    fn default() -> Self {
        Self {
            request: DEFAULT_REQUEST_TAG.to_string(),
            response: DEFAULT_RESPONSE_TAG.to_string(),
        }
    }
}

impl MessageTags {
    /// Creates tags with custom request/response strings.
    pub fn new(request: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            response: response.into(),
        }
    }

    /// Encodes a request as a flat object: `{type, ...envelope}`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the envelope cannot be represented as a JSON object.
    pub fn tag_request(&self, envelope: &RequestEnvelope) -> Result<Value, CodecError> {
        flatten(&self.request, envelope)
    }

    /// Encodes a response as a flat object: `{type, ...envelope}`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the envelope cannot be represented as a JSON object.
    pub fn tag_response(&self, envelope: &ResponseEnvelope) -> Result<Value, CodecError> {
        flatten(&self.response, envelope)
    }

    /// Encodes a request in the wrapped layout: `{type, message: envelope}`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the envelope cannot be serialized.
    pub fn wrap_request(&self, envelope: &RequestEnvelope) -> Result<Value, CodecError> {
        wrap(&self.request, envelope)
    }

    /// Encodes a response in the wrapped layout: `{type, message: envelope}`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the envelope cannot be serialized.
    pub fn wrap_response(&self, envelope: &ResponseEnvelope) -> Result<Value, CodecError> {
        wrap(&self.response, envelope)
    }

    /// Classifies a flat payload produced by [`tag_request`](Self::tag_request)
    /// or [`tag_response`](Self::tag_response).
    #[must_use]
    pub fn classify(&self, payload: &Value) -> Option<Inbound> {
        let object = payload.as_object()?;
        let tag = object.get(TYPE_FIELD)?.as_str()?;
        let mut fields = object.clone();
        fields.remove(TYPE_FIELD);
        self.decode_tagged(tag, Value::Object(fields))
    }

    /// Classifies a wrapped payload produced by [`wrap_request`](Self::wrap_request)
    /// or [`wrap_response`](Self::wrap_response).
    #[must_use]
    pub fn classify_wrapped(&self, payload: &Value) -> Option<Inbound> {
        let object = payload.as_object()?;
        let tag = object.get(TYPE_FIELD)?.as_str()?;
        let message = object.get(MESSAGE_FIELD)?.clone();
        self.decode_tagged(tag, message)
    }

    fn decode_tagged(&self, tag: &str, body: Value) -> Option<Inbound> {
        if tag == self.request {
            decode(tag, body).map(Inbound::Request)
        } else if tag == self.response {
            decode(tag, body).map(Inbound::Response)
        } else {
            tracing::trace!(tag, "ignoring payload with foreign type tag");
            None
        }
    }
}

fn flatten<T: Serialize>(tag: &str, envelope: &T) -> Result<Value, CodecError> {
    let Value::Object(mut fields) = serde_json::to_value(envelope)? else {
        return Err(CodecError::NotAnObject);
    };
    fields.insert(TYPE_FIELD.to_string(), Value::String(tag.to_string()));
    Ok(Value::Object(fields))
}

fn wrap<T: Serialize>(tag: &str, envelope: &T) -> Result<Value, CodecError> {
    let mut fields = Map::new();
    fields.insert(TYPE_FIELD.to_string(), Value::String(tag.to_string()));
    fields.insert(MESSAGE_FIELD.to_string(), serde_json::to_value(envelope)?);
    Ok(Value::Object(fields))
}

fn decode<T: DeserializeOwned>(tag: &str, body: Value) -> Option<T> {
    match serde_json::from_value(body) {
        Ok(envelope) => Some(envelope),
        Err(err) => {
            tracing::trace!(tag, error = %err, "ignoring malformed envelope");
            None
        }
    }
}
