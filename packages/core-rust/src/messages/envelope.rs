//! Request and response envelopes exchanged between invocation engines.
//!
//! Field names follow the established wire format: the correlation key and
//! sender instance travel as `_key` / `_id`, the optional target filter as
//! `name`. Transport tagging (the `type` discriminator) is applied separately
//! by [`MessageTags`](super::MessageTags).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::types::{CorrelationKey, FuncName, InstanceId};

/// Deserializes a field that may be absent or explicitly `null`, mapping both
/// to the type's default.
fn deserialize_null_default<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: Default + Deserialize<'de>,
    D: Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

fn default_reply() -> bool {
    true
}

/// A call travelling from the caller to the callee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Function to invoke on the receiving side.
    pub func: FuncName,
    /// Positional arguments. Order is significant.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub args: Vec<Value>,
    /// `false` marks a fire-and-forget call: the callee must not respond.
    #[serde(default = "default_reply")]
    pub reply: bool,
    /// Correlation key, unique per outstanding call of the sender. Text or
    /// an integer on the wire.
    #[serde(rename = "_key")]
    pub key: CorrelationKey,
    /// Instance that produced this request, used for self-echo suppression.
    #[serde(rename = "_id")]
    pub sender_instance: InstanceId,
    /// Logical target filter. A receiver with a different name drops the call.
    #[serde(rename = "name", skip_serializing_if = "Option::is_none", default)]
    pub target_name: Option<String>,
}

/// The outcome of a call travelling back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Correlation key copied from the request, in the same form.
    pub key: CorrelationKey,
    /// Echoed function identifier, for diagnostics.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub func: Option<FuncName>,
    /// Whether the handler completed successfully.
    pub success: bool,
    /// Return value on success, error payload on failure.
    #[serde(default)]
    pub value: Value,
    /// Name of the responding engine, for diagnostics.
    #[serde(default)]
    pub name: String,
}

impl ResponseEnvelope {
    /// Builds a successful response to `request`.
    #[must_use]
    pub fn success(request: &RequestEnvelope, responder: &str, value: Value) -> Self {
        Self {
            key: request.key.clone(),
            func: Some(request.func.clone()),
            success: true,
            value,
            name: responder.to_string(),
        }
    }

    /// Builds a failed response to `request` carrying `error` as payload.
    #[must_use]
    pub fn failure(request: &RequestEnvelope, responder: &str, error: Value) -> Self {
        Self {
            key: request.key.clone(),
            func: Some(request.func.clone()),
            success: false,
            value: error,
            name: responder.to_string(),
        }
    }
}
