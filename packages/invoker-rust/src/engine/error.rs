//! Errors surfaced to callers of the engine.

use std::time::Duration;

use portcall_core::{CorrelationKey, FuncName};
use serde_json::Value;

use crate::transport::TransportError;

/// Why an `invoke` did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// No response arrived before the call's timeout.
    #[error("invoke {func} timed out after {after:?} (key {key})")]
    Timeout {
        func: FuncName,
        key: CorrelationKey,
        after: Duration,
    },
    /// The call's abort signal fired before it settled.
    #[error("invoke {func} was cancelled: {reason}")]
    Cancelled { func: FuncName, reason: String },
    /// The remote handler failed; the payload is passed through unchanged.
    #[error("remote error: {0}")]
    Remote(Value),
    /// The caller supplied a correlation key that is still pending.
    #[error("correlation key {0} is already pending")]
    DuplicateKey(CorrelationKey),
    /// The pending entry was discarded without a response.
    #[error("pending response for key {0} was dropped")]
    Closed(CorrelationKey),
    /// The request could not be sent.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl InvokeError {
    /// The remote error payload, if the callee reported a failure.
    #[must_use]
    pub fn remote_value(&self) -> Option<&Value> {
        match self {
            Self::Remote(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Why a `wait_invoke` did not observe a call.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("no call to {func} arrived within {after:?}")]
    Timeout { func: FuncName, after: Duration },
    #[error("wait for {0} was abandoned")]
    Closed(FuncName),
}
