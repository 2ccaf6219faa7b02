//! Call descriptions and cancellation signals.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use portcall_core::{CorrelationKey, FuncName};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::host::EndpointId;

const DEFAULT_ABORT_REASON: &str = "aborted";

/// External cancellation for one or more calls.
///
/// Clones share state: aborting any clone aborts them all. Waiting on the
/// signal registers nothing that outlives the wait, so a long-lived signal
/// can be reused across any number of calls.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Aborts the signal. The first reason given wins.
    pub fn abort(&self, reason: impl Into<String>) {
        {
            let mut slot = self.reason.lock();
            if slot.is_none() {
                *slot = Some(reason.into());
            }
        }
        self.token.cancel();
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The abort reason, once aborted.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        if self.is_aborted() {
            Some(self.reason_or_default())
        } else {
            None
        }
    }

    /// Resolves with the reason once the signal is aborted.
    pub async fn aborted(&self) -> String {
        self.token.cancelled().await;
        self.reason_or_default()
    }

    fn reason_or_default(&self) -> String {
        self.reason
            .lock()
            .clone()
            .unwrap_or_else(|| DEFAULT_ABORT_REASON.to_string())
    }
}

/// A call to a remote function.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub func: FuncName,
    pub args: Vec<Value>,
    /// `false` sends the call fire-and-forget.
    pub reply: bool,
    pub timeout: Option<Duration>,
    pub signal: Option<AbortSignal>,
    /// Correlation key; generated when `None`.
    pub key: Option<CorrelationKey>,
    /// Only an engine with this name handles the call.
    pub target_name: Option<String>,
    /// Peer addressing for transports that support it.
    pub endpoint: Option<EndpointId>,
}

impl InvokeRequest {
    pub fn new(func: impl Into<FuncName>) -> Self {
        Self {
            func: func.into(),
            args: Vec::new(),
            reply: true,
            timeout: None,
            signal: None,
            key: None,
            target_name: None,
            endpoint: None,
        }
    }

    #[must_use]
    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn no_reply(mut self) -> Self {
        self.reply = false;
        self
    }

    /// Fails the call if no response arrives within `timeout`. Zero disables
    /// the timeout, including any configured default.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<CorrelationKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn target(mut self, name: impl Into<String>) -> Self {
        self.target_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn endpoint(mut self, endpoint: EndpointId) -> Self {
        self.endpoint = Some(endpoint);
        self
    }
}
