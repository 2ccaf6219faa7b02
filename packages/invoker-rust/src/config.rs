//! Engine configuration.

use std::time::Duration;

/// Default engine name.
pub const DEFAULT_NAME: &str = "portcall";

/// Settings for one [`Invoker`](crate::Invoker).
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    /// Logical identity. Requests targeting another name are dropped.
    pub name: String,
    /// Answer calls to unregistered functions with a failure instead of
    /// staying silent.
    pub reply_unknown_function: bool,
    /// Timeout for calls that expect a reply and set none themselves.
    pub default_timeout: Option<Duration>,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            reply_unknown_function: false,
            default_timeout: None,
        }
    }
}

impl InvokerConfig {
    /// Default settings under the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}
