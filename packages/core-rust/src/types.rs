use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a remotely callable function.
///
/// Peers may address functions either by name or by a numeric index; both
/// forms travel untagged so the wire value is a plain JSON string or number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FuncName {
    /// Function addressed by a string name.
    Name(String),
    /// Function addressed by a numeric index.
    Index(i64),
}

impl fmt::Display for FuncName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for FuncName {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for FuncName {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<i64> for FuncName {
    fn from(index: i64) -> Self {
        Self::Index(index)
    }
}

/// Token linking a request to its response.
///
/// Keys generated by this crate are always text. Peers may also send plain
/// integers, which are echoed back in the same form so the peer can match
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrelationKey {
    Text(String),
    Number(i64),
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(key) => f.write_str(key),
            Self::Number(key) => write!(f, "{key}"),
        }
    }
}

impl From<&str> for CorrelationKey {
    fn from(key: &str) -> Self {
        Self::Text(key.to_string())
    }
}

impl From<String> for CorrelationKey {
    fn from(key: String) -> Self {
        Self::Text(key)
    }
}

impl From<i64> for CorrelationKey {
    fn from(key: i64) -> Self {
        Self::Number(key)
    }
}

impl PartialEq<str> for CorrelationKey {
    fn eq(&self, other: &str) -> bool {
        matches!(self, Self::Text(key) if key == other)
    }
}

impl PartialEq<&str> for CorrelationKey {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

/// Random per-construction token identifying one engine instance.
///
/// Compared by value so it survives serialization across a channel. Never
/// persisted: a reloaded endpoint gets a fresh id, which keeps correlation
/// keys unique even when the call counter restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Generates a fresh random instance id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{:08x}", rand::random::<u32>()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the correlation key for the `counter`-th call of an engine.
///
/// Format: `{name}-{instance}-{counter}`.
#[must_use]
pub fn correlation_key(name: &str, instance: &InstanceId, counter: u64) -> CorrelationKey {
    CorrelationKey::Text(format!("{name}-{instance}-{counter}"))
}
