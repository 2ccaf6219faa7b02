//! Wire protocol for invocation envelopes.
//!
//! `envelope` defines the request/response shapes; `tags` adds and strips
//! the `type` discriminator that lets envelopes share a channel with
//! unrelated traffic.

pub mod envelope;
pub mod tags;

pub use envelope::{RequestEnvelope, ResponseEnvelope};
pub use tags::{
    Inbound, MessageTags, DEFAULT_REQUEST_TAG, DEFAULT_RESPONSE_TAG, MESSAGE_FIELD, TYPE_FIELD,
};
