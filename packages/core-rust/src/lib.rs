//! portcall core: invocation envelopes, message-type tags and frame codec.

pub mod codec;
pub mod messages;
pub mod types;

pub use codec::{decode_frame, encode_frame, CodecError};
pub use messages::{Inbound, MessageTags, RequestEnvelope, ResponseEnvelope};
pub use types::{correlation_key, CorrelationKey, FuncName, InstanceId};
