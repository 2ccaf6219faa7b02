//! `MsgPack` framing for channels that carry binary frames.
//!
//! Structured payloads are encoded with `rmp_serde::to_vec_named()` so map
//! keys survive the trip, matching what a peer without the Rust types expects.

use serde_json::Value;

/// Errors raised while encoding or decoding envelopes and frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode frame: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("failed to convert envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("envelope did not serialize to an object")]
    NotAnObject,
}

/// Encodes a structured payload into a binary frame.
///
/// # Errors
///
/// Returns `CodecError::Encode` if the value cannot be serialized.
pub fn encode_frame(payload: &Value) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(payload)?)
}

/// Decodes a binary frame back into a structured payload.
///
/// # Errors
///
/// Returns `CodecError::Decode` if the bytes are not valid `MsgPack`.
pub fn decode_frame(bytes: &[u8]) -> Result<Value, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
