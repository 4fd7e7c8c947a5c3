//! Transport encoding for agent audio: payloads travel as base64 text.

use crate::error::CodecError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Decode an agent audio payload into raw container bytes (MP3/WAV/...).
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, CodecError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(STANDARD.decode(payload)?)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
