//! Serialization for push-channel frames.
//!
//! Frames are postcard-encoded. The length-prefixed variants are for
//! stream transports that do not preserve message boundaries; WebSocket
//! binary frames carry the plain encoding.

use crate::event::ChannelFrame;

/// Error type for frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Frame is incomplete or has an invalid length prefix.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Encodes a [`ChannelFrame`] into a byte vector.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode(frame: &ChannelFrame) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`ChannelFrame`] from a byte slice.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not a valid frame.
pub fn decode(bytes: &[u8]) -> Result<ChannelFrame, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`ChannelFrame`] with a 4-byte little-endian length prefix.
///
/// Wire format: `[u32 length (LE)][payload bytes]`
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized,
/// or `CodecError::InvalidFrame` if the payload exceeds `u32::MAX` bytes.
pub fn encode_framed(frame: &ChannelFrame) -> Result<Vec<u8>, CodecError> {
    let payload = encode(frame)?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        CodecError::InvalidFrame(format!(
            "payload too large for framing: {} bytes",
            payload.len()
        ))
    })?;
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decodes one length-prefixed frame.
///
/// Returns the frame and the number of bytes consumed, prefix included.
///
/// # Errors
///
/// Returns `CodecError::InvalidFrame` if the input is shorter than the
/// prefix announces, or `CodecError::Serialization` if the payload is not
/// a valid frame.
pub fn decode_framed(bytes: &[u8]) -> Result<(ChannelFrame, usize), CodecError> {
    let Some(prefix) = bytes.get(..4) else {
        return Err(CodecError::InvalidFrame(format!(
            "need at least 4 bytes for length prefix, got {}",
            bytes.len()
        )));
    };
    let len_bytes: [u8; 4] = prefix
        .try_into()
        .map_err(|_| CodecError::InvalidFrame("failed to read length prefix".into()))?;
    let payload_len = u32::from_le_bytes(len_bytes) as usize;

    let total_len = 4 + payload_len;
    let Some(payload) = bytes.get(4..total_len) else {
        return Err(CodecError::InvalidFrame(format!(
            "frame indicates {} bytes but only {} available",
            payload_len,
            bytes.len() - 4
        )));
    };

    Ok((decode(payload)?, total_len))
}
