//! JSON encoding for socket frames.
//!
//! Socket events travel as WebSocket text frames. Decoding enforces a frame
//! size limit before handing the text to `serde_json`.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::event::{ClientEvent, ServerEvent};

/// Largest text frame accepted by [`decode_server`] and [`decode_client`] (4 MB).
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Frame exceeds [`MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Actual frame size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: text.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(serde_json::from_str(text)?)
}

/// Encodes a [`ServerEvent`] into a text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the event cannot be serialized.
pub fn encode_server(event: &ServerEvent) -> Result<String, CodecError> {
    encode(event)
}

/// Decodes a [`ServerEvent`] from a text frame.
///
/// # Errors
///
/// Returns `CodecError::FrameTooLarge` for oversized frames, or
/// `CodecError::Serialization` for unknown events and malformed payloads.
pub fn decode_server(text: &str) -> Result<ServerEvent, CodecError> {
    decode(text)
}

/// Encodes a [`ClientEvent`] into a text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the event cannot be serialized.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    encode(event)
}

/// Decodes a [`ClientEvent`] from a text frame.
///
/// # Errors
///
/// Returns `CodecError::FrameTooLarge` for oversized frames, or
/// `CodecError::Serialization` for unknown events and malformed payloads.
pub fn decode_client(text: &str) -> Result<ClientEvent, CodecError> {
    decode(text)
}
