//! Codec for encoding and decoding Relay frames.
//!
//! Frames are JSON documents carried in WebSocket text messages, so there is
//! no length prefix; the transport already delimits messages.

use thiserror::Error;

use crate::envelope::{Inbound, Outbound};

/// Default maximum frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the configured maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary frame that is not UTF-8.
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Encode an outbound frame to JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(frame: &Outbound) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode and classify an inbound text frame using [`MAX_FRAME_SIZE`].
///
/// # Errors
///
/// Returns an error if the frame is too large or is not JSON.
pub fn decode(text: &str) -> Result<Inbound, ProtocolError> {
    FrameCodec::new().decode(text)
}

/// Codec carrying the frame size limit for one server.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl FrameCodec {
    /// Create a new codec instance with the default limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with a custom frame size limit.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// The configured frame size limit.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a frame to text.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, frame: &Outbound) -> Result<String, ProtocolError> {
        encode(frame)
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or not JSON.
    pub fn decode(&self, text: &str) -> Result<Inbound, ProtocolError> {
        if text.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: text.len(),
                max: self.max_frame_size,
            });
        }

        let value: serde_json::Value = serde_json::from_str(text)?;
        Ok(Inbound::classify(value))
    }

    /// Decode a binary frame holding UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large, not UTF-8, or not JSON.
    pub fn decode_bytes(&self, data: &[u8]) -> Result<Inbound, ProtocolError> {
        let text = std::str::from_utf8(data).map_err(|_| ProtocolError::InvalidUtf8)?;
        self.decode(text)
    }
}
