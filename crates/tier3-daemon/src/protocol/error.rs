//! Wire-protocol errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame length field exceeds the protocol cap.
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// A CRC32 in the frame header does not match the received bytes.
    #[error("{field} checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        field: &'static str,
        expected: u32,
        actual: u32,
    },

    /// The payload is not a request this service understands.
    #[error("malformed request: {message}")]
    MalformedRequest { message: String },

    /// Underlying socket failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRequest {
            message: message.into(),
        }
    }
}
