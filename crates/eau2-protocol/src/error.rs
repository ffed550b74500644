use thiserror::Error;

use crate::payload::PayloadType;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown message kind: {0}")]
    UnknownMessageKind(u8),

    #[error("invalid payload type: {0}")]
    InvalidPayloadType(u8),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("truncated input: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("unexpected payload: expected {expected}, got {actual:?}")]
    UnexpectedPayload {
        expected: &'static str,
        actual: PayloadType,
    },

    #[error("string contains an interior NUL byte: {0:?}")]
    InteriorNul(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the stream the error came from can no longer be trusted.
    ///
    /// An unknown kind byte only costs the 25-byte header that carried it;
    /// every other decode failure leaves the reader at an unknown offset.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::UnknownMessageKind(_))
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unknown_kind_is_recoverable() {
        assert!(!ProtocolError::UnknownMessageKind(42).is_fatal());
        assert!(ProtocolError::Truncated { needed: 8, available: 2 }.is_fatal());
        assert!(ProtocolError::InvalidPayloadType(99).is_fatal());
        assert!(ProtocolError::Malformed("x".into()).is_fatal());
    }

    #[test]
    fn display_messages() {
        let err = ProtocolError::MessageTooLarge { size: 10, max: 5 };
        assert_eq!(err.to_string(), "message too large: 10 bytes (max 5)");
        let err = ProtocolError::UnexpectedPayload {
            expected: "key",
            actual: PayloadType::U8,
        };
        assert_eq!(err.to_string(), "unexpected payload: expected key, got U8");
    }
}
