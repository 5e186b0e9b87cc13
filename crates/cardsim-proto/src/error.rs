//! Framing error types.

use thiserror::Error;

/// Errors raised while building, encoding or decoding APDU bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// Input shorter than the minimum frame for its kind.
    #[error("truncated frame: need at least {needed} bytes, got {actual}")]
    Truncated {
        /// Minimum number of bytes required.
        needed: usize,
        /// Number of bytes supplied.
        actual: usize,
    },

    /// Command data cannot be expressed with a one-byte Lc.
    #[error("data field too long for short APDU: {len} bytes (max 255)")]
    DataTooLong {
        /// Length of the rejected data field.
        len: usize,
    },

    /// Lc disagrees with the number of bytes following the header.
    #[error("length mismatch: Lc={lc} but {actual} bytes follow the header")]
    LengthMismatch {
        /// Declared data length.
        lc: u8,
        /// Bytes actually present after the header.
        actual: usize,
    },

    /// Hex text could not be parsed.
    #[error("invalid hex: {reason}")]
    InvalidHex {
        /// Parser diagnostic.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = FramingError::Truncated { needed: 2, actual: 1 };
        assert_eq!(err.to_string(), "truncated frame: need at least 2 bytes, got 1");
    }

    #[test]
    fn length_mismatch_display() {
        let err = FramingError::LengthMismatch { lc: 7, actual: 3 };
        assert_eq!(err.to_string(), "length mismatch: Lc=7 but 3 bytes follow the header");
    }
}
