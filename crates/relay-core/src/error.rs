//! # Core Error Types
//!
//! Pure-domain errors. I/O-flavored failures (durability, transport) live
//! in relay-db and relay-sync; this crate only fails on malformed data.

use thiserror::Error;

/// Errors from the pure core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An entity type tag outside the closed set.
    #[error("Unknown entity type: '{0}'")]
    UnknownEntityType(String),

    /// A snapshot payload that does not decode into the tagged union.
    #[error("Snapshot decode failed: {0}")]
    SnapshotDecode(String),

    /// A snapshot that does not encode (should not happen for valid data).
    #[error("Snapshot encode failed: {0}")]
    SnapshotEncode(String),
}

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_context() {
        let err = CoreError::UnknownEntityType("giftcard".into());
        assert!(err.to_string().contains("giftcard"));
    }
}
