//! # Sync Error Types
//!
//! Error types for the sync engine.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Error Categories                                   │
//! │                                                                         │
//! │  RETRYABLE (cycle moves to Failed, retried with backoff)               │
//! │  ─────────────────────────────────────────────────────                 │
//! │  • Transport: network unreachable, authority 5xx                       │
//! │  • Timeout: request exceeded the configured deadline                   │
//! │                                                                         │
//! │  NOT RETRYABLE (fix required before sync can proceed)                  │
//! │  ─────────────────────────────────────────────────────                 │
//! │  • Auth: credentials rejected                                          │
//! │  • Database: local persistence failure                                 │
//! │  • Serialization: payload doesn't decode                               │
//! │  • InvalidConfig: bad settings                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport-level failure (network down, authority unreachable, 5xx).
    #[error("Transport error: {0}")]
    Transport(String),

    /// A transport call exceeded the configured deadline.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The authority rejected this device's credentials.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Local database failure.
    #[error("Database error: {0}")]
    Database(#[from] relay_db::DbError),

    /// JSON encode/decode failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A downloaded or recovered entry could not be applied.
    #[error("Failed to apply entry {entry_id}: {message}")]
    ApplyFailed { entry_id: String, message: String },

    /// Startup recovery could not complete.
    #[error("Recovery failed: {0}")]
    RecoveryFailed(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Config file could not be read or parsed.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Config file could not be written.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),
}

impl SyncError {
    /// Whether a failed cycle should be retried with backoff.
    ///
    /// Transport and timeout failures are transient; everything else needs
    /// intervention and retrying would just burn the battery.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::Timeout(_))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_timeout_are_retryable() {
        assert!(SyncError::Transport("connection refused".into()).is_retryable());
        assert!(SyncError::Timeout(30).is_retryable());
    }

    #[test]
    fn auth_and_config_are_not_retryable() {
        assert!(!SyncError::Auth("bad token".into()).is_retryable());
        assert!(!SyncError::InvalidConfig("batch_size = 0".into()).is_retryable());
    }
}
