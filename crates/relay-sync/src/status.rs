//! # Sync Status & Events
//!
//! Observable state for the sync engine: per-shop status snapshots on
//! demand, plus a broadcast event stream for anything that wants to react
//! to cycle progress without polling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Cycle State
// =============================================================================

/// Where a shop's sync cycle currently is.
///
/// ```text
/// Idle → Uploading → Downloading → Resolving → Applying → Idle
///                 └──────────── (transport error) ────────→ Failed
/// ```
/// Failed transitions back to Uploading on the next attempt after backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Uploading,
    Downloading,
    Resolving,
    Applying,
    Failed,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Uploading => write!(f, "uploading"),
            SyncState::Downloading => write!(f, "downloading"),
            SyncState::Resolving => write!(f, "resolving"),
            SyncState::Applying => write!(f, "applying"),
            SyncState::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// Shop Health
// =============================================================================

/// Coarse health classification for a shop's sync lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShopHealth {
    /// Recent cycle succeeded, backlog is small.
    Healthy,
    /// Backlog is growing or the last cycle had partial rejections.
    Warning,
    /// The last cycle failed outright.
    Error,
    /// No successful cycle yet, or sync has never run.
    Offline,
}

/// Point-in-time status for one shop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopSyncStatus {
    pub shop_id: String,
    pub state: SyncState,
    pub health: ShopHealth,
    /// Log entries waiting for upload acknowledgment.
    pub pending_upload: i64,
    /// When the last successful cycle finished.
    pub last_sync: Option<DateTime<Utc>>,
    /// Most recent cycle error, if any.
    pub last_error: Option<String>,
}

impl ShopSyncStatus {
    /// Status for a shop that has never synced.
    pub fn offline(shop_id: impl Into<String>) -> Self {
        ShopSyncStatus {
            shop_id: shop_id.into(),
            state: SyncState::Idle,
            health: ShopHealth::Offline,
            pending_upload: 0,
            last_sync: None,
            last_error: None,
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Events broadcast by the engine as cycles progress.
///
/// Consumers subscribe via [`crate::engine::SyncEngine::subscribe`]; a slow
/// consumer only loses events for itself (tokio broadcast semantics).
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A cycle started for a shop.
    CycleStarted { shop_id: String },
    /// A cycle finished; counts describe what moved.
    CycleCompleted {
        shop_id: String,
        uploaded: usize,
        downloaded: usize,
        conflicts_resolved: usize,
    },
    /// A cycle failed; retryable errors will be retried with backoff.
    CycleFailed {
        shop_id: String,
        error: String,
        retryable: bool,
    },
    /// A conflict was detected and resolved.
    ConflictResolved {
        shop_id: String,
        entity_id: String,
        strategy: &'static str,
    },
    /// A record was rejected by the tenant isolation guard.
    TenantViolation { shop_id: String, entity_id: String },
}

// =============================================================================
// Bulk Sync Report
// =============================================================================

/// Outcome of a bulk sync across all provisioned shops.
#[derive(Debug, Clone, Default)]
pub struct BulkSyncReport {
    /// Shops whose cycle completed.
    pub succeeded: Vec<String>,
    /// Shops whose cycle failed, with the error text.
    pub failed: Vec<(String, String)>,
}

impl BulkSyncReport {
    /// True when every shop synced.
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}
