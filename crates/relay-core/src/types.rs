//! # Log & Cursor Types
//!
//! Core types for the write-ahead transaction log and sync watermarks.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Durability Core Types                              │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    LogEntry     │   │   SyncCursor    │   │   Operation     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  device_id      │   │  Insert         │       │
//! │  │  operation      │   │  business_id    │   │  Update         │       │
//! │  │  entity_type/id │   │  shop_id        │   │  Delete         │       │
//! │  │  payload (JSON) │   │  last_sync_ts   │   └─────────────────┘       │
//! │  │  is_processed   │   └─────────────────┘                             │
//! │  └─────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Write-Ahead Ordering
//! A `LogEntry` is durably appended BEFORE the corresponding primary-store
//! mutation is considered committed. Crash recovery replays unprocessed
//! entries; the processed flag is the only mutation path after append.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// =============================================================================
// Operation
// =============================================================================

/// The kind of mutation a log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// A new entity was created.
    Insert,
    /// An existing entity was modified.
    Update,
    /// An entity was removed.
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Insert => write!(f, "insert"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

// =============================================================================
// Entity Type
// =============================================================================

/// Closed set of entity shapes the core knows how to sync.
///
/// The conflict resolver dispatches on this tag rather than on untyped
/// payloads, so adding an entity kind is a compile-visible change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Product,
    Sale,
    Payment,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::Product => write!(f, "product"),
            EntityType::Sale => write!(f, "sale"),
            EntityType::Payment => write!(f, "payment"),
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product" => Ok(EntityType::Product),
            "sale" => Ok(EntityType::Sale),
            "payment" => Ok(EntityType::Payment),
            other => Err(CoreError::UnknownEntityType(other.to_string())),
        }
    }
}

// =============================================================================
// Log Entry
// =============================================================================

/// An entry in the write-ahead transaction log.
///
/// Immutable once written, except for the processed flag (flipped when the
/// primary-store commit succeeds) and the sync bookkeeping fields
/// (`synced_at`, `attempts`, `last_error`) owned by the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct LogEntry {
    /// Unique identifier (UUID v4). The remote authority deduplicates
    /// uploaded entries by this id, making retries safe.
    pub id: String,

    /// Business (tenant) this entry belongs to.
    pub business_id: String,

    /// Shop within the business.
    pub shop_id: String,

    /// Kind of mutation recorded.
    pub operation: Operation,

    /// Entity shape tag.
    pub entity_type: EntityType,

    /// Id of the entity being mutated.
    pub entity_id: String,

    /// Full entity snapshot as JSON (see [`crate::entity::EntitySnapshot`]).
    pub payload: String,

    /// Device that recorded the mutation.
    pub device_id: String,

    /// When the mutation was logged.
    pub created_at: DateTime<Utc>,

    /// Whether the corresponding primary-store commit has succeeded.
    pub is_processed: bool,

    /// When the entry was marked processed.
    pub processed_at: Option<DateTime<Utc>>,

    /// When the entry was acknowledged by the remote authority.
    /// Remote-origin entries are appended with this already set so they
    /// never re-trigger an outbound sync.
    pub synced_at: Option<DateTime<Utc>>,

    /// Number of upload attempts.
    pub attempts: i64,

    /// Last upload error, if any.
    pub last_error: Option<String>,
}

impl LogEntry {
    /// Returns true if this entry still needs uploading.
    pub fn is_pending_upload(&self) -> bool {
        self.synced_at.is_none()
    }
}

// =============================================================================
// Sync Cursor
// =============================================================================

/// Per-device, per-tenant download watermark.
///
/// Owned exclusively by the sync engine; advanced only after a downloaded
/// page has been fully resolved and applied, so a crash mid-page re-pulls
/// the page instead of skipping entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SyncCursor {
    pub device_id: String,
    pub business_id: String,
    pub shop_id: String,

    /// Everything up to this remote timestamp has been exchanged.
    pub last_sync_timestamp: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl SyncCursor {
    /// The epoch cursor used before any sync has completed.
    pub fn initial(device_id: &str, business_id: &str, shop_id: &str) -> Self {
        let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_default();
        SyncCursor {
            device_id: device_id.to_string(),
            business_id: business_id.to_string(),
            shop_id: shop_id.to_string(),
            last_sync_timestamp: epoch,
            updated_at: epoch,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
