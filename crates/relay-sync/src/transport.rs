//! # Sync Transport Boundary
//!
//! The seam between the sync engine and whatever carries bytes to the
//! cloud authority. The engine never touches sockets; it talks to this
//! trait and nothing else.
//!
//! ## Boundary Design
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Transport Boundary                                 │
//! │                                                                         │
//! │  ┌────────────┐        ┌───────────────────┐       ┌────────────────┐  │
//! │  │ SyncEngine │───────▶│  dyn SyncTransport │──────▶│ gRPC / HTTPS / │  │
//! │  │            │        │  (this trait)      │       │ test double    │  │
//! │  └────────────┘        └───────────────────┘       └────────────────┘  │
//! │                                                                         │
//! │  SEMANTIC CONTRACT (what the engine relies on):                        │
//! │  • upload_changes: at-least-once; authority must dedupe by entry id    │
//! │  • upload ack is PER ITEM - a batch can partially succeed              │
//! │  • download_changes: pages ordered by server timestamp, has_more flag  │
//! │  • server_timestamp comes from the authority clock, never the device   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use relay_core::{EntityType, LogEntry, Operation, TenantScope};

// =============================================================================
// Upload Types
// =============================================================================

/// A batch of log entries bound for the authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadBatch {
    /// The uploading device.
    pub device_id: String,
    /// Tenant scope the batch belongs to.
    pub business_id: String,
    pub shop_id: String,
    /// Entries in append order.
    pub entries: Vec<LogEntry>,
}

/// Per-entry acknowledgment from the authority.
///
/// Partial failure is normal: the engine marks accepted entries synced and
/// leaves rejected ones pending, so acks must be itemized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    /// The log entry this result refers to.
    pub entry_id: String,
    /// Whether the authority durably accepted the entry.
    pub accepted: bool,
    /// Rejection detail, if not accepted.
    pub error: Option<String>,
    /// Whether a rejection is worth retrying (e.g. transient storage
    /// pressure) or permanent (e.g. malformed payload).
    pub retryable: bool,
}

/// Authority response to an upload batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadAck {
    /// True when every entry in the batch was accepted.
    pub success: bool,
    /// One result per uploaded entry.
    pub results: Vec<ItemResult>,
}

// =============================================================================
// Download Types
// =============================================================================

/// One change from the authority's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub operation: Operation,
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Snapshot JSON; absent for deletes.
    pub payload: Option<String>,
    /// Tenant scope the authority says this record belongs to. The engine
    /// verifies this against the device's own scope before applying.
    pub business_id: String,
    pub shop_id: String,
    /// Device that originated the change.
    pub device_id: String,
    /// When the authority accepted the change (authority clock).
    pub server_timestamp: DateTime<Utc>,
}

/// One page of changes since a cursor position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadPage {
    /// Authority clock at page assembly; becomes the new cursor watermark
    /// once the final page of a cycle is applied.
    pub server_timestamp: DateTime<Utc>,
    /// Changes ordered by server timestamp, oldest first.
    pub records: Vec<ChangeRecord>,
    /// True when more pages are available after this one.
    pub has_more: bool,
}

// =============================================================================
// Registration / Auth Types
// =============================================================================

/// Device registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub device_id: String,
    pub device_name: String,
    pub business_id: String,
    pub shop_ids: Vec<String>,
}

/// Credentials returned by the authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

// =============================================================================
// The Trait
// =============================================================================

/// Transport to the cloud authority.
///
/// Implementations own connection management, retries below the semantic
/// level (e.g. TCP reconnect) and encoding. They must be safe to share
/// across concurrent per-shop cycles.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Registers this device with the authority. Success means the
    /// registration is stored; credentials come from [`Self::authenticate`].
    async fn register_device(&self, registration: &DeviceRegistration) -> SyncResult<()>;

    /// Exchanges the device's provisioning key for session tokens.
    async fn authenticate(&self, device_id: &str, api_key: &str) -> SyncResult<AuthTokens>;

    /// Uploads a batch of log entries. At-least-once: the same entry may be
    /// uploaded again after a crash and the authority dedupes by entry id.
    async fn upload_changes(&self, batch: &UploadBatch) -> SyncResult<UploadAck>;

    /// Downloads one page of changes for a scope since a watermark.
    async fn download_changes(
        &self,
        device_id: &str,
        scope: &TenantScope,
        since: DateTime<Utc>,
        page_size: u32,
    ) -> SyncResult<DownloadPage>;
}
