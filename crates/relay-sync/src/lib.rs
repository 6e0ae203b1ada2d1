//! # relay-sync: Sync Engine for Relay POS
//!
//! Multi-tenant synchronization between offline-capable POS terminals and
//! the cloud authority, built on the write-ahead transaction log.
//!
//! ## Data Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Data Flow                                  │
//! │                                                                         │
//! │  STARTUP                                                               │
//! │  RecoveryRunner ──► replay unprocessed log entries                     │
//! │                                                                         │
//! │  EVERY CYCLE (per shop, serialized per shop)                           │
//! │  ┌──────────┐   upload    ┌──────────────┐   download   ┌───────────┐  │
//! │  │ pending  │────────────▶│    cloud     │─────────────▶│ resolve & │  │
//! │  │ log      │  per-item   │  authority   │   paged      │ apply     │  │
//! │  │ entries  │◀───ack──────│              │              │           │  │
//! │  └──────────┘             └──────────────┘              └───────────┘  │
//! │                                                                         │
//! │  CONFLICTS: classified and resolved by relay-core's pure resolver;     │
//! │  every resolution lands in the audit trail.                            │
//! │  TENANTS: the isolation guard rejects out-of-scope records before     │
//! │  anything touches the primary store.                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`engine`] - Per-shop sync cycles, conflict orchestration, bulk sync
//! - [`transport`] - The `SyncTransport` boundary trait and wire types
//! - [`recovery`] - Startup replay of unprocessed log entries
//! - [`apply`] - Idempotent apply routines shared by recovery and download
//! - [`runner`] - Background scheduler with per-shop backoff
//! - [`config`] - TOML + environment configuration
//! - [`status`] - Status snapshots and the event stream
//! - [`error`] - Sync error types

pub mod apply;
pub mod config;
pub mod engine;
pub mod error;
pub mod recovery;
pub mod runner;
pub mod status;
pub mod transport;

pub use config::{DeviceConfig, SyncConfig, SyncSettings, TenantConfig};
pub use engine::{CycleSummary, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use recovery::{RecoveryReport, RecoveryRunner};
pub use runner::{SyncRunner, SyncRunnerHandle};
pub use status::{BulkSyncReport, ShopHealth, ShopSyncStatus, SyncEvent, SyncState};
pub use transport::{
    AuthTokens, ChangeRecord, DeviceRegistration, DownloadPage, ItemResult, SyncTransport,
    UploadAck, UploadBatch,
};
