//! # relay-core: Pure Types & Algorithms for Relay POS
//!
//! This crate is the **heart** of the Relay POS durability core. It contains
//! the transaction-log types and the conflict-resolution algorithm as pure
//! functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Relay POS Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Application Services (out of scope)                │   │
//! │  │    pricing, discounts, cash drawer, auth, reporting             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ log_transaction / sync               │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ relay-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  entity   │  │ conflict  │  │  tenant   │  │   │
//! │  │   │ LogEntry  │  │ Snapshot  │  │ resolve() │  │  Scope    │  │   │
//! │  │   │ SyncCursor│  │  union    │  │ classify()│  │  guard    │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │           relay-db (SQLite log, cursors, primary store)         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - LogEntry, SyncCursor, Operation, EntityType
//! - [`entity`] - Strongly-typed entity snapshot union
//! - [`conflict`] - Deterministic conflict classification and resolution
//! - [`tenant`] - Tenant isolation guard
//! - [`error`] - Domain error types
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: resolution is deterministic - same input = same output
//! 2. **No I/O**: database, network, file system access is FORBIDDEN here
//! 3. **Closed Entity Set**: snapshots are a tagged union, never untyped JSON
//! 4. **Explicit Errors**: all errors are typed, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod conflict;
pub mod entity;
pub mod error;
pub mod tenant;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use relay_core::LogEntry` instead of
// `use relay_core::types::LogEntry`

pub use conflict::{classify, rekeyed_id, resolve, ConflictType, DataConflict, Resolution};
pub use entity::{
    EntitySnapshot, PaymentMethod, PaymentSnapshot, ProductSnapshot, SaleSnapshot, SaleStatus,
};
pub use error::{CoreError, CoreResult};
pub use tenant::TenantScope;
pub use types::{EntityType, LogEntry, Operation, SyncCursor};
