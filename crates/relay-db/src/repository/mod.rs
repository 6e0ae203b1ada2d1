//! # Repository Layer
//!
//! Database access organized by table family. Each repository owns a clone
//! of the pool and exposes async methods returning `DbResult`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Repository Layout                                 │
//! │                                                                         │
//! │  log      → transaction_log (write-ahead log, outbox bookkeeping)      │
//! │  cursor   → sync_cursors (per-scope download watermarks)               │
//! │  entity   → products / sales / payments (materialized primary store)   │
//! │  audit    → conflict_audit / tenant_violations (append-only trails)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audit;
pub mod cursor;
pub mod entity;
pub mod log;

pub use audit::AuditRepository;
pub use cursor::SyncCursorRepository;
pub use entity::EntityRepository;
pub use log::LogRepository;
