//! # relay-db: Database Layer for Relay POS
//!
//! SQLite persistence for the durability core: the write-ahead transaction
//! log, the materialized primary store, sync cursors and the audit trails.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           relay-db                                      │
//! │                                                                         │
//! │  ┌──────────────┐   ┌──────────────────────────────────────────────┐   │
//! │  │   Database   │──▶│               Repositories                    │   │
//! │  │  (pool.rs)   │   │  log / cursor / entity / audit                │   │
//! │  └──────┬───────┘   └──────────────────────────────────────────────┘   │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  ┌──────────────────┐                                                   │
//! │  │ TransactionLogger│  write-ahead entry point for local mutations     │
//! │  │   (logger.rs)    │                                                   │
//! │  └──────────────────┘                                                   │
//! │                                                                         │
//! │  SQLite: WAL journal, FULL synchronous, embedded migrations            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use relay_db::{Database, DbConfig, TransactionLogger};
//!
//! let db = Database::new(DbConfig::new("/var/lib/relay/relay.db")).await?;
//! let logger = TransactionLogger::new(db.clone(), device_id);
//!
//! let entry = logger.log_transaction(Operation::Insert, &snapshot).await?;
//! // ... apply to primary store ...
//! logger.mark_processed(&[entry.id]).await?;
//! ```

pub mod error;
pub mod logger;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{DbError, DbResult};
pub use logger::TransactionLogger;
pub use pool::{Database, DbConfig};
pub use repository::{AuditRepository, EntityRepository, LogRepository, SyncCursorRepository};
