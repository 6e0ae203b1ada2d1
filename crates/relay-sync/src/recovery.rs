//! # Recovery Runner
//!
//! Startup replay of log entries that were durably recorded but never
//! applied to the primary store (crash between append and apply).
//!
//! ## Recovery Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Startup Recovery                                 │
//! │                                                                         │
//! │  SELECT * FROM transaction_log WHERE is_processed = 0                  │
//! │  ORDER BY created_at ASC                                               │
//! │       │                                                                 │
//! │       ▼  for each entry                                                 │
//! │  apply to primary store + mark processed (one transaction)             │
//! │       │                                                                 │
//! │       ├── Ok  → recovered                                               │
//! │       └── Err → entry STAYS unprocessed, logged, replay continues      │
//! │                                                                         │
//! │  Replay is idempotent: an entry that was applied but not flagged       │
//! │  re-applies as the same upsert/delete.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tracing::{info, warn};

use crate::apply;
use crate::error::{SyncError, SyncResult};
use relay_db::Database;

/// What a recovery pass found and did.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Entries successfully applied and marked processed.
    pub recovered: usize,
    /// Entries that failed to apply: (entry id, error). They remain
    /// unprocessed and will be retried on the next startup.
    pub failures: Vec<(String, String)>,
}

impl RecoveryReport {
    /// True when nothing needed recovery or everything recovered.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Replays unprocessed log entries at startup.
#[derive(Debug, Clone)]
pub struct RecoveryRunner {
    db: Database,
}

impl RecoveryRunner {
    /// Creates a recovery runner over the given database.
    pub fn new(db: Database) -> Self {
        RecoveryRunner { db }
    }

    /// Replays every unprocessed entry in append order.
    ///
    /// A failing entry is skipped, not fatal: one corrupt payload must not
    /// hold the terminal hostage. Failures stay unprocessed for the next
    /// pass and are reported for operator attention.
    pub async fn recover_from_log(&self) -> SyncResult<RecoveryReport> {
        let pending = self
            .db
            .log()
            .get_unprocessed()
            .await
            .map_err(|e| SyncError::RecoveryFailed(format!("cannot read log: {e}")))?;

        if pending.is_empty() {
            info!("Recovery: log is clean, nothing to replay");
            return Ok(RecoveryReport::default());
        }

        info!(count = pending.len(), "Recovery: replaying unprocessed log entries");

        let mut report = RecoveryReport::default();

        for entry in &pending {
            match apply::apply_entry(&self.db, entry).await {
                Ok(()) => report.recovered += 1,
                Err(e) => {
                    warn!(
                        entry_id = %entry.id,
                        entity_type = %entry.entity_type,
                        entity_id = %entry.entity_id,
                        error = %e,
                        "Recovery: entry failed to apply, leaving unprocessed"
                    );
                    report.failures.push((entry.id.clone(), e.to_string()));
                }
            }
        }

        info!(
            recovered = report.recovered,
            failed = report.failures.len(),
            "Recovery pass complete"
        );

        Ok(report)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_core::{EntitySnapshot, EntityType, Operation, ProductSnapshot};
    use relay_db::{DbConfig, TransactionLogger};

    fn product(id: &str, name: &str) -> EntitySnapshot {
        EntitySnapshot::Product(ProductSnapshot {
            id: id.into(),
            business_id: "biz-1".into(),
            shop_id: "shop-1".into(),
            sku: format!("SKU-{id}"),
            name: name.into(),
            price_cents: 500,
            is_active: true,
            updated_at: Utc::now(),
        })
    }

    async fn setup() -> (Database, TransactionLogger) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let logger = TransactionLogger::new(db.clone(), "device-1");
        (db, logger)
    }

    #[tokio::test]
    async fn replays_unprocessed_entries_into_primary_store() {
        let (db, logger) = setup().await;

        // Logged but never applied: the crash-between-append-and-apply case.
        logger
            .log_transaction(Operation::Insert, &product("p1", "Espresso"))
            .await
            .unwrap();

        let report = RecoveryRunner::new(db.clone())
            .recover_from_log()
            .await
            .unwrap();

        assert_eq!(report.recovered, 1);
        assert!(report.is_clean());

        let row = db.entities().fetch(EntityType::Product, "p1").await.unwrap();
        assert!(row.is_some());
        assert_eq!(db.log().count_unprocessed().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recovery_is_idempotent() {
        let (db, logger) = setup().await;

        logger
            .log_transaction(Operation::Insert, &product("p1", "Espresso"))
            .await
            .unwrap();

        let runner = RecoveryRunner::new(db.clone());
        runner.recover_from_log().await.unwrap();
        let second = runner.recover_from_log().await.unwrap();

        assert_eq!(second.recovered, 0);
        let row = db.entities().fetch(EntityType::Product, "p1").await.unwrap();
        assert!(row.is_some());
    }

    #[tokio::test]
    async fn corrupt_entry_does_not_block_the_rest() {
        let (db, logger) = setup().await;

        // A payload that no longer decodes (schema drift).
        let mut bad = logger
            .log_transaction(Operation::Insert, &product("p-bad", "Broken"))
            .await
            .unwrap();
        bad.id = "bad-entry".into();
        bad.payload = "{not json".into();
        db.log().append(&bad).await.unwrap();

        logger
            .log_transaction(Operation::Insert, &product("p-good", "Fine"))
            .await
            .unwrap();

        let report = RecoveryRunner::new(db.clone())
            .recover_from_log()
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "bad-entry");
        assert!(report.recovered >= 2);

        // The good entries landed despite the bad one.
        let row = db
            .entities()
            .fetch(EntityType::Product, "p-good")
            .await
            .unwrap();
        assert!(row.is_some());
    }
}
