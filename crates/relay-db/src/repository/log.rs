//! # Transaction Log Repository
//!
//! Persistence for the write-ahead transaction log.
//!
//! ## The Write-Ahead Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Write-Ahead Log Implementation                         │
//! │                                                                         │
//! │  LOCAL OPERATION (e.g., finalize_sale)                                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  1. INSERT INTO transaction_log (...)  ← flushed to stable storage     │
//! │       │                                   (FULL synchronous)            │
//! │       ▼                                                                 │
//! │  2. Apply mutation to primary store                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  3. UPDATE transaction_log SET is_processed = 1                        │
//! │                                                                         │
//! │  CRASH BETWEEN 1 AND 3?                                                │
//! │  → Recovery replays unprocessed entries (idempotent upsert by id)      │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • A mutation is never lost once step 1 returns                        │
//! │  • Batch appends are all-or-nothing (single transaction)               │
//! │  • Entries are never deleted except by retention on processed+synced   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::error::DbResult;
use relay_core::{EntityType, LogEntry};

/// Repository for transaction log operations.
#[derive(Debug, Clone)]
pub struct LogRepository {
    pool: SqlitePool,
}

impl LogRepository {
    /// Creates a new LogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LogRepository { pool }
    }

    /// Durably appends a single log entry.
    ///
    /// Returns only after the row is flushed to stable storage (the pool
    /// runs with FULL synchronous). Callers translate failures into
    /// `DbError::Durability` at the logger boundary.
    pub async fn append(&self, entry: &LogEntry) -> DbResult<()> {
        debug!(
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            operation = %entry.operation,
            "Appending log entry"
        );

        sqlx::query(
            r#"
            INSERT INTO transaction_log (
                id, business_id, shop_id, operation, entity_type, entity_id,
                payload, device_id, created_at, is_processed, processed_at,
                synced_at, attempts, last_error
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.business_id)
        .bind(&entry.shop_id)
        .bind(entry.operation)
        .bind(entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.payload)
        .bind(&entry.device_id)
        .bind(entry.created_at)
        .bind(entry.is_processed)
        .bind(entry.processed_at)
        .bind(entry.synced_at)
        .bind(entry.attempts)
        .bind(&entry.last_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Appends an entry inside an existing transaction.
    ///
    /// Used by the apply path so the primary-store write and the log record
    /// of a remote-origin change commit or roll back together.
    pub async fn append_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        entry: &LogEntry,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transaction_log (
                id, business_id, shop_id, operation, entity_type, entity_id,
                payload, device_id, created_at, is_processed, processed_at,
                synced_at, attempts, last_error
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.business_id)
        .bind(&entry.shop_id)
        .bind(entry.operation)
        .bind(entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.payload)
        .bind(&entry.device_id)
        .bind(entry.created_at)
        .bind(entry.is_processed)
        .bind(entry.processed_at)
        .bind(entry.synced_at)
        .bind(entry.attempts)
        .bind(&entry.last_error)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Appends an entry with a deterministic id, ignoring duplicates.
    ///
    /// Remote-origin entries use ids derived from the change itself, so a
    /// re-downloaded page replays as a no-op instead of a key collision.
    pub async fn append_remote_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        entry: &LogEntry,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO transaction_log (
                id, business_id, shop_id, operation, entity_type, entity_id,
                payload, device_id, created_at, is_processed, processed_at,
                synced_at, attempts, last_error
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.business_id)
        .bind(&entry.shop_id)
        .bind(entry.operation)
        .bind(entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.payload)
        .bind(&entry.device_id)
        .bind(entry.created_at)
        .bind(entry.is_processed)
        .bind(entry.processed_at)
        .bind(entry.synced_at)
        .bind(entry.attempts)
        .bind(&entry.last_error)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Appends multiple entries atomically: either all are durable or none.
    pub async fn append_batch(&self, entries: &[LogEntry]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            self.append_tx(&mut tx, entry).await?;
        }

        tx.commit().await?;

        debug!(count = entries.len(), "Appended log batch");
        Ok(())
    }

    /// Fetches a single entry by id.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<LogEntry>> {
        let entry = sqlx::query_as::<_, LogEntry>(
            "SELECT * FROM transaction_log WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Unprocessed entries in append order, for crash recovery.
    pub async fn get_unprocessed(&self) -> DbResult<Vec<LogEntry>> {
        let entries = sqlx::query_as::<_, LogEntry>(
            r#"
            SELECT * FROM transaction_log
            WHERE is_processed = 0
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Entries pending upload for one shop, oldest first, bounded.
    pub async fn get_pending_upload(&self, shop_id: &str, limit: u32) -> DbResult<Vec<LogEntry>> {
        let entries = sqlx::query_as::<_, LogEntry>(
            r#"
            SELECT * FROM transaction_log
            WHERE shop_id = ?1 AND synced_at IS NULL AND is_processed = 1
            ORDER BY created_at ASC
            LIMIT ?2
            "#,
        )
        .bind(shop_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// The most recent not-yet-uploaded change for an entity, if any.
    ///
    /// A remote record only conflicts with local state when the device has
    /// a concurrent edit the authority has not seen; this is that lookup.
    pub async fn latest_unsynced_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> DbResult<Option<LogEntry>> {
        let entry = sqlx::query_as::<_, LogEntry>(
            r#"
            SELECT * FROM transaction_log
            WHERE entity_type = ?1 AND entity_id = ?2 AND synced_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Flips the processed flag for the given entries.
    ///
    /// The only mutation path for committed entries; runs in one
    /// transaction so a crash cannot leave half a batch flipped.
    pub async fn mark_processed(&self, ids: &[String]) -> DbResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for id in ids {
            sqlx::query(
                r#"
                UPDATE transaction_log SET
                    is_processed = 1,
                    processed_at = ?2
                WHERE id = ?1 AND is_processed = 0
                "#,
            )
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Marks a single entry processed inside an existing transaction.
    ///
    /// The recovery runner pairs this with the primary-store apply so both
    /// succeed or both roll back.
    pub async fn mark_processed_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE transaction_log SET
                is_processed = 1,
                processed_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Rewrites a pending entry to point at a re-keyed entity.
    ///
    /// Create-conflict resolution moves the local-only record to a new id;
    /// the pending upload has to follow so the authority receives the
    /// record under its final identity.
    pub async fn rewrite_entity_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        entry_id: &str,
        new_entity_id: &str,
        new_payload: &str,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE transaction_log SET
                entity_id = ?2,
                payload = ?3
            WHERE id = ?1 AND synced_at IS NULL
            "#,
        )
        .bind(entry_id)
        .bind(new_entity_id)
        .bind(new_payload)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Marks entries as acknowledged by the remote authority.
    pub async fn mark_synced(&self, ids: &[String]) -> DbResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for id in ids {
            sqlx::query(
                r#"
                UPDATE transaction_log SET
                    synced_at = ?2,
                    last_error = NULL
                WHERE id = ?1
                "#,
            )
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Records an upload failure; the entry stays pending for retry.
    pub async fn mark_upload_failed(&self, id: &str, error: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE transaction_log SET
                attempts = attempts + 1,
                last_error = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Counts entries still waiting for upload acknowledgment, per shop.
    pub async fn count_pending_upload(&self, shop_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transaction_log WHERE shop_id = ?1 AND synced_at IS NULL",
        )
        .bind(shop_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Counts entries not yet applied to the primary store.
    pub async fn count_unprocessed(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM transaction_log WHERE is_processed = 0")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Retention: deletes entries that are both processed and synced and
    /// older than the given number of days. Unprocessed or unsynced
    /// entries are never touched.
    pub async fn prune_synced(&self, days_old: u32) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM transaction_log
            WHERE is_processed = 1
              AND synced_at IS NOT NULL
              AND synced_at < datetime('now', '-' || ?1 || ' days')
            "#,
        )
        .bind(days_old)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration;
    use relay_core::Operation;

    fn entry(id: &str, shop_id: &str) -> LogEntry {
        LogEntry {
            id: id.into(),
            business_id: "biz-1".into(),
            shop_id: shop_id.into(),
            operation: Operation::Insert,
            entity_type: EntityType::Product,
            entity_id: format!("entity-{id}"),
            payload: "{}".into(),
            device_id: "device-1".into(),
            created_at: Utc::now(),
            is_processed: false,
            processed_at: None,
            synced_at: None,
            attempts: 0,
            last_error: None,
        }
    }

    async fn setup() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn pending_upload_counts_only_processed_unsynced_entries() {
        let db = setup().await;
        let log = db.log();

        // Unprocessed: not yet eligible for upload.
        log.append(&entry("e1", "shop-1")).await.unwrap();

        // Processed but unsynced: the upload backlog.
        let mut e2 = entry("e2", "shop-1");
        e2.is_processed = true;
        e2.processed_at = Some(Utc::now());
        log.append(&e2).await.unwrap();

        // Different shop.
        let mut e3 = entry("e3", "shop-2");
        e3.is_processed = true;
        e3.processed_at = Some(Utc::now());
        log.append(&e3).await.unwrap();

        let pending = log.get_pending_upload("shop-1", 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "e2");

        log.mark_synced(&["e2".to_string()]).await.unwrap();
        assert!(log.get_pending_upload("shop-1", 10).await.unwrap().is_empty());

        let row = log.get_by_id("e2").await.unwrap().unwrap();
        assert!(row.synced_at.is_some());
    }

    #[tokio::test]
    async fn failed_upload_increments_attempts_and_keeps_entry_pending() {
        let db = setup().await;
        let log = db.log();

        let mut e = entry("e1", "shop-1");
        e.is_processed = true;
        e.processed_at = Some(Utc::now());
        log.append(&e).await.unwrap();

        log.mark_upload_failed("e1", "authority 503").await.unwrap();
        log.mark_upload_failed("e1", "authority 503").await.unwrap();

        let row = log.get_by_id("e1").await.unwrap().unwrap();
        assert_eq!(row.attempts, 2);
        assert_eq!(row.last_error.as_deref(), Some("authority 503"));
        assert_eq!(log.count_pending_upload("shop-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn prune_removes_only_old_processed_and_synced_entries() {
        let db = setup().await;
        let log = db.log();

        // Fully settled and old: prunable.
        let mut old = entry("old", "shop-1");
        old.is_processed = true;
        old.processed_at = Some(Utc::now() - Duration::days(30));
        old.synced_at = Some(Utc::now() - Duration::days(30));
        log.append(&old).await.unwrap();

        // Settled recently: retained.
        let mut recent = entry("recent", "shop-1");
        recent.is_processed = true;
        recent.processed_at = Some(Utc::now());
        recent.synced_at = Some(Utc::now());
        log.append(&recent).await.unwrap();

        // Old but never synced: retained, still owed to the authority.
        let mut unsynced = entry("unsynced", "shop-1");
        unsynced.is_processed = true;
        unsynced.processed_at = Some(Utc::now() - Duration::days(30));
        log.append(&unsynced).await.unwrap();

        let pruned = log.prune_synced(7).await.unwrap();
        assert_eq!(pruned, 1);

        assert!(log.get_by_id("old").await.unwrap().is_none());
        assert!(log.get_by_id("recent").await.unwrap().is_some());
        assert!(log.get_by_id("unsynced").await.unwrap().is_some());
    }
}
