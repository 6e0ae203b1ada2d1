//! # Transaction Logger
//!
//! The write-ahead entry point every local mutation goes through.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Write-Ahead Contract                                │
//! │                                                                         │
//! │  let entry = logger.log_transaction(Operation::Insert, &snapshot)?;    │
//! │  //   ▲ returns only after the entry is durable on stable storage      │
//! │                                                                         │
//! │  apply_to_primary_store(...)?;   // caller's mutation                  │
//! │  logger.mark_processed(&[entry.id])?;                                  │
//! │                                                                         │
//! │  On Err(DbError::Durability): the caller MUST abort the mutation.      │
//! │  Nothing was promised and nothing may change.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::pool::Database;
use relay_core::{EntitySnapshot, LogEntry, Operation};

/// Durable write-ahead logger for local mutations.
#[derive(Debug, Clone)]
pub struct TransactionLogger {
    db: Database,
    device_id: String,
}

impl TransactionLogger {
    /// Creates a logger bound to this device's identity.
    pub fn new(db: Database, device_id: impl Into<String>) -> Self {
        TransactionLogger {
            db,
            device_id: device_id.into(),
        }
    }

    /// The device identity stamped on every entry.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Durably records one mutation before it touches the primary store.
    ///
    /// On success the returned entry is on stable storage. On
    /// `DbError::Durability` the caller must abort the mutation.
    pub async fn log_transaction(
        &self,
        operation: Operation,
        snapshot: &EntitySnapshot,
    ) -> DbResult<LogEntry> {
        let entry = self.build_entry(operation, snapshot)?;

        if let Err(e) = self.db.log().append(&entry).await {
            error!(
                entity_type = %entry.entity_type,
                entity_id = %entry.entity_id,
                error = %e,
                "Log append failed; mutation must be aborted"
            );
            return Err(DbError::Durability(e.to_string()));
        }

        debug!(
            entry_id = %entry.id,
            entity_type = %entry.entity_type,
            operation = %entry.operation,
            "Transaction logged"
        );

        Ok(entry)
    }

    /// Durably records several mutations as one unit: either every entry is
    /// on stable storage or none is. Used for multi-entity operations like
    /// finalizing a sale together with its payments.
    pub async fn log_transaction_batch(
        &self,
        mutations: &[(Operation, EntitySnapshot)],
    ) -> DbResult<Vec<LogEntry>> {
        let entries = mutations
            .iter()
            .map(|(op, snapshot)| self.build_entry(*op, snapshot))
            .collect::<DbResult<Vec<_>>>()?;

        if let Err(e) = self.db.log().append_batch(&entries).await {
            error!(
                count = entries.len(),
                error = %e,
                "Batch log append failed; mutations must be aborted"
            );
            return Err(DbError::Durability(e.to_string()));
        }

        debug!(count = entries.len(), "Transaction batch logged");
        Ok(entries)
    }

    /// Marks entries as applied to the primary store.
    pub async fn mark_processed(&self, entry_ids: &[String]) -> DbResult<()> {
        self.db.log().mark_processed(entry_ids).await
    }

    fn build_entry(&self, operation: Operation, snapshot: &EntitySnapshot) -> DbResult<LogEntry> {
        let payload = snapshot
            .to_json()
            .map_err(|e| DbError::Internal(e.to_string()))?;

        Ok(LogEntry {
            id: Uuid::new_v4().to_string(),
            business_id: snapshot.business_id().to_string(),
            shop_id: snapshot.shop_id().to_string(),
            operation,
            entity_type: snapshot.entity_type(),
            entity_id: snapshot.entity_id().to_string(),
            payload,
            device_id: self.device_id.clone(),
            created_at: Utc::now(),
            is_processed: false,
            processed_at: None,
            synced_at: None,
            attempts: 0,
            last_error: None,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DbConfig;
    use relay_core::{EntityType, ProductSnapshot};

    fn product(id: &str) -> EntitySnapshot {
        EntitySnapshot::Product(ProductSnapshot {
            id: id.into(),
            business_id: "biz-1".into(),
            shop_id: "shop-1".into(),
            sku: "SKU-001".into(),
            name: "Espresso".into(),
            price_cents: 350,
            is_active: true,
            updated_at: Utc::now(),
        })
    }

    async fn test_logger() -> (Database, TransactionLogger) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let logger = TransactionLogger::new(db.clone(), "device-1");
        (db, logger)
    }

    #[tokio::test]
    async fn log_transaction_is_durable_before_return() {
        let (db, logger) = test_logger().await;

        let entry = logger
            .log_transaction(Operation::Insert, &product("p1"))
            .await
            .unwrap();

        let stored = db.log().get_by_id(&entry.id).await.unwrap().unwrap();
        assert_eq!(stored.entity_id, "p1");
        assert_eq!(stored.entity_type, EntityType::Product);
        assert!(!stored.is_processed);
        assert!(stored.synced_at.is_none());
    }

    #[tokio::test]
    async fn batch_appends_every_entry() {
        let (db, logger) = test_logger().await;

        let entries = logger
            .log_transaction_batch(&[
                (Operation::Insert, product("p1")),
                (Operation::Update, product("p2")),
            ])
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(db.log().count_unprocessed().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn mark_processed_flips_the_flag() {
        let (db, logger) = test_logger().await;

        let entry = logger
            .log_transaction(Operation::Insert, &product("p1"))
            .await
            .unwrap();

        logger.mark_processed(&[entry.id.clone()]).await.unwrap();

        let stored = db.log().get_by_id(&entry.id).await.unwrap().unwrap();
        assert!(stored.is_processed);
        assert!(stored.processed_at.is_some());
    }
}
