//! # Apply Routines
//!
//! The two paths that turn log entries into primary-store rows:
//! recovery replay of local entries, and application of remote changes.
//!
//! Both paths pair the row mutation with log bookkeeping in one SQLite
//! transaction, and both are idempotent (upsert by id, delete tolerates
//! missing rows), which is what makes at-least-once delivery safe.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::transport::ChangeRecord;
use relay_core::{EntitySnapshot, LogEntry, Operation};
use relay_db::Database;

/// Applies a local log entry to the primary store and marks it processed,
/// atomically. Used by recovery replay.
pub async fn apply_entry(db: &Database, entry: &LogEntry) -> SyncResult<()> {
    debug!(
        entry_id = %entry.id,
        entity_type = %entry.entity_type,
        operation = %entry.operation,
        "Applying log entry"
    );

    let mut tx = db.begin().await?;

    match entry.operation {
        Operation::Insert | Operation::Update => {
            let snapshot =
                EntitySnapshot::from_json(&entry.payload).map_err(|e| SyncError::ApplyFailed {
                    entry_id: entry.id.clone(),
                    message: e.to_string(),
                })?;
            db.entities().upsert_tx(&mut tx, &snapshot).await?;
        }
        Operation::Delete => {
            db.entities()
                .delete_tx(&mut tx, entry.entity_type, &entry.entity_id)
                .await?;
        }
    }

    db.log().mark_processed_tx(&mut tx, &entry.id).await?;

    tx.commit().await.map_err(relay_db::DbError::from)?;
    Ok(())
}


/// Derives the deterministic log id for a remote change.
///
/// UUID v5 over (origin device, entity, authority timestamp): the same
/// change re-downloaded after a crash maps to the same row and the
/// INSERT OR IGNORE append absorbs it.
pub fn remote_entry_id(record: &ChangeRecord) -> String {
    let name = format!(
        "{}:{}:{}:{}",
        record.device_id,
        record.entity_type,
        record.entity_id,
        record.server_timestamp.timestamp_millis()
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Builds the log record of a remote-origin change.
///
/// Already processed (we apply it in the same transaction) and already
/// synced (the authority is where it came from), so it is visible to
/// history queries without ever re-uploading.
pub fn remote_log_entry(record: &ChangeRecord, payload: String) -> LogEntry {
    let now = Utc::now();
    LogEntry {
        id: remote_entry_id(record),
        business_id: record.business_id.clone(),
        shop_id: record.shop_id.clone(),
        operation: record.operation,
        entity_type: record.entity_type,
        entity_id: record.entity_id.clone(),
        payload,
        device_id: record.device_id.clone(),
        created_at: record.server_timestamp,
        is_processed: true,
        processed_at: Some(now),
        synced_at: Some(now),
        attempts: 0,
        last_error: None,
    }
}

/// Applies a remote change to the primary store and records it in the log,
/// atomically. The caller has already run the tenant guard and conflict
/// resolution; by this point the record is cleared to land.
pub async fn apply_remote_record(db: &Database, record: &ChangeRecord) -> SyncResult<()> {
    debug!(
        entity_type = %record.entity_type,
        entity_id = %record.entity_id,
        operation = %record.operation,
        "Applying remote change"
    );

    let mut tx = db.begin().await?;

    let payload = match record.operation {
        Operation::Insert | Operation::Update => {
            let raw = record.payload.as_deref().ok_or_else(|| SyncError::ApplyFailed {
                entry_id: record.entity_id.clone(),
                message: "remote upsert carried no payload".into(),
            })?;
            let snapshot =
                EntitySnapshot::from_json(raw).map_err(|e| SyncError::ApplyFailed {
                    entry_id: record.entity_id.clone(),
                    message: e.to_string(),
                })?;
            db.entities().upsert_tx(&mut tx, &snapshot).await?;
            raw.to_string()
        }
        Operation::Delete => {
            db.entities()
                .delete_tx(&mut tx, record.entity_type, &record.entity_id)
                .await?;
            record.payload.clone().unwrap_or_default()
        }
    };

    let entry = remote_log_entry(record, payload);
    db.log().append_remote_tx(&mut tx, &entry).await?;

    tx.commit().await.map_err(relay_db::DbError::from)?;
    Ok(())
}
