//! # Sync Cursor Repository
//!
//! Persistence for per-scope download watermarks.
//!
//! A cursor records the server timestamp up to which this device has fully
//! resolved and applied remote changes for one (device, business, shop)
//! scope. It advances only after a downloaded page has been applied in its
//! entirety; a crash mid-page re-downloads the page, and the idempotent
//! apply path absorbs the duplicates.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use relay_core::SyncCursor;

/// Repository for sync cursor state.
#[derive(Debug, Clone)]
pub struct SyncCursorRepository {
    pool: SqlitePool,
}

impl SyncCursorRepository {
    /// Creates a new SyncCursorRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncCursorRepository { pool }
    }

    /// Fetches the cursor for a scope, or the epoch cursor if the scope has
    /// never synced (first sync downloads everything).
    pub async fn get(
        &self,
        device_id: &str,
        business_id: &str,
        shop_id: &str,
    ) -> DbResult<SyncCursor> {
        let cursor = sqlx::query_as::<_, SyncCursor>(
            r#"
            SELECT * FROM sync_cursors
            WHERE device_id = ?1 AND business_id = ?2 AND shop_id = ?3
            "#,
        )
        .bind(device_id)
        .bind(business_id)
        .bind(shop_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(cursor.unwrap_or_else(|| SyncCursor::initial(device_id, business_id, shop_id)))
    }

    /// Advances the cursor to a new watermark.
    ///
    /// Monotonic: a watermark earlier than the stored one is ignored, so a
    /// re-run of an already-applied page can never move the cursor back.
    pub async fn advance(
        &self,
        device_id: &str,
        business_id: &str,
        shop_id: &str,
        watermark: DateTime<Utc>,
    ) -> DbResult<()> {
        debug!(
            device_id,
            shop_id,
            watermark = %watermark,
            "Advancing sync cursor"
        );

        sqlx::query(
            r#"
            INSERT INTO sync_cursors (device_id, business_id, shop_id, last_sync_timestamp, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(device_id, business_id, shop_id) DO UPDATE SET
                last_sync_timestamp = excluded.last_sync_timestamp,
                updated_at = excluded.updated_at
            WHERE excluded.last_sync_timestamp > sync_cursors.last_sync_timestamp
            "#,
        )
        .bind(device_id)
        .bind(business_id)
        .bind(shop_id)
        .bind(watermark)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All cursors for a device, for status reporting.
    pub async fn list_for_device(&self, device_id: &str) -> DbResult<Vec<SyncCursor>> {
        let cursors = sqlx::query_as::<_, SyncCursor>(
            "SELECT * FROM sync_cursors WHERE device_id = ?1 ORDER BY shop_id",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(cursors)
    }
}
