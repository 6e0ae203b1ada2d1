//! # Sync Engine
//!
//! Per-shop synchronization cycles against the cloud authority.
//!
//! ## Cycle Anatomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       One Shop Sync Cycle                               │
//! │                                                                         │
//! │  UPLOAD PHASE                                                          │
//! │  ─────────────                                                         │
//! │  loop: batch = pending entries (oldest first, batch_size)              │
//! │        ack   = transport.upload_changes(batch)                         │
//! │        accepted → synced_at set; rejected → attempts++, stays pending  │
//! │                                                                         │
//! │  DOWNLOAD PHASE                                                        │
//! │  ───────────────                                                       │
//! │  loop: page = transport.download_changes(since cursor)                 │
//! │        for each record:                                                │
//! │            tenant guard → reject + audit, or                           │
//! │            no local pending edit → apply directly, or                  │
//! │            conflict → resolve (pure) → apply outcome + audit           │
//! │        cursor advances ONLY after the whole page applied               │
//! │                                                                         │
//! │  Transport/timeout failure → cycle Failed, retried with backoff.       │
//! │  Crash at any point → at-least-once + idempotent apply = safe.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One cycle per shop at a time (per-shop mutex); different shops can sync
//! in parallel, bounded by `max_parallel_shops` during bulk sync.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, RwLock, Semaphore};
use tracing::{debug, info, warn};

use crate::apply;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::status::{BulkSyncReport, ShopHealth, ShopSyncStatus, SyncEvent, SyncState};
use crate::transport::{ChangeRecord, SyncTransport, UploadBatch};
use relay_core::{
    classify, resolve, ConflictType, DataConflict, EntitySnapshot, LogEntry, Resolution,
    TenantScope,
};
use relay_db::Database;

/// Event channel capacity. Slow subscribers lose their own oldest events;
/// the engine never blocks on them.
const EVENT_CAPACITY: usize = 256;

/// What one completed cycle moved.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleSummary {
    pub uploaded: usize,
    pub downloaded: usize,
    pub conflicts_resolved: usize,
}

/// What happened to a single downloaded record.
#[derive(Debug, Clone, Copy)]
struct RecordOutcome {
    /// The record (or its resolved outcome) reached the primary store.
    applied: bool,
    /// The record went through conflict resolution.
    conflict: bool,
}

impl RecordOutcome {
    fn applied() -> Self {
        RecordOutcome {
            applied: true,
            conflict: false,
        }
    }

    fn skipped() -> Self {
        RecordOutcome {
            applied: false,
            conflict: false,
        }
    }

    fn resolved(applied: bool) -> Self {
        RecordOutcome {
            applied,
            conflict: true,
        }
    }
}

/// The multi-tenant sync engine.
///
/// Cheap to share behind an `Arc`; every transport implementation and all
/// repositories are internally reference-counted.
pub struct SyncEngine {
    db: Database,
    transport: Arc<dyn SyncTransport>,
    config: SyncConfig,

    /// One mutex per shop: a shop never has two cycles in flight.
    shop_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,

    /// Last observed status per shop.
    statuses: RwLock<HashMap<String, ShopSyncStatus>>,

    /// Cycle progress events.
    events: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
    /// Creates an engine over a validated configuration.
    pub fn new(
        db: Database,
        transport: Arc<dyn SyncTransport>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(SyncEngine {
            db,
            transport,
            config,
            shop_locks: StdMutex::new(HashMap::new()),
            statuses: RwLock::new(HashMap::new()),
            events,
        })
    }

    /// Subscribes to cycle progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// The engine's configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Current status for one shop, with a fresh backlog count.
    pub async fn shop_status(&self, shop_id: &str) -> SyncResult<ShopSyncStatus> {
        let pending = self.db.log().count_pending_upload(shop_id).await?;

        let mut status = self
            .statuses
            .read()
            .await
            .get(shop_id)
            .cloned()
            .unwrap_or_else(|| ShopSyncStatus::offline(shop_id));

        status.pending_upload = pending;

        // A healthy shop with a backlog deeper than one upload batch is
        // falling behind the authority.
        if status.health == ShopHealth::Healthy
            && pending > i64::from(self.config.sync.batch_size)
        {
            status.health = ShopHealth::Warning;
        }

        Ok(status)
    }

    /// Status for every provisioned shop.
    pub async fn all_statuses(&self) -> SyncResult<Vec<ShopSyncStatus>> {
        let mut out = Vec::with_capacity(self.config.shop_ids().len());
        for shop_id in self.config.shop_ids() {
            out.push(self.shop_status(shop_id).await?);
        }
        Ok(out)
    }

    // =========================================================================
    // Single-Shop Cycle
    // =========================================================================

    /// Runs one full sync cycle for a shop.
    ///
    /// Serialized per shop: a second call for the same shop waits for the
    /// first to finish rather than interleaving.
    pub async fn sync_shop(&self, shop_id: &str) -> SyncResult<CycleSummary> {
        let lock = self.shop_lock(shop_id);
        let _guard = lock.lock().await;

        self.emit(SyncEvent::CycleStarted {
            shop_id: shop_id.to_string(),
        });

        match self.run_cycle(shop_id).await {
            Ok(summary) => {
                self.record_success(shop_id, summary).await;
                self.emit(SyncEvent::CycleCompleted {
                    shop_id: shop_id.to_string(),
                    uploaded: summary.uploaded,
                    downloaded: summary.downloaded,
                    conflicts_resolved: summary.conflicts_resolved,
                });
                Ok(summary)
            }
            Err(e) => {
                self.record_failure(shop_id, &e).await;
                self.emit(SyncEvent::CycleFailed {
                    shop_id: shop_id.to_string(),
                    error: e.to_string(),
                    retryable: e.is_retryable(),
                });
                Err(e)
            }
        }
    }

    async fn run_cycle(&self, shop_id: &str) -> SyncResult<CycleSummary> {
        let mut summary = CycleSummary::default();

        self.set_state(shop_id, SyncState::Uploading).await;
        summary.uploaded = self.upload_phase(shop_id).await?;

        self.set_state(shop_id, SyncState::Downloading).await;
        let (downloaded, conflicts) = self.download_phase(shop_id).await?;
        summary.downloaded = downloaded;
        summary.conflicts_resolved = conflicts;

        Ok(summary)
    }

    // =========================================================================
    // Upload Phase
    // =========================================================================

    async fn upload_phase(&self, shop_id: &str) -> SyncResult<usize> {
        let batch_size = self.config.sync.batch_size;
        let mut total_accepted = 0usize;

        loop {
            let entries = self.db.log().get_pending_upload(shop_id, batch_size).await?;
            if entries.is_empty() {
                break;
            }

            let count = entries.len();
            debug!(shop_id, count, "Uploading batch");

            let batch = UploadBatch {
                device_id: self.config.device_id().to_string(),
                business_id: self.config.business_id().to_string(),
                shop_id: shop_id.to_string(),
                entries,
            };

            let ack = self
                .with_timeout(self.transport.upload_changes(&batch))
                .await?;

            let mut accepted_ids = Vec::new();
            for result in &ack.results {
                if result.accepted {
                    accepted_ids.push(result.entry_id.clone());
                } else {
                    let reason = result.error.as_deref().unwrap_or("rejected");
                    warn!(
                        shop_id,
                        entry_id = %result.entry_id,
                        retryable = result.retryable,
                        reason,
                        "Upload entry rejected"
                    );
                    self.db
                        .log()
                        .mark_upload_failed(&result.entry_id, reason)
                        .await?;
                }
            }

            let accepted = accepted_ids.len();
            if accepted > 0 {
                self.db.log().mark_synced(&accepted_ids).await?;
                total_accepted += accepted;
            }

            // Rejected entries are still pending; without progress the next
            // fetch would return the same batch forever.
            if accepted == 0 || count < batch_size as usize {
                break;
            }
        }

        Ok(total_accepted)
    }

    // =========================================================================
    // Download Phase
    // =========================================================================

    async fn download_phase(&self, shop_id: &str) -> SyncResult<(usize, usize)> {
        let device_id = self.config.device_id();
        let business_id = self.config.business_id();
        let scope = TenantScope::new(business_id, shop_id);

        let cursor = self
            .db
            .cursors()
            .get(device_id, business_id, shop_id)
            .await?;
        let mut since = cursor.last_sync_timestamp;

        let mut applied = 0usize;
        let mut conflicts = 0usize;

        loop {
            let page = self
                .with_timeout(self.transport.download_changes(
                    device_id,
                    &scope,
                    since,
                    self.config.sync.page_size,
                ))
                .await?;

            if page.records.is_empty() && !page.has_more {
                // First empty page still advances the watermark so the next
                // cycle asks a narrower question.
                self.db
                    .cursors()
                    .advance(device_id, business_id, shop_id, page.server_timestamp)
                    .await?;
                break;
            }

            if page.records.is_empty() {
                // An empty page that claims more data gives the cursor
                // nothing to advance by; repeating the request would spin.
                warn!(shop_id, "Empty download page claimed more data; ending cycle early");
                break;
            }

            self.set_state(shop_id, SyncState::Resolving).await;

            let page_watermark = max_server_timestamp(&page.records, since);
            for record in &page.records {
                let outcome = self.process_record(shop_id, &scope, record).await?;
                if outcome.applied {
                    applied += 1;
                }
                if outcome.conflict {
                    conflicts += 1;
                }
            }

            // The whole page is resolved and applied; only now may the
            // cursor move. A crash above re-downloads this page and the
            // idempotent apply absorbs it.
            let watermark = if page.has_more {
                page_watermark
            } else {
                page.server_timestamp
            };
            self.db
                .cursors()
                .advance(device_id, business_id, shop_id, watermark)
                .await?;

            if !page.has_more {
                break;
            }
            since = page_watermark;
            self.set_state(shop_id, SyncState::Downloading).await;
        }

        Ok((applied, conflicts))
    }

    /// Handles one downloaded record: guard, detect, resolve, apply.
    async fn process_record(
        &self,
        shop_id: &str,
        scope: &TenantScope,
        record: &ChangeRecord,
    ) -> SyncResult<RecordOutcome> {
        // Tenant guard runs before anything else touches the record.
        if !scope.validate(&record.business_id, &record.shop_id) {
            let reason = scope.mismatch_reason(&record.business_id, &record.shop_id);
            self.db
                .audit()
                .record_violation(
                    &record.device_id,
                    &scope.business_id,
                    &scope.shop_id,
                    &record.business_id,
                    &record.shop_id,
                    &record.entity_type.to_string(),
                    &record.entity_id,
                    &reason,
                )
                .await?;
            self.emit(SyncEvent::TenantViolation {
                shop_id: shop_id.to_string(),
                entity_id: record.entity_id.clone(),
            });
            return Ok(RecordOutcome::skipped());
        }

        let local_pending = self
            .db
            .log()
            .latest_unsynced_for_entity(record.entity_type, &record.entity_id)
            .await?;

        let Some(local) = local_pending else {
            // No concurrent local edit: the authority's change lands as-is.
            self.set_state(shop_id, SyncState::Applying).await;
            apply::apply_remote_record(&self.db, record).await?;
            return Ok(RecordOutcome::applied());
        };

        let Some(conflict_type) = classify(local.operation, record.operation) else {
            // Both sides deleted; converged already, apply is a no-op delete.
            self.set_state(shop_id, SyncState::Applying).await;
            apply::apply_remote_record(&self.db, record).await?;
            return Ok(RecordOutcome::applied());
        };

        let conflict = self.build_conflict(conflict_type, &local, record);
        let resolution = resolve(&conflict);

        self.db.audit().record_resolution(&conflict, &resolution).await?;
        self.emit(SyncEvent::ConflictResolved {
            shop_id: shop_id.to_string(),
            entity_id: record.entity_id.clone(),
            strategy: resolution.strategy(),
        });

        match &resolution {
            Resolution::KeepRemote { .. } => {
                self.set_state(shop_id, SyncState::Applying).await;
                apply::apply_remote_record(&self.db, record).await?;
                Ok(RecordOutcome::resolved(true))
            }
            Resolution::KeepLocal { .. } => {
                // Local state stands; the pending upload will carry it to
                // the authority on the next upload phase.
                debug!(
                    shop_id,
                    entity_id = %record.entity_id,
                    "Conflict resolved in favor of local state"
                );
                Ok(RecordOutcome::resolved(false))
            }
            Resolution::RekeyLocal { new_local_id, .. } => {
                self.set_state(shop_id, SyncState::Applying).await;
                self.rekey_local(&local, new_local_id).await?;
                apply::apply_remote_record(&self.db, record).await?;
                Ok(RecordOutcome::resolved(true))
            }
            Resolution::Reject { note } => {
                warn!(
                    shop_id,
                    entity_id = %record.entity_id,
                    note,
                    "Remote record rejected"
                );
                Ok(RecordOutcome::resolved(false))
            }
            Resolution::ManualReview { note } => {
                info!(
                    shop_id,
                    entity_id = %record.entity_id,
                    note,
                    "Conflict queued for manual review"
                );
                Ok(RecordOutcome::resolved(false))
            }
        }
    }

    fn build_conflict(
        &self,
        conflict_type: ConflictType,
        local: &LogEntry,
        record: &ChangeRecord,
    ) -> DataConflict {
        DataConflict {
            entity_type: record.entity_type,
            entity_id: record.entity_id.clone(),
            business_id: record.business_id.clone(),
            conflict_type,
            local_operation: local.operation,
            remote_operation: record.operation,
            local_payload: Some(local.payload.clone()),
            remote_payload: record.payload.clone(),
            local_timestamp: local.created_at,
            remote_timestamp: record.server_timestamp,
            local_device_id: local.device_id.clone(),
            reason: format!(
                "local {} at {} vs remote {} at {}",
                local.operation, local.created_at, record.operation, record.server_timestamp
            ),
        }
    }

    /// Moves the local-only record to its new id: the materialized row, and
    /// the pending log entry that will upload it.
    async fn rekey_local(&self, local: &LogEntry, new_id: &str) -> SyncResult<()> {
        let snapshot =
            EntitySnapshot::from_json(&local.payload).map_err(|e| SyncError::ApplyFailed {
                entry_id: local.id.clone(),
                message: e.to_string(),
            })?;
        let rekeyed = snapshot.with_id(new_id);
        let new_payload = rekeyed.to_json().map_err(|e| SyncError::ApplyFailed {
            entry_id: local.id.clone(),
            message: e.to_string(),
        })?;

        info!(
            entity_type = %local.entity_type,
            old_id = %local.entity_id,
            new_id,
            "Re-keying local record after create conflict"
        );

        let mut tx = self.db.begin().await?;
        self.db
            .entities()
            .rekey_tx(&mut tx, local.entity_type, &local.entity_id, new_id)
            .await?;
        self.db
            .log()
            .rewrite_entity_tx(&mut tx, &local.id, new_id, &new_payload)
            .await?;
        tx.commit().await.map_err(relay_db::DbError::from)?;

        Ok(())
    }

    // =========================================================================
    // Bulk Sync
    // =========================================================================

    /// Syncs the given shops with bounded parallelism. Callers syncing
    /// everything pass `config.shop_ids()`.
    ///
    /// One shop's failure never touches another's cycle; the report carries
    /// both outcomes.
    pub async fn bulk_sync_shops(self: Arc<Self>, shop_ids: &[String]) -> BulkSyncReport {
        let semaphore = Arc::new(Semaphore::new(self.config.sync.max_parallel_shops));
        let mut handles = Vec::new();

        for shop_id in shop_ids.to_vec() {
            let engine = Arc::clone(&self);
            let permits = Arc::clone(&semaphore);

            handles.push(tokio::spawn(async move {
                // Semaphore closed only if we closed it, which we don't.
                let _permit = permits.acquire().await;
                let result = engine.sync_shop(&shop_id).await;
                (shop_id, result)
            }));
        }

        let mut report = BulkSyncReport::default();
        for handle in handles {
            match handle.await {
                Ok((shop_id, Ok(_))) => report.succeeded.push(shop_id),
                Ok((shop_id, Err(e))) => report.failed.push((shop_id, e.to_string())),
                Err(join_err) => {
                    warn!(error = %join_err, "Bulk sync task panicked");
                }
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Bulk sync complete"
        );
        report
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn shop_lock(&self, shop_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .shop_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(shop_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = SyncResult<T>>,
    ) -> SyncResult<T> {
        let secs = self.config.sync.request_timeout_secs;
        tokio::time::timeout(Duration::from_secs(secs), fut)
            .await
            .map_err(|_| SyncError::Timeout(secs))?
    }

    fn emit(&self, event: SyncEvent) {
        // Send fails only when nobody is listening, which is fine.
        let _ = self.events.send(event);
    }

    async fn set_state(&self, shop_id: &str, state: SyncState) {
        let mut statuses = self.statuses.write().await;
        let status = statuses
            .entry(shop_id.to_string())
            .or_insert_with(|| ShopSyncStatus::offline(shop_id));
        status.state = state;
    }

    async fn record_success(&self, shop_id: &str, summary: CycleSummary) {
        let mut statuses = self.statuses.write().await;
        let status = statuses
            .entry(shop_id.to_string())
            .or_insert_with(|| ShopSyncStatus::offline(shop_id));
        status.state = SyncState::Idle;
        status.health = ShopHealth::Healthy;
        status.last_sync = Some(Utc::now());
        status.last_error = None;

        debug!(
            shop_id,
            uploaded = summary.uploaded,
            downloaded = summary.downloaded,
            "Cycle succeeded"
        );
    }

    async fn record_failure(&self, shop_id: &str, error: &SyncError) {
        let mut statuses = self.statuses.write().await;
        let status = statuses
            .entry(shop_id.to_string())
            .or_insert_with(|| ShopSyncStatus::offline(shop_id));
        status.state = SyncState::Failed;
        status.health = if status.last_sync.is_some() {
            ShopHealth::Error
        } else {
            ShopHealth::Offline
        };
        status.last_error = Some(error.to_string());
    }
}

/// The newest server timestamp in a page, floored at the current cursor.
fn max_server_timestamp(records: &[ChangeRecord], floor: DateTime<Utc>) -> DateTime<Utc> {
    records
        .iter()
        .map(|r| r.server_timestamp)
        .fold(floor, |acc, ts| if ts > acc { ts } else { acc })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use relay_core::{EntityType, Operation};

    fn record_at(ts: DateTime<Utc>) -> ChangeRecord {
        ChangeRecord {
            operation: Operation::Update,
            entity_type: EntityType::Product,
            entity_id: "p1".into(),
            payload: None,
            business_id: "biz-1".into(),
            shop_id: "shop-1".into(),
            device_id: "device-2".into(),
            server_timestamp: ts,
        }
    }

    #[test]
    fn watermark_is_monotonic_over_a_page() {
        let floor = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();

        assert_eq!(max_server_timestamp(&[], floor), floor);
        assert_eq!(
            max_server_timestamp(&[record_at(later), record_at(floor)], floor),
            later
        );
    }

    use crate::transport::{AuthTokens, DeviceRegistration, DownloadPage, UploadAck};
    use relay_core::ProductSnapshot;

    struct NoopTransport;

    #[async_trait::async_trait]
    impl SyncTransport for NoopTransport {
        async fn register_device(&self, _reg: &DeviceRegistration) -> SyncResult<()> {
            Ok(())
        }

        async fn authenticate(&self, _device_id: &str, _api_key: &str) -> SyncResult<AuthTokens> {
            Err(SyncError::Auth("not provisioned".into()))
        }

        async fn upload_changes(&self, _batch: &UploadBatch) -> SyncResult<UploadAck> {
            Ok(UploadAck {
                success: true,
                results: vec![],
            })
        }

        async fn download_changes(
            &self,
            _device_id: &str,
            _scope: &TenantScope,
            since: DateTime<Utc>,
            _page_size: u32,
        ) -> SyncResult<DownloadPage> {
            Ok(DownloadPage {
                server_timestamp: since,
                records: vec![],
                has_more: false,
            })
        }
    }

    #[tokio::test]
    async fn applying_a_record_moves_the_cycle_into_applying() {
        let db = Database::new(relay_db::DbConfig::in_memory()).await.unwrap();

        let mut config = SyncConfig::default();
        config.device.id = "device-1".into();
        config.tenant.business_id = "biz-1".into();
        config.tenant.shop_ids = vec!["shop-1".into()];

        let engine = SyncEngine::new(db, Arc::new(NoopTransport), config).unwrap();

        let snapshot = EntitySnapshot::Product(ProductSnapshot {
            id: "p1".into(),
            business_id: "biz-1".into(),
            shop_id: "shop-1".into(),
            sku: "SKU-p1".into(),
            name: "Espresso".into(),
            price_cents: 500,
            is_active: true,
            updated_at: Utc::now(),
        });
        let record = ChangeRecord {
            operation: Operation::Insert,
            entity_type: EntityType::Product,
            entity_id: "p1".into(),
            payload: Some(snapshot.to_json().unwrap()),
            business_id: "biz-1".into(),
            shop_id: "shop-1".into(),
            device_id: "device-2".into(),
            server_timestamp: Utc::now(),
        };

        let scope = TenantScope::new("biz-1", "shop-1");
        let outcome = engine
            .process_record("shop-1", &scope, &record)
            .await
            .unwrap();
        assert!(outcome.applied);

        let statuses = engine.statuses.read().await;
        assert_eq!(statuses.get("shop-1").unwrap().state, SyncState::Applying);
    }
}
