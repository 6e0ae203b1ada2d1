//! End-to-end sync cycle tests against an in-memory mock authority.
//!
//! The mock implements `SyncTransport` faithfully enough to exercise the
//! semantic contract: itemized upload acks, paged downloads, and injectable
//! transport failures.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use relay_core::{
    rekeyed_id, EntitySnapshot, EntityType, LogEntry, Operation, ProductSnapshot, TenantScope,
};
use relay_db::{Database, DbConfig, TransactionLogger};
use relay_sync::{
    AuthTokens, ChangeRecord, DeviceRegistration, DownloadPage, ItemResult, SyncConfig,
    SyncEngine, SyncError, SyncResult, SyncTransport, UploadAck, UploadBatch,
};

// =============================================================================
// Mock Authority
// =============================================================================

#[derive(Default)]
struct HubState {
    /// Entries accepted across all uploads, by id (authority dedup).
    accepted: HashMap<String, LogEntry>,
    /// Entry ids to reject with a retryable error.
    reject_ids: HashSet<String>,
    /// Shops whose transport calls fail outright.
    broken_shops: HashSet<String>,
    /// Pages to serve per shop, in order.
    pages: HashMap<String, VecDeque<DownloadPage>>,
    upload_calls: usize,
}

struct MockHub {
    state: Mutex<HubState>,
}

impl MockHub {
    fn new() -> Arc<Self> {
        Arc::new(MockHub {
            state: Mutex::new(HubState::default()),
        })
    }

    async fn reject(&self, entry_id: &str) {
        self.state.lock().await.reject_ids.insert(entry_id.into());
    }

    async fn break_shop(&self, shop_id: &str) {
        self.state.lock().await.broken_shops.insert(shop_id.into());
    }

    async fn queue_page(&self, shop_id: &str, page: DownloadPage) {
        self.state
            .lock()
            .await
            .pages
            .entry(shop_id.into())
            .or_default()
            .push_back(page);
    }

    async fn accepted_count(&self) -> usize {
        self.state.lock().await.accepted.len()
    }
}

#[async_trait]
impl SyncTransport for MockHub {
    async fn register_device(&self, _reg: &DeviceRegistration) -> SyncResult<()> {
        Ok(())
    }

    async fn authenticate(&self, _device_id: &str, _api_key: &str) -> SyncResult<AuthTokens> {
        Ok(AuthTokens {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        })
    }

    async fn upload_changes(&self, batch: &UploadBatch) -> SyncResult<UploadAck> {
        let mut state = self.state.lock().await;
        state.upload_calls += 1;

        if state.broken_shops.contains(&batch.shop_id) {
            return Err(SyncError::Transport("connection refused".into()));
        }

        let mut results = Vec::new();
        for entry in &batch.entries {
            if state.reject_ids.contains(&entry.id) {
                results.push(ItemResult {
                    entry_id: entry.id.clone(),
                    accepted: false,
                    error: Some("storage pressure".into()),
                    retryable: true,
                });
            } else {
                state.accepted.insert(entry.id.clone(), entry.clone());
                results.push(ItemResult {
                    entry_id: entry.id.clone(),
                    accepted: true,
                    error: None,
                    retryable: false,
                });
            }
        }

        let success = results.iter().all(|r| r.accepted);
        Ok(UploadAck { success, results })
    }

    async fn download_changes(
        &self,
        _device_id: &str,
        scope: &TenantScope,
        _since: DateTime<Utc>,
        _page_size: u32,
    ) -> SyncResult<DownloadPage> {
        let mut state = self.state.lock().await;

        if state.broken_shops.contains(&scope.shop_id) {
            return Err(SyncError::Transport("connection refused".into()));
        }

        let page = state
            .pages
            .get_mut(&scope.shop_id)
            .and_then(|q| q.pop_front());

        Ok(page.unwrap_or(DownloadPage {
            server_timestamp: Utc::now(),
            records: vec![],
            has_more: false,
        }))
    }
}

// =============================================================================
// Fixtures
// =============================================================================

const DEVICE: &str = "device-1";
const BUSINESS: &str = "biz-1";
const SHOP: &str = "shop-1";

fn test_config(shops: &[&str]) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.device.id = DEVICE.into();
    config.tenant.business_id = BUSINESS.into();
    config.tenant.shop_ids = shops.iter().map(|s| s.to_string()).collect();
    config.sync.batch_size = 10;
    config
}

async fn setup(shops: &[&str]) -> (Database, TransactionLogger, Arc<MockHub>, Arc<SyncEngine>) {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let logger = TransactionLogger::new(db.clone(), DEVICE);
    let hub = MockHub::new();
    let engine = Arc::new(
        SyncEngine::new(db.clone(), hub.clone(), test_config(shops)).unwrap(),
    );
    (db, logger, hub, engine)
}

fn product(id: &str, name: &str, updated_at: DateTime<Utc>) -> EntitySnapshot {
    EntitySnapshot::Product(ProductSnapshot {
        id: id.into(),
        business_id: BUSINESS.into(),
        shop_id: SHOP.into(),
        sku: format!("SKU-{id}"),
        name: name.into(),
        price_cents: 500,
        is_active: true,
        updated_at,
    })
}

/// Logs a mutation the way the POS would: append, apply, mark processed.
async fn commit_local(
    logger: &TransactionLogger,
    op: Operation,
    snapshot: &EntitySnapshot,
) -> LogEntry {
    let entry = logger.log_transaction(op, snapshot).await.unwrap();
    logger.mark_processed(&[entry.id.clone()]).await.unwrap();
    entry
}

fn remote_record(
    op: Operation,
    snapshot: &EntitySnapshot,
    server_timestamp: DateTime<Utc>,
) -> ChangeRecord {
    ChangeRecord {
        operation: op,
        entity_type: snapshot.entity_type(),
        entity_id: snapshot.entity_id().into(),
        payload: Some(snapshot.to_json().unwrap()),
        business_id: snapshot.business_id().into(),
        shop_id: snapshot.shop_id().into(),
        device_id: "device-other".into(),
        server_timestamp,
    }
}

fn page(records: Vec<ChangeRecord>, server_timestamp: DateTime<Utc>, has_more: bool) -> DownloadPage {
    DownloadPage {
        server_timestamp,
        records,
        has_more,
    }
}

// =============================================================================
// Upload Phase
// =============================================================================

#[tokio::test]
async fn upload_marks_accepted_entries_synced() {
    let (db, logger, hub, engine) = setup(&[SHOP]).await;

    commit_local(&logger, Operation::Insert, &product("p1", "Espresso", Utc::now())).await;
    commit_local(&logger, Operation::Insert, &product("p2", "Latte", Utc::now())).await;

    let summary = engine.sync_shop(SHOP).await.unwrap();

    assert_eq!(summary.uploaded, 2);
    assert_eq!(hub.accepted_count().await, 2);
    assert_eq!(db.log().count_pending_upload(SHOP).await.unwrap(), 0);
}

#[tokio::test]
async fn partial_ack_keeps_rejected_entries_pending() {
    let (db, logger, hub, engine) = setup(&[SHOP]).await;

    let ok = commit_local(&logger, Operation::Insert, &product("p1", "Espresso", Utc::now())).await;
    let bad = commit_local(&logger, Operation::Insert, &product("p2", "Latte", Utc::now())).await;
    hub.reject(&bad.id).await;

    let summary = engine.sync_shop(SHOP).await.unwrap();

    assert_eq!(summary.uploaded, 1);

    let accepted = db.log().get_by_id(&ok.id).await.unwrap().unwrap();
    assert!(accepted.synced_at.is_some());

    let rejected = db.log().get_by_id(&bad.id).await.unwrap().unwrap();
    assert!(rejected.synced_at.is_none());
    assert_eq!(rejected.attempts, 1);
    assert!(rejected.last_error.as_deref().unwrap().contains("storage"));
}

#[tokio::test]
async fn reupload_after_lost_ack_is_deduped_by_the_authority() {
    let (db, logger, hub, engine) = setup(&[SHOP]).await;

    let entry = commit_local(&logger, Operation::Insert, &product("p1", "Espresso", Utc::now())).await;
    engine.sync_shop(SHOP).await.unwrap();

    // Simulate a lost ack: the entry reverts to pending locally.
    let mut stale = entry.clone();
    stale.id = format!("{}-retry", entry.id);
    db.log().append(&stale).await.unwrap();
    db.log().mark_processed(&[stale.id.clone()]).await.unwrap();

    engine.sync_shop(SHOP).await.unwrap();

    // Both ids reached the hub; dedup is the authority's job by entity id,
    // ours is at-least-once delivery.
    assert_eq!(hub.accepted_count().await, 2);
    assert_eq!(db.log().count_pending_upload(SHOP).await.unwrap(), 0);
}

// =============================================================================
// Download Phase
// =============================================================================

#[tokio::test]
async fn download_applies_remote_change_and_records_it() {
    let (db, _logger, hub, engine) = setup(&[SHOP]).await;

    let ts = Utc::now();
    let snapshot = product("p9", "Remote Mocha", ts);
    hub.queue_page(SHOP, page(vec![remote_record(Operation::Insert, &snapshot, ts)], ts, false))
        .await;

    let summary = engine.sync_shop(SHOP).await.unwrap();
    assert_eq!(summary.downloaded, 1);

    let row = db.entities().fetch(EntityType::Product, "p9").await.unwrap();
    assert_eq!(row.unwrap().entity_id(), "p9");

    // The remote change is in local history, never re-uploaded.
    assert_eq!(db.log().count_pending_upload(SHOP).await.unwrap(), 0);

    let cursor = db.cursors().get(DEVICE, BUSINESS, SHOP).await.unwrap();
    assert_eq!(cursor.last_sync_timestamp, ts);
}

#[tokio::test]
async fn paged_download_applies_every_page() {
    let (db, _logger, hub, engine) = setup(&[SHOP]).await;

    let t1 = Utc::now();
    let t2 = t1 + ChronoDuration::seconds(10);

    hub.queue_page(
        SHOP,
        page(
            vec![remote_record(Operation::Insert, &product("p1", "One", t1), t1)],
            t1,
            true,
        ),
    )
    .await;
    hub.queue_page(
        SHOP,
        page(
            vec![remote_record(Operation::Insert, &product("p2", "Two", t2), t2)],
            t2,
            false,
        ),
    )
    .await;

    let summary = engine.sync_shop(SHOP).await.unwrap();
    assert_eq!(summary.downloaded, 2);

    assert!(db.entities().fetch(EntityType::Product, "p1").await.unwrap().is_some());
    assert!(db.entities().fetch(EntityType::Product, "p2").await.unwrap().is_some());

    let cursor = db.cursors().get(DEVICE, BUSINESS, SHOP).await.unwrap();
    assert_eq!(cursor.last_sync_timestamp, t2);
}

#[tokio::test]
async fn redownloaded_page_is_absorbed_idempotently() {
    let (db, _logger, hub, engine) = setup(&[SHOP]).await;

    let ts = Utc::now();
    let snapshot = product("p1", "Espresso", ts);
    let record = remote_record(Operation::Update, &snapshot, ts);

    hub.queue_page(SHOP, page(vec![record.clone()], ts, false)).await;
    engine.sync_shop(SHOP).await.unwrap();

    // The authority re-serves the same change (crash before cursor advance
    // on a real device).
    hub.queue_page(SHOP, page(vec![record], ts, false)).await;
    engine.sync_shop(SHOP).await.unwrap();

    let row = db.entities().fetch(EntityType::Product, "p1").await.unwrap();
    assert!(row.is_some());
}

#[tokio::test]
async fn empty_page_claiming_more_data_ends_the_cycle() {
    let (db, _logger, hub, engine) = setup(&[SHOP]).await;

    // A buggy or mid-compaction authority can serve a page with no records
    // while still flagging more; the cycle must not spin on it.
    let ts = Utc::now();
    hub.queue_page(SHOP, page(vec![], ts, true)).await;

    let summary = engine.sync_shop(SHOP).await.unwrap();
    assert_eq!(summary.downloaded, 0);

    // Nothing was applied, so the cursor must not have moved past data.
    let cursor = db.cursors().get(DEVICE, BUSINESS, SHOP).await.unwrap();
    assert!(cursor.last_sync_timestamp < ts);
}

// =============================================================================
// Conflict Resolution
// =============================================================================

#[tokio::test]
async fn newer_remote_update_wins_over_local_update() {
    let (db, logger, hub, engine) = setup(&[SHOP]).await;

    let local_ts = Utc::now();
    let remote_ts = local_ts + ChronoDuration::seconds(30);

    // The local edit hasn't reached the authority yet (upload rejected with
    // a retryable error), so the downloaded change collides with it.
    let entry = commit_local(&logger, Operation::Update, &product("p1", "Local Name", local_ts)).await;
    hub.reject(&entry.id).await;

    let remote = product("p1", "Remote Name", remote_ts);
    hub.queue_page(
        SHOP,
        page(vec![remote_record(Operation::Update, &remote, remote_ts)], remote_ts, false),
    )
    .await;

    let summary = engine.sync_shop(SHOP).await.unwrap();
    assert_eq!(summary.conflicts_resolved, 1);

    let row = db.entities().fetch(EntityType::Product, "p1").await.unwrap().unwrap();
    match row {
        EntitySnapshot::Product(p) => assert_eq!(p.name, "Remote Name"),
        other => panic!("unexpected snapshot: {other:?}"),
    }

    let audits = db.audit().list_resolutions(BUSINESS, 10).await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].strategy, "keep_remote");
}

#[tokio::test]
async fn older_remote_update_loses_to_local_update() {
    let (db, logger, hub, engine) = setup(&[SHOP]).await;

    let remote_ts = Utc::now();
    let local_ts = remote_ts + ChronoDuration::seconds(30);

    // Local change applied to the store before the cycle.
    let local = product("p1", "Local Name", local_ts);
    let entry = logger.log_transaction(Operation::Update, &local).await.unwrap();
    let mut tx = db.begin().await.unwrap();
    db.entities().upsert_tx(&mut tx, &local).await.unwrap();
    tx.commit().await.unwrap();
    logger.mark_processed(&[entry.id.clone()]).await.unwrap();
    hub.reject(&entry.id).await;

    let remote = product("p1", "Stale Remote", remote_ts);
    hub.queue_page(
        SHOP,
        page(vec![remote_record(Operation::Update, &remote, remote_ts)], remote_ts, false),
    )
    .await;

    engine.sync_shop(SHOP).await.unwrap();

    let row = db.entities().fetch(EntityType::Product, "p1").await.unwrap().unwrap();
    match row {
        EntitySnapshot::Product(p) => assert_eq!(p.name, "Local Name"),
        other => panic!("unexpected snapshot: {other:?}"),
    }

    let audits = db.audit().list_resolutions(BUSINESS, 10).await.unwrap();
    assert_eq!(audits[0].strategy, "keep_local");
}

#[tokio::test]
async fn create_conflict_rekeys_the_local_record() {
    let (db, logger, hub, engine) = setup(&[SHOP]).await;

    let local_ts = Utc::now();
    let remote_ts = local_ts + ChronoDuration::seconds(5);

    // Local insert applied to the store, not yet uploaded.
    let local = product("p1", "Local Product", local_ts);
    let entry = logger.log_transaction(Operation::Insert, &local).await.unwrap();
    let mut tx = db.begin().await.unwrap();
    db.entities().upsert_tx(&mut tx, &local).await.unwrap();
    tx.commit().await.unwrap();
    logger.mark_processed(&[entry.id.clone()]).await.unwrap();
    hub.reject(&entry.id).await;

    // Another device already created a different "p1" at the authority.
    let remote = product("p1", "Remote Product", remote_ts);
    hub.queue_page(
        SHOP,
        page(vec![remote_record(Operation::Insert, &remote, remote_ts)], remote_ts, false),
    )
    .await;

    engine.sync_shop(SHOP).await.unwrap();

    // Remote keeps the contested id.
    let row = db.entities().fetch(EntityType::Product, "p1").await.unwrap().unwrap();
    match row {
        EntitySnapshot::Product(p) => assert_eq!(p.name, "Remote Product"),
        other => panic!("unexpected snapshot: {other:?}"),
    }

    // Local record lives on under its deterministic replacement id and is
    // still pending upload under that id.
    let new_id = rekeyed_id("p1", DEVICE);
    let moved = db.entities().fetch(EntityType::Product, &new_id).await.unwrap().unwrap();
    match moved {
        EntitySnapshot::Product(p) => assert_eq!(p.name, "Local Product"),
        other => panic!("unexpected snapshot: {other:?}"),
    }

    let pending = db.log().get_pending_upload(SHOP, 10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].entity_id, new_id);

    let audits = db.audit().list_resolutions(BUSINESS, 10).await.unwrap();
    assert_eq!(audits[0].strategy, "rekey_local");
}

#[tokio::test]
async fn later_delete_wins_over_earlier_update() {
    let (db, logger, hub, engine) = setup(&[SHOP]).await;

    let local_ts = Utc::now();
    let remote_ts = local_ts + ChronoDuration::seconds(60);

    // Local update applied and pending.
    let local = product("p1", "Updated Locally", local_ts);
    let entry = logger.log_transaction(Operation::Update, &local).await.unwrap();
    let mut tx = db.begin().await.unwrap();
    db.entities().upsert_tx(&mut tx, &local).await.unwrap();
    tx.commit().await.unwrap();
    logger.mark_processed(&[entry.id.clone()]).await.unwrap();
    hub.reject(&entry.id).await;

    // Remote deleted the product later.
    let remote = product("p1", "Updated Locally", remote_ts);
    hub.queue_page(
        SHOP,
        page(vec![remote_record(Operation::Delete, &remote, remote_ts)], remote_ts, false),
    )
    .await;

    engine.sync_shop(SHOP).await.unwrap();

    assert!(db.entities().fetch(EntityType::Product, "p1").await.unwrap().is_none());

    let audits = db.audit().list_resolutions(BUSINESS, 10).await.unwrap();
    assert_eq!(audits[0].strategy, "keep_remote");
}

// =============================================================================
// Tenant Isolation
// =============================================================================

#[tokio::test]
async fn foreign_tenant_record_is_rejected_and_audited() {
    let (db, _logger, hub, engine) = setup(&[SHOP]).await;

    let ts = Utc::now();
    let foreign = EntitySnapshot::Product(ProductSnapshot {
        id: "intruder".into(),
        business_id: "biz-OTHER".into(),
        shop_id: SHOP.into(),
        sku: "SKU-X".into(),
        name: "Foreign Product".into(),
        price_cents: 100,
        is_active: true,
        updated_at: ts,
    });
    hub.queue_page(SHOP, page(vec![remote_record(Operation::Insert, &foreign, ts)], ts, false))
        .await;

    let summary = engine.sync_shop(SHOP).await.unwrap();
    assert_eq!(summary.downloaded, 0);

    // Never reached the primary store.
    assert!(db
        .entities()
        .fetch(EntityType::Product, "intruder")
        .await
        .unwrap()
        .is_none());

    // But the attempt is on record.
    assert_eq!(db.audit().count_violations().await.unwrap(), 1);
    let violations = db.audit().list_violations(10).await.unwrap();
    assert_eq!(violations[0].declared_business_id, "biz-OTHER");
    assert_eq!(violations[0].expected_business_id, BUSINESS);
}

// =============================================================================
// Bulk Sync
// =============================================================================

#[tokio::test]
async fn bulk_sync_isolates_shop_failures() {
    let shop_b = "shop-2";
    let (db, logger, hub, engine) = setup(&[SHOP, shop_b]).await;

    commit_local(&logger, Operation::Insert, &product("p1", "Espresso", Utc::now())).await;
    hub.break_shop(shop_b).await;

    let shops = engine.config().shop_ids().to_vec();
    let report = engine.clone().bulk_sync_shops(&shops).await;

    assert_eq!(report.succeeded, vec![SHOP.to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, shop_b);
    assert!(!report.all_succeeded());

    // The healthy shop's work still landed.
    assert_eq!(db.log().count_pending_upload(SHOP).await.unwrap(), 0);
}

#[tokio::test]
async fn bulk_sync_touches_only_the_requested_shops() {
    let shop_b = "shop-2";
    let (_db, _logger, hub, engine) = setup(&[SHOP, shop_b]).await;

    // The broken shop is provisioned but not requested.
    hub.break_shop(shop_b).await;

    let report = engine.clone().bulk_sync_shops(&[SHOP.to_string()]).await;

    assert_eq!(report.succeeded, vec![SHOP.to_string()]);
    assert!(report.all_succeeded());
}

#[tokio::test]
async fn failed_cycle_reports_error_status() {
    let (_db, logger, hub, engine) = setup(&[SHOP]).await;

    commit_local(&logger, Operation::Insert, &product("p1", "Espresso", Utc::now())).await;
    hub.break_shop(SHOP).await;

    let err = engine.sync_shop(SHOP).await.unwrap_err();
    assert!(err.is_retryable());

    let status = engine.shop_status(SHOP).await.unwrap();
    assert!(status.last_error.is_some());
    assert_eq!(status.pending_upload, 1);
}
