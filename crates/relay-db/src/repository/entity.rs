//! # Entity Repository (Primary Store)
//!
//! Materialized rows for products, sales and payments. This is the store
//! the POS reads from; the transaction log is the authority on history.
//!
//! ## Idempotent Apply
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 Apply Semantics (at-least-once safe)                    │
//! │                                                                         │
//! │  insert/update → INSERT ... ON CONFLICT(id) DO UPDATE   (upsert)       │
//! │  delete        → DELETE WHERE id = ?                     (no-op if     │
//! │                                                           already gone) │
//! │                                                                         │
//! │  Replaying the same log entry twice converges on the same row state,   │
//! │  which is what lets recovery and re-downloaded pages be safe.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All mutations take an open transaction so callers can pair the row write
//! with log bookkeeping atomically.

use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::error::{DbError, DbResult};
use relay_core::{
    EntitySnapshot, EntityType, PaymentMethod, PaymentSnapshot, ProductSnapshot, SaleSnapshot,
    SaleStatus,
};

// =============================================================================
// Row types (database shape, mapped to core snapshots at the boundary)
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: String,
    business_id: String,
    shop_id: String,
    sku: String,
    name: String,
    price_cents: i64,
    is_active: bool,
    updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct SaleRow {
    id: String,
    business_id: String,
    shop_id: String,
    receipt_number: String,
    status: String,
    total_cents: i64,
    device_id: String,
    updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: String,
    business_id: String,
    shop_id: String,
    sale_id: String,
    method: String,
    amount_cents: i64,
    updated_at: chrono::DateTime<chrono::Utc>,
}

fn sale_status_from_db(id: &str, status: &str) -> DbResult<SaleStatus> {
    match status {
        "completed" => Ok(SaleStatus::Completed),
        "voided" => Ok(SaleStatus::Voided),
        other => Err(DbError::CorruptPayload {
            entity_id: id.to_string(),
            message: format!("unknown sale status '{other}'"),
        }),
    }
}

fn sale_status_to_db(status: SaleStatus) -> &'static str {
    match status {
        SaleStatus::Completed => "completed",
        SaleStatus::Voided => "voided",
    }
}

fn payment_method_from_db(id: &str, method: &str) -> DbResult<PaymentMethod> {
    match method {
        "cash" => Ok(PaymentMethod::Cash),
        "external_card" => Ok(PaymentMethod::ExternalCard),
        other => Err(DbError::CorruptPayload {
            entity_id: id.to_string(),
            message: format!("unknown payment method '{other}'"),
        }),
    }
}

fn payment_method_to_db(method: PaymentMethod) -> &'static str {
    match method {
        PaymentMethod::Cash => "cash",
        PaymentMethod::ExternalCard => "external_card",
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the materialized primary store.
#[derive(Debug, Clone)]
pub struct EntityRepository {
    pool: SqlitePool,
}

impl EntityRepository {
    /// Creates a new EntityRepository.
    pub fn new(pool: SqlitePool) -> Self {
        EntityRepository { pool }
    }

    /// Upserts a snapshot into its table, inside an open transaction.
    pub async fn upsert_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        snapshot: &EntitySnapshot,
    ) -> DbResult<()> {
        debug!(
            entity_type = %snapshot.entity_type(),
            entity_id = %snapshot.entity_id(),
            "Upserting entity"
        );

        match snapshot {
            EntitySnapshot::Product(p) => self.upsert_product(tx, p).await,
            EntitySnapshot::Sale(s) => self.upsert_sale(tx, s).await,
            EntitySnapshot::Payment(p) => self.upsert_payment(tx, p).await,
        }
    }

    /// Deletes an entity row, inside an open transaction.
    ///
    /// Deleting a row that is already gone is not an error: delete is the
    /// idempotent half of at-least-once apply.
    pub async fn delete_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        entity_type: EntityType,
        entity_id: &str,
    ) -> DbResult<()> {
        let sql = match entity_type {
            EntityType::Product => "DELETE FROM products WHERE id = ?1",
            EntityType::Sale => "DELETE FROM sales WHERE id = ?1",
            EntityType::Payment => "DELETE FROM payments WHERE id = ?1",
        };

        sqlx::query(sql).bind(entity_id).execute(&mut **tx).await?;
        Ok(())
    }

    /// Moves a row to a new primary key, inside an open transaction.
    ///
    /// Used by create-conflict resolution. A no-op if the old row does not
    /// exist (the pending log entry is still rewritten by the caller).
    pub async fn rekey_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        entity_type: EntityType,
        old_id: &str,
        new_id: &str,
    ) -> DbResult<()> {
        debug!(%entity_type, old_id, new_id, "Re-keying entity row");

        let sql = match entity_type {
            EntityType::Product => "UPDATE products SET id = ?2 WHERE id = ?1",
            EntityType::Sale => "UPDATE sales SET id = ?2 WHERE id = ?1",
            EntityType::Payment => "UPDATE payments SET id = ?2 WHERE id = ?1",
        };

        sqlx::query(sql)
            .bind(old_id)
            .bind(new_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Fetches the current row for an entity as a snapshot, if present.
    pub async fn fetch(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> DbResult<Option<EntitySnapshot>> {
        match entity_type {
            EntityType::Product => {
                let row = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = ?1")
                    .bind(entity_id)
                    .fetch_optional(&self.pool)
                    .await?;

                Ok(row.map(|r| {
                    EntitySnapshot::Product(ProductSnapshot {
                        id: r.id,
                        business_id: r.business_id,
                        shop_id: r.shop_id,
                        sku: r.sku,
                        name: r.name,
                        price_cents: r.price_cents,
                        is_active: r.is_active,
                        updated_at: r.updated_at,
                    })
                }))
            }
            EntityType::Sale => {
                let row = sqlx::query_as::<_, SaleRow>("SELECT * FROM sales WHERE id = ?1")
                    .bind(entity_id)
                    .fetch_optional(&self.pool)
                    .await?;

                match row {
                    None => Ok(None),
                    Some(r) => {
                        let status = sale_status_from_db(&r.id, &r.status)?;
                        Ok(Some(EntitySnapshot::Sale(SaleSnapshot {
                            id: r.id,
                            business_id: r.business_id,
                            shop_id: r.shop_id,
                            receipt_number: r.receipt_number,
                            status,
                            total_cents: r.total_cents,
                            device_id: r.device_id,
                            updated_at: r.updated_at,
                        })))
                    }
                }
            }
            EntityType::Payment => {
                let row = sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE id = ?1")
                    .bind(entity_id)
                    .fetch_optional(&self.pool)
                    .await?;

                match row {
                    None => Ok(None),
                    Some(r) => {
                        let method = payment_method_from_db(&r.id, &r.method)?;
                        Ok(Some(EntitySnapshot::Payment(PaymentSnapshot {
                            id: r.id,
                            business_id: r.business_id,
                            shop_id: r.shop_id,
                            sale_id: r.sale_id,
                            method,
                            amount_cents: r.amount_cents,
                            updated_at: r.updated_at,
                        })))
                    }
                }
            }
        }
    }

    // =========================================================================
    // Per-table upserts
    // =========================================================================

    async fn upsert_product(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        p: &ProductSnapshot,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, business_id, shop_id, sku, name, price_cents, is_active, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                business_id = excluded.business_id,
                shop_id = excluded.shop_id,
                sku = excluded.sku,
                name = excluded.name,
                price_cents = excluded.price_cents,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&p.id)
        .bind(&p.business_id)
        .bind(&p.shop_id)
        .bind(&p.sku)
        .bind(&p.name)
        .bind(p.price_cents)
        .bind(p.is_active)
        .bind(p.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn upsert_sale(&self, tx: &mut Transaction<'_, Sqlite>, s: &SaleSnapshot) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sales (id, business_id, shop_id, receipt_number, status, total_cents, device_id, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                business_id = excluded.business_id,
                shop_id = excluded.shop_id,
                receipt_number = excluded.receipt_number,
                status = excluded.status,
                total_cents = excluded.total_cents,
                device_id = excluded.device_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&s.id)
        .bind(&s.business_id)
        .bind(&s.shop_id)
        .bind(&s.receipt_number)
        .bind(sale_status_to_db(s.status))
        .bind(s.total_cents)
        .bind(&s.device_id)
        .bind(s.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn upsert_payment(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        p: &PaymentSnapshot,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, business_id, shop_id, sale_id, method, amount_cents, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                business_id = excluded.business_id,
                shop_id = excluded.shop_id,
                sale_id = excluded.sale_id,
                method = excluded.method,
                amount_cents = excluded.amount_cents,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&p.id)
        .bind(&p.business_id)
        .bind(&p.shop_id)
        .bind(&p.sale_id)
        .bind(payment_method_to_db(p.method))
        .bind(p.amount_cents)
        .bind(p.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}
