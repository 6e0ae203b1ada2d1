//! # Audit Repository
//!
//! Append-only trails for conflict resolutions and tenant isolation
//! violations. Rows here are evidence: they are written once and never
//! updated or deleted by application code.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::DbResult;
use relay_core::{DataConflict, Resolution};

/// A recorded conflict resolution, as read back for review.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConflictAuditRow {
    pub id: String,
    pub business_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub conflict_type: String,
    pub strategy: String,
    pub outcome: String,
    pub reason: String,
    pub resolved_at: DateTime<Utc>,
}

/// A recorded tenant isolation violation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TenantViolationRow {
    pub id: String,
    pub device_id: String,
    pub expected_business_id: String,
    pub expected_shop_id: String,
    pub declared_business_id: String,
    pub declared_shop_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// Repository for the audit trails.
#[derive(Debug, Clone)]
pub struct AuditRepository {
    pool: SqlitePool,
}

impl AuditRepository {
    /// Creates a new AuditRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AuditRepository { pool }
    }

    /// Records a conflict and the resolution applied to it.
    ///
    /// Every resolution is recorded, including automatic ones; the audit
    /// trail is how "remote silently overwrote local" stays visible.
    pub async fn record_resolution(
        &self,
        conflict: &DataConflict,
        resolution: &Resolution,
    ) -> DbResult<String> {
        let id = Uuid::new_v4().to_string();

        info!(
            entity_type = %conflict.entity_type,
            entity_id = %conflict.entity_id,
            conflict_type = %conflict.conflict_type,
            strategy = resolution.strategy(),
            "Recording conflict resolution"
        );

        sqlx::query(
            r#"
            INSERT INTO conflict_audit (
                id, business_id, entity_type, entity_id, conflict_type,
                strategy, outcome, reason, resolved_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&id)
        .bind(&conflict.business_id)
        .bind(conflict.entity_type.to_string())
        .bind(&conflict.entity_id)
        .bind(conflict.conflict_type.to_string())
        .bind(resolution.strategy())
        .bind(resolution.note())
        .bind(&conflict.reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Records a tenant isolation violation.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_violation(
        &self,
        device_id: &str,
        expected_business_id: &str,
        expected_shop_id: &str,
        declared_business_id: &str,
        declared_shop_id: &str,
        entity_type: &str,
        entity_id: &str,
        reason: &str,
    ) -> DbResult<String> {
        let id = Uuid::new_v4().to_string();

        warn!(
            device_id,
            expected_business_id,
            declared_business_id,
            entity_type,
            entity_id,
            "Recording tenant isolation violation"
        );

        sqlx::query(
            r#"
            INSERT INTO tenant_violations (
                id, device_id, expected_business_id, expected_shop_id,
                declared_business_id, declared_shop_id, entity_type,
                entity_id, reason, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&id)
        .bind(device_id)
        .bind(expected_business_id)
        .bind(expected_shop_id)
        .bind(declared_business_id)
        .bind(declared_shop_id)
        .bind(entity_type)
        .bind(entity_id)
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Resolutions queued for manual review, oldest first.
    pub async fn list_manual_review(&self, limit: u32) -> DbResult<Vec<ConflictAuditRow>> {
        let rows = sqlx::query_as::<_, ConflictAuditRow>(
            r#"
            SELECT * FROM conflict_audit
            WHERE strategy = 'manual_review'
            ORDER BY resolved_at ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Recent resolutions for a business, newest first.
    pub async fn list_resolutions(
        &self,
        business_id: &str,
        limit: u32,
    ) -> DbResult<Vec<ConflictAuditRow>> {
        let rows = sqlx::query_as::<_, ConflictAuditRow>(
            r#"
            SELECT * FROM conflict_audit
            WHERE business_id = ?1
            ORDER BY resolved_at DESC
            LIMIT ?2
            "#,
        )
        .bind(business_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Recorded tenant violations, newest first.
    pub async fn list_violations(&self, limit: u32) -> DbResult<Vec<TenantViolationRow>> {
        let rows = sqlx::query_as::<_, TenantViolationRow>(
            "SELECT * FROM tenant_violations ORDER BY recorded_at DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Counts recorded tenant violations.
    pub async fn count_violations(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tenant_violations")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
