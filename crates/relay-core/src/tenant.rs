//! # Tenant Isolation Guard
//!
//! The single enforcement point preventing cross-tenant data leakage
//! through the sync path.
//!
//! ## Enforcement Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Downloaded Record Pipeline                             │
//! │                                                                         │
//! │  remote record ──► TenantScope::validate ──► conflict detection ──►    │
//! │                          │                       resolution/apply      │
//! │                          │ mismatch                                     │
//! │                          ▼                                              │
//! │                  TenantIsolationViolation                               │
//! │                  (audited, record NEVER reaches resolution)             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The guard runs BEFORE conflict resolution and BEFORE any persistence.
//! A rejected record is always audited, never silently dropped.

use serde::{Deserialize, Serialize};

use crate::entity::EntitySnapshot;

// =============================================================================
// Tenant Scope
// =============================================================================

/// The tenant scope an authenticated device is allowed to touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantScope {
    /// Business (tenant) the device belongs to.
    pub business_id: String,
    /// Shop within the business.
    pub shop_id: String,
}

impl TenantScope {
    pub fn new(business_id: impl Into<String>, shop_id: impl Into<String>) -> Self {
        TenantScope {
            business_id: business_id.into(),
            shop_id: shop_id.into(),
        }
    }

    /// Returns true only if the declared identifiers match this scope.
    ///
    /// On false the caller must raise a `TenantIsolationViolation` rather
    /// than apply the record.
    pub fn validate(&self, declared_business_id: &str, declared_shop_id: &str) -> bool {
        self.business_id == declared_business_id && self.shop_id == declared_shop_id
    }

    /// Validates the identifiers a snapshot declares about itself.
    pub fn validate_snapshot(&self, snapshot: &EntitySnapshot) -> bool {
        self.validate(snapshot.business_id(), snapshot.shop_id())
    }

    /// Explains a mismatch for the audit trail.
    pub fn mismatch_reason(&self, declared_business_id: &str, declared_shop_id: &str) -> String {
        format!(
            "record declares business '{}' shop '{}' but device scope is business '{}' shop '{}'",
            declared_business_id, declared_shop_id, self.business_id, self.shop_id
        )
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
