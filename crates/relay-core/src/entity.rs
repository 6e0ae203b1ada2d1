//! # Entity Snapshots
//!
//! Strongly-typed snapshots of the entities that flow through the
//! transaction log and the sync path.
//!
//! ## Tagged Union Design
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     EntitySnapshot (tagged union)                       │
//! │                                                                         │
//! │  JSON wire form (internally tagged on "entity_type"):                  │
//! │                                                                         │
//! │  { "entity_type": "product", "id": "...", "sku": "...", ... }          │
//! │  { "entity_type": "sale",    "id": "...", "receipt_number": ... }      │
//! │  { "entity_type": "payment", "id": "...", "sale_id": ... }             │
//! │                                                                         │
//! │  The conflict resolver and the apply routine dispatch on the closed    │
//! │  variant set - never on untyped JSON objects.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::EntityType;

// =============================================================================
// Sale Status / Payment Method
// =============================================================================

/// The status of a synced sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    Completed,
    Voided,
}

/// How a payment was tendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Physical cash payment.
    Cash,
    /// Card payment on external terminal.
    ExternalCard,
}

// =============================================================================
// Snapshot Structs
// =============================================================================

/// Snapshot of a product at mutation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: String,
    pub business_id: String,
    pub shop_id: String,
    /// Stock Keeping Unit - business identifier.
    pub sku: String,
    pub name: String,
    /// Price in cents (smallest currency unit, never floats).
    pub price_cents: i64,
    /// Soft-delete flag carried in the snapshot.
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

/// Snapshot of a sale at mutation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleSnapshot {
    pub id: String,
    pub business_id: String,
    pub shop_id: String,
    pub receipt_number: String,
    pub status: SaleStatus,
    pub total_cents: i64,
    /// Device that recorded the sale.
    pub device_id: String,
    pub updated_at: DateTime<Utc>,
}

/// Snapshot of a payment at mutation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSnapshot {
    pub id: String,
    pub business_id: String,
    pub shop_id: String,
    pub sale_id: String,
    pub method: PaymentMethod,
    pub amount_cents: i64,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Tagged Union
// =============================================================================

/// A strongly-typed entity snapshot, tagged by entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum EntitySnapshot {
    Product(ProductSnapshot),
    Sale(SaleSnapshot),
    Payment(PaymentSnapshot),
}

impl EntitySnapshot {
    /// Decodes a snapshot from its JSON wire form.
    pub fn from_json(payload: &str) -> Result<Self, CoreError> {
        serde_json::from_str(payload).map_err(|e| CoreError::SnapshotDecode(e.to_string()))
    }

    /// Encodes the snapshot to its JSON wire form.
    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::SnapshotEncode(e.to_string()))
    }

    /// The entity type tag for this snapshot.
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntitySnapshot::Product(_) => EntityType::Product,
            EntitySnapshot::Sale(_) => EntityType::Sale,
            EntitySnapshot::Payment(_) => EntityType::Payment,
        }
    }

    /// The entity id.
    pub fn entity_id(&self) -> &str {
        match self {
            EntitySnapshot::Product(p) => &p.id,
            EntitySnapshot::Sale(s) => &s.id,
            EntitySnapshot::Payment(p) => &p.id,
        }
    }

    /// The declared business (tenant) id.
    pub fn business_id(&self) -> &str {
        match self {
            EntitySnapshot::Product(p) => &p.business_id,
            EntitySnapshot::Sale(s) => &s.business_id,
            EntitySnapshot::Payment(p) => &p.business_id,
        }
    }

    /// The declared shop id.
    pub fn shop_id(&self) -> &str {
        match self {
            EntitySnapshot::Product(p) => &p.shop_id,
            EntitySnapshot::Sale(s) => &s.shop_id,
            EntitySnapshot::Payment(p) => &p.shop_id,
        }
    }

    /// When the snapshotted entity was last touched.
    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            EntitySnapshot::Product(p) => p.updated_at,
            EntitySnapshot::Sale(s) => s.updated_at,
            EntitySnapshot::Payment(p) => p.updated_at,
        }
    }

    /// Returns a copy of this snapshot re-keyed under a new entity id.
    ///
    /// Used by create-conflict resolution: the local-only record moves to a
    /// new id while the remote authority's record keeps the original.
    pub fn with_id(&self, new_id: &str) -> Self {
        let mut cloned = self.clone();
        match &mut cloned {
            EntitySnapshot::Product(p) => p.id = new_id.to_string(),
            EntitySnapshot::Sale(s) => s.id = new_id.to_string(),
            EntitySnapshot::Payment(p) => p.id = new_id.to_string(),
        }
        cloned
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn product() -> EntitySnapshot {
        EntitySnapshot::Product(ProductSnapshot {
            id: "p1".into(),
            business_id: "biz-1".into(),
            shop_id: "shop-1".into(),
            sku: "SKU-001".into(),
            name: "Espresso".into(),
            price_cents: 350,
            is_active: true,
            updated_at: Utc::now(),
        })
    }

    #[test]
    fn json_form_is_tagged_by_entity_type() {
        let json = product().to_json().unwrap();
        assert!(json.contains(r#""entity_type":"product""#));

        let decoded = EntitySnapshot::from_json(&json).unwrap();
        assert_eq!(decoded.entity_type(), EntityType::Product);
        assert_eq!(decoded.entity_id(), "p1");
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        assert!(EntitySnapshot::from_json(r#"{"entity_type":"comet"}"#).is_err());
        assert!(EntitySnapshot::from_json("not json").is_err());
    }

    #[test]
    fn with_id_only_changes_the_id() {
        let original = product();
        let rekeyed = original.with_id("p1-rekeyed");
        assert_eq!(rekeyed.entity_id(), "p1-rekeyed");
        assert_eq!(rekeyed.business_id(), original.business_id());
        assert_eq!(rekeyed.updated_at(), original.updated_at());
    }
}
