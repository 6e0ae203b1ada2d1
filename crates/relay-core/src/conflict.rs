//! # Conflict Resolution
//!
//! Deterministic merge policy for competing versions of the same entity.
//!
//! ## Resolution Policy (tie-break order)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Conflict Resolution Policy                          │
//! │                                                                         │
//! │  1. TenantIsolationViolation  → NEVER auto-resolved, always rejected   │
//! │                                                                         │
//! │  2. DeleteConflict            → delete-wins iff the delete timestamp   │
//! │     (delete vs update)          is strictly later; otherwise the       │
//! │                                 update survives and the delete is      │
//! │                                 dropped with an audit note             │
//! │                                                                         │
//! │  3. UpdateConflict            → last-writer-wins on timestamps,        │
//! │     (update vs update)          ties broken in favor of the REMOTE     │
//! │                                 (authority) version                     │
//! │                                                                         │
//! │  4. CreateConflict            → remote version keeps the id, local     │
//! │     (insert vs insert)          record is re-keyed under a NEW         │
//! │                                 deterministic id (both preserved)      │
//! │                                                                         │
//! │  Anything without a deterministic rule → ManualReview, never guessed.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Requirement
//! `resolve` is a pure function of the conflict value - no clocks, no
//! randomness, no hidden state. A crash between resolving and applying is
//! safe because re-resolving the same conflict yields the same outcome,
//! including the re-keyed id (UUID v5 over stable inputs).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{EntityType, Operation};

// =============================================================================
// Conflict Type
// =============================================================================

/// Category of disagreement between a local and a remote version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Both sides updated the same entity concurrently.
    UpdateConflict,
    /// One side deleted while the other updated.
    DeleteConflict,
    /// The same id was created independently on two devices.
    CreateConflict,
    /// The record's declared tenant does not match the device scope.
    TenantIsolationViolation,
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictType::UpdateConflict => write!(f, "update_conflict"),
            ConflictType::DeleteConflict => write!(f, "delete_conflict"),
            ConflictType::CreateConflict => write!(f, "create_conflict"),
            ConflictType::TenantIsolationViolation => write!(f, "tenant_isolation_violation"),
        }
    }
}

/// Classifies a pair of concurrent operations into a conflict type.
///
/// Both-deleted is not a conflict (the sides already agree) and returns
/// `None`; the caller should simply apply the remote delete.
pub fn classify(local_op: Operation, remote_op: Operation) -> Option<ConflictType> {
    match (local_op, remote_op) {
        (Operation::Delete, Operation::Delete) => None,
        (Operation::Delete, _) | (_, Operation::Delete) => Some(ConflictType::DeleteConflict),
        (Operation::Insert, Operation::Insert) => Some(ConflictType::CreateConflict),
        _ => Some(ConflictType::UpdateConflict),
    }
}

// =============================================================================
// Data Conflict
// =============================================================================

/// A transient record of two competing versions of the same entity.
///
/// Created by the sync engine during the resolving phase, consumed by
/// [`resolve`] within the same cycle, and persisted only as an audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConflict {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub business_id: String,
    pub conflict_type: ConflictType,

    /// What the local side did.
    pub local_operation: Operation,
    /// What the remote side did.
    pub remote_operation: Operation,

    /// Local snapshot JSON, if the local side still has one.
    pub local_payload: Option<String>,
    /// Remote snapshot JSON, if the remote side carries one.
    pub remote_payload: Option<String>,

    /// When the local change happened (device clock).
    pub local_timestamp: DateTime<Utc>,
    /// When the remote change happened (authority clock).
    pub remote_timestamp: DateTime<Utc>,

    /// Device that made the local change (input to deterministic re-keying).
    pub local_device_id: String,

    /// Human-readable explanation for the audit trail.
    pub reason: String,
}

// =============================================================================
// Resolution Outcome
// =============================================================================

/// The resolver's verdict on a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Resolution {
    /// Local state survives; the remote version is dropped (audited).
    KeepLocal { note: String },
    /// Remote version is applied over local state.
    KeepRemote { note: String },
    /// Remote keeps the original id; the local-only record moves to
    /// `new_local_id`. Both payloads are preserved.
    RekeyLocal { new_local_id: String, note: String },
    /// Security rejection - the record must not be applied.
    Reject { note: String },
    /// No deterministic rule applies; queue for manual review.
    ManualReview { note: String },
}

impl Resolution {
    /// Short strategy name for the audit trail.
    pub fn strategy(&self) -> &'static str {
        match self {
            Resolution::KeepLocal { .. } => "keep_local",
            Resolution::KeepRemote { .. } => "keep_remote",
            Resolution::RekeyLocal { .. } => "rekey_local",
            Resolution::Reject { .. } => "reject",
            Resolution::ManualReview { .. } => "manual_review",
        }
    }

    /// The audit note attached to this resolution.
    pub fn note(&self) -> &str {
        match self {
            Resolution::KeepLocal { note }
            | Resolution::KeepRemote { note }
            | Resolution::RekeyLocal { note, .. }
            | Resolution::Reject { note }
            | Resolution::ManualReview { note } => note,
        }
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Derives the deterministic replacement id for a re-keyed local record.
///
/// UUID v5 over (entity id, device id): replaying the same create conflict
/// after a crash produces the same new id, so re-resolution is idempotent.
pub fn rekeyed_id(entity_id: &str, device_id: &str) -> String {
    let name = format!("{}:{}", entity_id, device_id);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Resolves a conflict. Pure function: same inputs, same outcome.
pub fn resolve(conflict: &DataConflict) -> Resolution {
    match conflict.conflict_type {
        ConflictType::TenantIsolationViolation => Resolution::Reject {
            note: format!(
                "tenant isolation violation: {} - never auto-resolved",
                conflict.reason
            ),
        },

        ConflictType::DeleteConflict => resolve_delete(conflict),

        ConflictType::UpdateConflict => {
            if conflict.local_payload.is_none() || conflict.remote_payload.is_none() {
                return Resolution::ManualReview {
                    note: "update conflict missing a payload side".to_string(),
                };
            }
            // Last-writer-wins; the remote authority wins ties so every
            // device converges on one ordering.
            if conflict.remote_timestamp >= conflict.local_timestamp {
                Resolution::KeepRemote {
                    note: format!(
                        "remote-wins: remote {} >= local {}",
                        conflict.remote_timestamp, conflict.local_timestamp
                    ),
                }
            } else {
                Resolution::KeepLocal {
                    note: format!(
                        "local-wins: local {} > remote {}",
                        conflict.local_timestamp, conflict.remote_timestamp
                    ),
                }
            }
        }

        ConflictType::CreateConflict => {
            if conflict.local_payload.is_none() {
                return Resolution::ManualReview {
                    note: "create conflict without a local payload".to_string(),
                };
            }
            Resolution::RekeyLocal {
                new_local_id: rekeyed_id(&conflict.entity_id, &conflict.local_device_id),
                note: "independent creates: remote keeps id, local re-keyed".to_string(),
            }
        }
    }
}

/// Delete-vs-update: the delete wins only when strictly later than the
/// competing update. A dropped delete never resurrects silently - the
/// audit note records it.
fn resolve_delete(conflict: &DataConflict) -> Resolution {
    let (delete_is_local, delete_ts, update_ts) =
        if conflict.local_operation == Operation::Delete {
            (true, conflict.local_timestamp, conflict.remote_timestamp)
        } else {
            (false, conflict.remote_timestamp, conflict.local_timestamp)
        };

    if delete_ts > update_ts {
        // Delete wins.
        if delete_is_local {
            Resolution::KeepLocal {
                note: format!(
                    "delete-wins: local delete {} > remote update {}",
                    delete_ts, update_ts
                ),
            }
        } else {
            Resolution::KeepRemote {
                note: format!(
                    "delete-wins: remote delete {} > local update {}",
                    delete_ts, update_ts
                ),
            }
        }
    } else {
        // Not strictly later (tie included): the update survives and the
        // delete is dropped with a trace.
        if delete_is_local {
            Resolution::KeepRemote {
                note: format!(
                    "update-wins: local delete {} dropped, remote update {} kept",
                    delete_ts, update_ts
                ),
            }
        } else {
            Resolution::KeepLocal {
                note: format!(
                    "update-wins: remote delete {} dropped, local update {} kept",
                    delete_ts, update_ts
                ),
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    fn conflict(
        conflict_type: ConflictType,
        local_op: Operation,
        remote_op: Operation,
        local_ts: i64,
        remote_ts: i64,
    ) -> DataConflict {
        DataConflict {
            entity_type: EntityType::Product,
            entity_id: "p1".into(),
            business_id: "biz-1".into(),
            conflict_type,
            local_operation: local_op,
            remote_operation: remote_op,
            local_payload: Some("{\"local\":true}".into()),
            remote_payload: Some("{\"remote\":true}".into()),
            local_timestamp: ts(local_ts),
            remote_timestamp: ts(remote_ts),
            local_device_id: "dev-1".into(),
            reason: "test".into(),
        }
    }

    #[test]
    fn classify_covers_all_pairings() {
        assert_eq!(classify(Operation::Delete, Operation::Delete), None);
        assert_eq!(
            classify(Operation::Delete, Operation::Update),
            Some(ConflictType::DeleteConflict)
        );
        assert_eq!(
            classify(Operation::Update, Operation::Delete),
            Some(ConflictType::DeleteConflict)
        );
        assert_eq!(
            classify(Operation::Insert, Operation::Insert),
            Some(ConflictType::CreateConflict)
        );
        assert_eq!(
            classify(Operation::Update, Operation::Update),
            Some(ConflictType::UpdateConflict)
        );
        assert_eq!(
            classify(Operation::Insert, Operation::Update),
            Some(ConflictType::UpdateConflict)
        );
    }

    // Scenario A: local update t=10, remote update t=12 → remote wins.
    #[test]
    fn update_conflict_remote_wins_when_later() {
        let c = conflict(
            ConflictType::UpdateConflict,
            Operation::Update,
            Operation::Update,
            10,
            12,
        );
        assert!(matches!(resolve(&c), Resolution::KeepRemote { .. }));
    }

    #[test]
    fn update_conflict_local_wins_when_later() {
        let c = conflict(
            ConflictType::UpdateConflict,
            Operation::Update,
            Operation::Update,
            20,
            12,
        );
        assert!(matches!(resolve(&c), Resolution::KeepLocal { .. }));
    }

    #[test]
    fn update_conflict_tie_goes_to_remote() {
        let c = conflict(
            ConflictType::UpdateConflict,
            Operation::Update,
            Operation::Update,
            10,
            10,
        );
        assert!(matches!(resolve(&c), Resolution::KeepRemote { .. }));
    }

    // Scenario B: local delete t=5, remote update t=8 → update survives.
    #[test]
    fn earlier_delete_loses_to_later_update() {
        let c = conflict(
            ConflictType::DeleteConflict,
            Operation::Delete,
            Operation::Update,
            5,
            8,
        );
        let resolution = resolve(&c);
        assert!(matches!(resolution, Resolution::KeepRemote { .. }));
        assert!(resolution.note().contains("dropped"));
    }

    #[test]
    fn later_delete_beats_earlier_update() {
        let c = conflict(
            ConflictType::DeleteConflict,
            Operation::Delete,
            Operation::Update,
            9,
            8,
        );
        assert!(matches!(resolve(&c), Resolution::KeepLocal { .. }));
    }

    #[test]
    fn tied_remote_delete_loses_to_local_update() {
        let c = conflict(
            ConflictType::DeleteConflict,
            Operation::Update,
            Operation::Delete,
            100,
            100,
        );
        let resolution = resolve(&c);
        assert!(matches!(resolution, Resolution::KeepLocal { .. }));
        assert!(resolution.note().contains("dropped"));
    }

    #[test]
    fn tied_local_delete_loses_to_remote_update() {
        let c = conflict(
            ConflictType::DeleteConflict,
            Operation::Delete,
            Operation::Update,
            100,
            100,
        );
        assert!(matches!(resolve(&c), Resolution::KeepRemote { .. }));
    }

    #[test]
    fn remote_delete_beats_earlier_local_update() {
        let c = conflict(
            ConflictType::DeleteConflict,
            Operation::Update,
            Operation::Delete,
            3,
            7,
        );
        assert!(matches!(resolve(&c), Resolution::KeepRemote { .. }));
    }

    // Scenario D: independent creates → local re-keyed, both preserved.
    #[test]
    fn create_conflict_rekeys_local_deterministically() {
        let c = conflict(
            ConflictType::CreateConflict,
            Operation::Insert,
            Operation::Insert,
            10,
            11,
        );
        let first = resolve(&c);
        let second = resolve(&c);
        assert_eq!(first, second);

        match first {
            Resolution::RekeyLocal { new_local_id, .. } => {
                assert_ne!(new_local_id, "p1");
                assert_eq!(new_local_id, rekeyed_id("p1", "dev-1"));
            }
            other => panic!("expected RekeyLocal, got {:?}", other),
        }
    }

    #[test]
    fn rekeyed_id_differs_per_device() {
        assert_ne!(rekeyed_id("p1", "dev-1"), rekeyed_id("p1", "dev-2"));
    }

    #[test]
    fn tenant_violation_is_never_auto_resolved() {
        let c = conflict(
            ConflictType::TenantIsolationViolation,
            Operation::Update,
            Operation::Update,
            10,
            12,
        );
        assert!(matches!(resolve(&c), Resolution::Reject { .. }));
    }

    #[test]
    fn missing_payload_routes_to_manual_review() {
        let mut c = conflict(
            ConflictType::UpdateConflict,
            Operation::Update,
            Operation::Update,
            10,
            12,
        );
        c.remote_payload = None;
        assert!(matches!(resolve(&c), Resolution::ManualReview { .. }));
    }

    // Determinism: resolving the same conflict many times always yields
    // the same outcome, regardless of call order.
    #[test]
    fn resolution_is_deterministic() {
        let conflicts = [
            conflict(
                ConflictType::UpdateConflict,
                Operation::Update,
                Operation::Update,
                10,
                12,
            ),
            conflict(
                ConflictType::DeleteConflict,
                Operation::Delete,
                Operation::Update,
                5,
                8,
            ),
            conflict(
                ConflictType::CreateConflict,
                Operation::Insert,
                Operation::Insert,
                1,
                2,
            ),
        ];

        let forward: Vec<_> = conflicts.iter().map(resolve).collect();
        let backward: Vec<_> = conflicts.iter().rev().map(resolve).collect();
        assert_eq!(forward[0], backward[2]);
        assert_eq!(forward[1], backward[1]);
        assert_eq!(forward[2], backward[0]);
    }
}
