use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lot id assigned to an item released by a cycle
pub fn lot_id_for(cycle_id: &str, item_id: &str) -> String {
    format!("SP-{cycle_id}-{item_id}")
}

/// Cycle a released lot came from and how long it stays sterile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotOrigin {
    pub cycle_id: String,
    pub released_at: DateTime<Utc>,
    /// First instant at which the pack may no longer be used
    pub expires_at: DateTime<Utc>,
}

impl LotOrigin {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn expiry_status(&self, now: DateTime<Utc>, warning: Duration) -> ExpiryStatus {
        if self.is_expired(now) {
            ExpiryStatus::Expired
        } else if self.expires_at <= now + warning {
            ExpiryStatus::ExpiringSoon
        } else {
            ExpiryStatus::Valid
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryStatus {
    Valid,
    ExpiringSoon,
    Expired,
}

/// An unused pack lot close to, or past, its expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackExpiry {
    pub lot_id: String,
    pub cycle_id: String,
    pub expires_at: DateTime<Utc>,
    pub status: ExpiryStatus,
}

/// Shelf life stamped on released packs and the window in which an unused
/// pack is flagged as expiring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackPolicy {
    pub shelf_life: Duration,
    pub expiry_warning: Duration,
}

impl Default for PackPolicy {
    fn default() -> Self {
        Self {
            shelf_life: Duration::days(180),
            expiry_warning: Duration::days(30),
        }
    }
}

/// Where and by whom a pack was used
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureContext {
    pub operating_room: String,
    pub surgeon: String,
    pub procedure_date: NaiveDate,
}

/// Edge between a patient procedure, the pack lot used in it and the
/// cycle that lot came from. Never modified or removed once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceabilityLink {
    pub lot_id: String,
    pub cycle_id: String,
    pub procedure_id: String,
    pub patient_id: String,
    pub operating_room: String,
    pub surgeon: String,
    pub procedure_date: NaiveDate,
    pub linked_by: String,
    pub linked_at: DateTime<Utc>,
}

/// A pack found by tracing backwards from a patient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracedPack {
    pub lot_id: String,
    pub cycle_id: String,
    pub procedure_id: String,
}

/// Everything a recall of one cycle would reach
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecallImpact {
    pub cycle_id: String,
    pub lots: BTreeSet<String>,
    pub procedures: Vec<TraceabilityLink>,
    pub patients: BTreeSet<String>,
}

impl RecallImpact {
    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}
