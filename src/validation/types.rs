use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CssdError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistItem {
    PackagingIntegrity,
    LabelQuality,
    SterileBarrier,
    VisualInspection,
}

impl ChecklistItem {
    pub const ALL: [ChecklistItem; 4] = [
        ChecklistItem::PackagingIntegrity,
        ChecklistItem::LabelQuality,
        ChecklistItem::SterileBarrier,
        ChecklistItem::VisualInspection,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChecklistItem::PackagingIntegrity => "packaging_integrity",
            ChecklistItem::LabelQuality => "label_quality",
            ChecklistItem::SterileBarrier => "sterile_barrier",
            ChecklistItem::VisualInspection => "visual_inspection",
        }
    }

    /// Rejection reason recorded when this check fails
    pub fn rejection_reason(self) -> RejectionReason {
        match self {
            ChecklistItem::PackagingIntegrity => RejectionReason::PackagingIntegrity,
            ChecklistItem::LabelQuality => RejectionReason::LabelQuality,
            ChecklistItem::SterileBarrier => RejectionReason::SterileBarrier,
            ChecklistItem::VisualInspection => RejectionReason::VisualInspection,
        }
    }
}

/// Inspector's checklist. `None` means no explicit result was given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checklist {
    pub packaging_integrity: Option<bool>,
    pub label_quality: Option<bool>,
    pub sterile_barrier: Option<bool>,
    pub visual_inspection: Option<bool>,
}

impl Checklist {
    /// Same result for every check
    pub fn uniform(passed: bool) -> Self {
        Self {
            packaging_integrity: Some(passed),
            label_quality: Some(passed),
            sterile_barrier: Some(passed),
            visual_inspection: Some(passed),
        }
    }

    pub fn result(&self, item: ChecklistItem) -> Option<bool> {
        match item {
            ChecklistItem::PackagingIntegrity => self.packaging_integrity,
            ChecklistItem::LabelQuality => self.label_quality,
            ChecklistItem::SterileBarrier => self.sterile_barrier,
            ChecklistItem::VisualInspection => self.visual_inspection,
        }
    }

    pub fn set(&mut self, item: ChecklistItem, passed: bool) {
        let slot = match item {
            ChecklistItem::PackagingIntegrity => &mut self.packaging_integrity,
            ChecklistItem::LabelQuality => &mut self.label_quality,
            ChecklistItem::SterileBarrier => &mut self.sterile_barrier,
            ChecklistItem::VisualInspection => &mut self.visual_inspection,
        };
        *slot = Some(passed);
    }

    pub fn missing(&self) -> Vec<ChecklistItem> {
        ChecklistItem::ALL
            .into_iter()
            .filter(|item| self.result(*item).is_none())
            .collect()
    }

    pub fn first_failure(&self) -> Option<ChecklistItem> {
        ChecklistItem::ALL
            .into_iter()
            .find(|item| self.result(*item) == Some(false))
    }

    /// Approved iff every check passed. Only meaningful for a complete checklist.
    pub fn outcome(&self) -> Outcome {
        if ChecklistItem::ALL
            .into_iter()
            .all(|item| self.result(item) == Some(true))
        {
            Outcome::Approved
        } else {
            Outcome::Rejected
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Approved,
    Rejected,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Approved => f.write_str("approved"),
            Outcome::Rejected => f.write_str("rejected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    PackagingIntegrity,
    LabelQuality,
    SterileBarrier,
    VisualInspection,
    PhysicalIndicatorFailure,
    ChemicalIndicatorFailure,
    BiologicalIndicatorFailure,
    TemperatureDeviation,
    PressureDeviation,
    CycleTimeDeviation,
    EquipmentMalfunction,
    /// Must be explained in the comments
    Other,
}

impl std::str::FromStr for RejectionReason {
    type Err = CssdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let reason = match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "packaging_integrity" => RejectionReason::PackagingIntegrity,
            "label_quality" => RejectionReason::LabelQuality,
            "sterile_barrier" => RejectionReason::SterileBarrier,
            "visual_inspection" => RejectionReason::VisualInspection,
            "physical_indicator_failure" => RejectionReason::PhysicalIndicatorFailure,
            "chemical_indicator_failure" => RejectionReason::ChemicalIndicatorFailure,
            "biological_indicator_failure" => RejectionReason::BiologicalIndicatorFailure,
            "temperature_deviation" => RejectionReason::TemperatureDeviation,
            "pressure_deviation" => RejectionReason::PressureDeviation,
            "cycle_time_deviation" => RejectionReason::CycleTimeDeviation,
            "equipment_malfunction" => RejectionReason::EquipmentMalfunction,
            "other" => RejectionReason::Other,
            other => {
                return Err(CssdError::validation(
                    "rejection_reason",
                    format!("unknown reason '{other}'"),
                ))
            }
        };
        Ok(reason)
    }
}

/// Signer id, time and the content hash the signer acknowledged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub signer: String,
    pub signed_at: DateTime<Utc>,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub id: String,
    pub cycle_id: String,
    pub inspector: String,
    pub checklist: Checklist,
    pub comments: String,
    pub outcome: Outcome,
    pub rejection_reason: Option<RejectionReason>,
    /// SHA-256 (hex) over the cycle id, checklist and comments
    pub content_hash: String,
    pub signature: Option<Signature>,
    /// Rejection record that closed this approval before it was signed
    #[serde(default)]
    pub superseded_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ValidationRecord {
    /// Approved and signed: the load may be distributed
    pub fn is_released(&self) -> bool {
        self.outcome == Outcome::Approved && self.signature.is_some()
    }

    pub fn awaiting_signature(&self) -> bool {
        self.outcome == Outcome::Approved && self.signature.is_none() && self.superseded_by.is_none()
    }
}
