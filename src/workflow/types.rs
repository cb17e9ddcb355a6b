use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CssdError;

/// Physical unit classes tracked by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Basket,
    InstrumentTray,
    SterilePack,
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ItemType::Basket => "basket",
            ItemType::InstrumentTray => "instrument_tray",
            ItemType::SterilePack => "sterile_pack",
        };
        f.write_str(name)
    }
}

/// Contamination level declared at intake; drives the required soak time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[serde(rename_all = "snake_case")]
pub enum ContaminationLevel {
    Standard,
    Medium,
    High,
}

impl ContaminationLevel {
    pub fn required_soak_minutes(self) -> i64 {
        match self {
            ContaminationLevel::Standard => 15,
            ContaminationLevel::Medium => 30,
            ContaminationLevel::High => 60,
        }
    }

    pub fn required_soak(self) -> Duration {
        Duration::minutes(self.required_soak_minutes())
    }
}

impl std::fmt::Display for ContaminationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ContaminationLevel::Standard => "standard",
            ContaminationLevel::Medium => "medium",
            ContaminationLevel::High => "high",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ContaminationLevel {
    type Err = CssdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(ContaminationLevel::Standard),
            "medium" => Ok(ContaminationLevel::Medium),
            "high" => Ok(ContaminationLevel::High),
            other => Err(CssdError::validation(
                "contamination_level",
                format!("unknown level '{other}' (expected standard, medium or high)"),
            )),
        }
    }
}

/// Workflow stage of a single item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Registered,
    Soaking,
    Cleaning,
    Packaging,
    Loaded,
    Sterilizing,
    PendingValidation,
    Validated,
    Rejected,
    Distributed,
    Disposed,
}

impl Stage {
    pub const ALL: [Stage; 11] = [
        Stage::Registered,
        Stage::Soaking,
        Stage::Cleaning,
        Stage::Packaging,
        Stage::Loaded,
        Stage::Sterilizing,
        Stage::PendingValidation,
        Stage::Validated,
        Stage::Rejected,
        Stage::Distributed,
        Stage::Disposed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Distributed | Stage::Disposed)
    }

    /// Stages during which the item belongs to a load and is driven by the cycle engine
    pub fn is_bound_to_load(self) -> bool {
        matches!(
            self,
            Stage::Loaded | Stage::Sterilizing | Stage::PendingValidation
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Registered => "registered",
            Stage::Soaking => "soaking",
            Stage::Cleaning => "cleaning",
            Stage::Packaging => "packaging",
            Stage::Loaded => "loaded",
            Stage::Sterilizing => "sterilizing",
            Stage::PendingValidation => "pending_validation",
            Stage::Validated => "validated",
            Stage::Rejected => "rejected",
            Stage::Distributed => "distributed",
            Stage::Disposed => "disposed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = CssdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == wanted)
            .ok_or_else(|| CssdError::validation("stage", format!("unknown stage '{s}'")))
    }
}

/// Intake form as submitted by the registration collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub department: Option<String>,
    pub contamination: Option<ContaminationLevel>,
    pub item_count: u32,
    pub notes: Option<String>,
    pub urgent: bool,
}

impl Registration {
    pub fn new(department: impl Into<String>, contamination: ContaminationLevel, item_count: u32) -> Self {
        Self {
            department: Some(department.into()),
            contamination: Some(contamination),
            item_count,
            notes: None,
            urgent: false,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoakingRecord {
    pub item_id: String,
    pub started_at: DateTime<Utc>,
    pub required_minutes: i64,
    /// Set when the item leaves the soaking stage
    pub ended_at: Option<DateTime<Utc>>,
}

impl SoakingRecord {
    pub fn open(item_id: impl Into<String>, level: ContaminationLevel, started_at: DateTime<Utc>) -> Self {
        Self {
            item_id: item_id.into(),
            started_at,
            required_minutes: level.required_soak_minutes(),
            ended_at: None,
        }
    }

    pub fn required(&self) -> Duration {
        Duration::minutes(self.required_minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyOverride {
    pub reason: String,
    pub operator: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionResult {
    pub passed: bool,
    pub inspector: String,
    pub at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Reprocessing steps an item must complete before it may join a load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prerequisites {
    pub cleaning_completed_at: Option<DateTime<Utc>>,
    pub inspection: Option<InspectionResult>,
    pub packaging_completed_at: Option<DateTime<Utc>>,
}

impl Prerequisites {
    pub fn missing(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.cleaning_completed_at.is_none() {
            missing.push("cleaning".to_string());
        }
        if !self.inspection.as_ref().is_some_and(|i| i.passed) {
            missing.push("inspection".to_string());
        }
        if self.packaging_completed_at.is_none() {
            missing.push("packaging".to_string());
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

/// Signed release that authorizes distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub lot_id: String,
    pub cycle_id: String,
    pub validation_id: String,
    pub signed_by: String,
    pub signed_at: DateTime<Utc>,
    /// End of the pack's sterile shelf life
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransitionRecord {
    pub from: Stage,
    pub to: Stage,
    pub actor: Option<String>,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub item_type: ItemType,
    pub stage: Stage,
    pub department: String,
    pub contamination: ContaminationLevel,
    pub item_count: u32,
    pub operator: String,
    pub created_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub urgent: bool,
    pub soak: SoakingRecord,
    pub emergency_override: Option<EmergencyOverride>,
    pub prerequisites: Prerequisites,
    pub weight_grams: Option<u64>,
    pub load_id: Option<String>,
    pub release: Option<Release>,
    pub disposal_reason: Option<String>,
    /// Bumped on every committed change
    pub version: u64,
    pub history: Vec<StageTransitionRecord>,
}

impl Item {
    /// Copy of this item moved to `to`, with the stage side effects applied
    pub(crate) fn transitioned(
        &self,
        to: Stage,
        actor: Option<&str>,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Item {
        let mut next = self.clone();
        let from = self.stage;

        if from == Stage::Soaking && next.soak.ended_at.is_none() {
            next.soak.ended_at = Some(at);
        }

        match to {
            Stage::Cleaning => {
                // Every entry into cleaning starts reprocessing from scratch
                next.prerequisites = Prerequisites::default();
                next.weight_grams = None;
                next.load_id = None;
                next.release = None;
            }
            Stage::Packaging if from == Stage::Cleaning => {
                next.prerequisites.cleaning_completed_at = Some(at);
            }
            Stage::Disposed => {
                next.disposal_reason = reason.map(str::to_string);
            }
            _ => {}
        }

        next.stage = to;
        next.version += 1;
        next.history.push(StageTransitionRecord {
            from,
            to,
            actor: actor.map(str::to_string),
            reason: reason.map(str::to_string),
            at,
        });
        next
    }
}
