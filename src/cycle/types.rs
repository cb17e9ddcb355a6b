use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::program::{CycleProgram, Phase};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AutoclaveState {
    Idle,
    Running { cycle_id: String },
    /// A failed or stopped cycle holds the chamber until a failure report is filed
    AwaitingFailureReport { cycle_id: String },
    OutOfService { reason: String },
}

impl AutoclaveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoclaveState::Idle => "idle",
            AutoclaveState::Running { .. } => "running",
            AutoclaveState::AwaitingFailureReport { .. } => "awaiting_failure_report",
            AutoclaveState::OutOfService { .. } => "out_of_service",
        }
    }
}

impl std::fmt::Display for AutoclaveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AutoclaveState::Idle => f.write_str("idle"),
            AutoclaveState::Running { cycle_id } => write!(f, "running cycle {cycle_id}"),
            AutoclaveState::AwaitingFailureReport { cycle_id } => {
                write!(f, "awaiting failure report for cycle {cycle_id}")
            }
            AutoclaveState::OutOfService { reason } => write!(f, "out of service: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Autoclave {
    pub id: String,
    pub capacity_grams: u64,
    pub state: AutoclaveState,
}

impl Autoclave {
    pub fn new(id: impl Into<String>, capacity_grams: u64) -> Self {
        Self {
            id: id.into(),
            capacity_grams,
            state: AutoclaveState::Idle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Load {
    pub id: String,
    pub autoclave_id: String,
    pub item_ids: Vec<String>,
    pub total_grams: u64,
    pub capacity_grams: u64,
    pub built_by: String,
    pub built_at: DateTime<Utc>,
    /// A load runs at most one cycle
    pub cycle_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Running,
    PendingValidation,
    Validated,
    Rejected,
    Failed,
}

impl CycleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CycleStatus::Running => "running",
            CycleStatus::PendingValidation => "pending_validation",
            CycleStatus::Validated => "validated",
            CycleStatus::Rejected => "rejected",
            CycleStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSample {
    pub at: DateTime<Utc>,
    pub temperature: f64,
    pub pressure: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum FailureCause {
    OutOfTolerance {
        at: DateTime<Utc>,
        temperature: f64,
        pressure: f64,
    },
    EmergencyStop {
        reason: String,
        operator: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    TemperatureDeviation,
    PressureFailure,
    TimeInsufficient,
    IndicatorFailure,
    EquipmentMalfunction,
    PowerInterruption,
    OperatorError,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentIssue {
    SteamGenerator,
    PressureSensor,
    TemperatureSensor,
    DoorSeal,
    VacuumPump,
    ControlSystem,
}

/// What the reporting technician fills in after a failed cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReportForm {
    pub reason: FailureReason,
    pub equipment_issue: Option<EquipmentIssue>,
    pub operator_error: bool,
    pub maintenance_required: bool,
    pub description: String,
}

impl FailureReportForm {
    pub fn new(reason: FailureReason, description: impl Into<String>) -> Self {
        Self {
            reason,
            equipment_issue: None,
            operator_error: false,
            maintenance_required: false,
            description: description.into(),
        }
    }

    pub fn with_equipment_issue(mut self, issue: EquipmentIssue) -> Self {
        self.equipment_issue = Some(issue);
        self
    }

    pub fn requiring_maintenance(mut self) -> Self {
        self.maintenance_required = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub reason: FailureReason,
    pub equipment_issue: Option<EquipmentIssue>,
    pub operator_error: bool,
    pub maintenance_required: bool,
    pub description: String,
    pub reporter: String,
    pub reported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    pub id: String,
    pub load_id: String,
    pub autoclave_id: String,
    pub item_ids: Vec<String>,
    pub program: CycleProgram,
    pub operator: String,
    pub started_at: DateTime<Utc>,
    /// When the cycle stopped running, by completion or failure
    pub ended_at: Option<DateTime<Utc>>,
    pub status: CycleStatus,
    /// Ordered by timestamp, at most one sample per timestamp
    pub samples: Vec<ParameterSample>,
    pub failure: Option<FailureCause>,
    pub failure_report: Option<FailureReport>,
}

impl Cycle {
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        let until = match self.ended_at {
            Some(ended) if ended < now => ended,
            _ => now,
        };
        (until - self.started_at).max(Duration::zero())
    }

    pub fn phase(&self, now: DateTime<Utc>) -> Phase {
        self.program.phase_at(self.elapsed(now))
    }

    pub fn progress(&self, now: DateTime<Utc>) -> u8 {
        self.program.progress_at(self.elapsed(now))
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> CycleSnapshot {
        CycleSnapshot {
            id: self.id.clone(),
            autoclave_id: self.autoclave_id.clone(),
            program: self.program.name.clone(),
            status: self.status,
            phase: self.phase(now),
            progress: self.progress(now),
            elapsed_seconds: self.elapsed(now).num_seconds(),
            item_count: self.item_ids.len(),
            sample_count: self.samples.len(),
            awaiting_failure_report: self.status == CycleStatus::Failed && self.failure_report.is_none(),
        }
    }
}

/// Read-only view of a cycle at a given instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSnapshot {
    pub id: String,
    pub autoclave_id: String,
    pub program: String,
    pub status: CycleStatus,
    pub phase: Phase,
    pub progress: u8,
    pub elapsed_seconds: i64,
    pub item_count: usize,
    pub sample_count: usize,
    pub awaiting_failure_report: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SampleOutcome {
    Recorded { phase: Phase, in_tolerance: bool },
    /// Same timestamp and values as an already recorded sample
    Duplicate,
    /// This sample failed the cycle
    CycleFailed,
}
