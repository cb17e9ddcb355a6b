pub mod engine;
pub mod program;
pub mod types;

pub use engine::CycleEngine;
pub use program::{standard_programs, Band, CycleProgram, Phase};
pub use types::{
    Autoclave, AutoclaveState, Cycle, CycleSnapshot, CycleStatus, EquipmentIssue, FailureCause,
    FailureReason, FailureReport, FailureReportForm, Load, ParameterSample, SampleOutcome,
};
