// CSSD traceability core - instrument reprocessing workflow, sterilization
// cycles, release validation and patient linkage.

pub mod cli;
pub mod clock;
pub mod config;
pub mod cycle;
pub mod error;
pub mod identity;
pub mod journal;
pub mod observability;
pub mod report;
pub mod scan;
pub mod service;
pub mod telemetry;
pub mod traceability;
pub mod validation;
pub mod workflow;

// Re-export key types for easy access
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{config, init_config, CssdConfig};
pub use cycle::{
    Autoclave, AutoclaveState, Cycle, CycleEngine, CycleProgram, CycleSnapshot, CycleStatus,
    FailureReason, FailureReportForm, Load, Phase, SampleOutcome,
};
pub use error::{CssdError, CssdResult, EntityRef};
pub use identity::{Operator, Role};
pub use journal::{AuditEvent, AuditJournal, JournalEntry, JsonlJournal, MemoryJournal};
pub use observability::{CssdMetrics, CssdStats, OperationTimer};
pub use report::{ComplianceSummary, DashboardSnapshot};
pub use scan::classify_scan;
pub use service::CssdService;
pub use telemetry::{create_operation_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
pub use traceability::{
    lot_id_for, ExpiryStatus, LotOrigin, PackExpiry, PackPolicy, ProcedureContext, RecallImpact, TraceabilityGraph,
    TraceabilityLink,
};
pub use validation::{Checklist, ChecklistItem, Outcome, RejectionReason, ValidationGate, ValidationRecord};
pub use workflow::{ContaminationLevel, Item, ItemRegistry, ItemType, Registration, SoakStatus, Stage};
