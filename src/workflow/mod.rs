pub mod registry;
pub mod soak;
pub mod transitions;
pub mod types;

pub use registry::ItemRegistry;
pub use soak::{compute_soak_status, soak_progress, SoakProgress, SoakStatus};
pub use transitions::{check_transition, edge_kind, EdgeKind, Trigger};
pub use types::{
    ContaminationLevel, EmergencyOverride, InspectionResult, Item, ItemType, Prerequisites,
    Registration, Release, SoakingRecord, Stage, StageTransitionRecord,
};
