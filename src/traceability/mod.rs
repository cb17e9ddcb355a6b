pub mod graph;
pub mod trace;
pub mod types;

pub use graph::TraceabilityGraph;
pub use trace::{BackwardTrace, ForwardTrace};
pub use types::{
    lot_id_for, ExpiryStatus, LotOrigin, PackExpiry, PackPolicy, ProcedureContext, RecallImpact, TraceabilityLink,
    TracedPack,
};
