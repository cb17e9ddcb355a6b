pub mod gate;
pub mod signature;
pub mod types;

pub use gate::ValidationGate;
pub use signature::content_hash;
pub use types::{Checklist, ChecklistItem, Outcome, RejectionReason, Signature, ValidationRecord};
