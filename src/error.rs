use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies the entity an error or audit event refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Item(String),
    Load(String),
    Cycle(String),
    Autoclave(String),
    Validation(String),
    PackLot(String),
    Procedure(String),
}

impl EntityRef {
    pub fn id(&self) -> &str {
        match self {
            EntityRef::Item(id)
            | EntityRef::Load(id)
            | EntityRef::Cycle(id)
            | EntityRef::Autoclave(id)
            | EntityRef::Validation(id)
            | EntityRef::PackLot(id)
            | EntityRef::Procedure(id) => id,
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityRef::Item(id) => write!(f, "item {id}"),
            EntityRef::Load(id) => write!(f, "load {id}"),
            EntityRef::Cycle(id) => write!(f, "cycle {id}"),
            EntityRef::Autoclave(id) => write!(f, "autoclave {id}"),
            EntityRef::Validation(id) => write!(f, "validation {id}"),
            EntityRef::PackLot(id) => write!(f, "pack lot {id}"),
            EntityRef::Procedure(id) => write!(f, "procedure {id}"),
        }
    }
}

/// Errors surfaced by every CSSD core operation.
///
/// Each variant carries enough context (entity, attempted change, current
/// state) for a caller to render an actionable message. None of them are
/// used for normal control flow.
#[derive(Debug, Error)]
pub enum CssdError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("illegal transition on {entity}: {from} -> {to} ({reason})")]
    IllegalTransition {
        entity: EntityRef,
        from: String,
        to: String,
        reason: String,
    },

    #[error("load for autoclave {autoclave} weighs {total_grams} g, capacity is {capacity_grams} g")]
    CapacityExceeded {
        autoclave: String,
        total_grams: u64,
        capacity_grams: u64,
    },

    #[error("item {item} is missing prerequisites: {missing:?}")]
    PrerequisiteNotMet { item: String, missing: Vec<String> },

    #[error("autoclave {autoclave} is busy ({state})")]
    AutoclaveBusy { autoclave: String, state: String },

    #[error("checklist for cycle {cycle} has no result for: {missing:?}")]
    IncompleteChecklist { cycle: String, missing: Vec<String> },

    #[error("a reason is required for {action} on {entity}")]
    MissingReason { entity: EntityRef, action: String },

    #[error("cycle {cycle} cannot be linked to patient use (status: {status})")]
    UnknownCycle { cycle: String, status: String },

    #[error("{entity} not found")]
    NotFound { entity: EntityRef },

    #[error("concurrent update on {entity}: expected version {expected}, found {actual}")]
    Conflict {
        entity: EntityRef,
        expected: u64,
        actual: u64,
    },

    #[error("operator {operator} ({role}) is not allowed to {action}")]
    Unauthorized {
        operator: String,
        role: String,
        action: String,
    },

    #[error("signature for {validation} acknowledges hash {provided}, record hash is {expected}")]
    SignatureMismatch {
        validation: String,
        expected: String,
        provided: String,
    },

    #[error("audit journal write failed: {reason}")]
    Journal { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CssdError {
    /// Stable machine-readable code for UI and CLI rendering
    pub fn kind(&self) -> &'static str {
        match self {
            CssdError::Validation { .. } => "validation_error",
            CssdError::IllegalTransition { .. } => "illegal_transition",
            CssdError::CapacityExceeded { .. } => "capacity_exceeded",
            CssdError::PrerequisiteNotMet { .. } => "prerequisite_not_met",
            CssdError::AutoclaveBusy { .. } => "autoclave_busy",
            CssdError::IncompleteChecklist { .. } => "incomplete_checklist",
            CssdError::MissingReason { .. } => "missing_reason",
            CssdError::UnknownCycle { .. } => "unknown_cycle",
            CssdError::NotFound { .. } => "not_found",
            CssdError::Conflict { .. } => "conflict",
            CssdError::Unauthorized { .. } => "unauthorized",
            CssdError::SignatureMismatch { .. } => "signature_mismatch",
            CssdError::Journal { .. } => "journal_error",
            CssdError::Io(_) => "io_error",
            CssdError::Serialization(_) => "serialization_error",
        }
    }

    pub(crate) fn validation(field: &str, reason: impl Into<String>) -> Self {
        CssdError::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(entity: EntityRef) -> Self {
        CssdError::NotFound { entity }
    }
}

pub type CssdResult<T> = std::result::Result<T, CssdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_codes() {
        let err = CssdError::validation("department", "required");
        assert_eq!(err.kind(), "validation_error");
        assert_eq!(err.to_string(), "invalid department: required");

        let err = CssdError::IllegalTransition {
            entity: EntityRef::Item("BSK001".to_string()),
            from: "registered".to_string(),
            to: "packaging".to_string(),
            reason: "not an edge".to_string(),
        };
        assert_eq!(err.kind(), "illegal_transition");
        assert!(err.to_string().contains("item BSK001"));
    }

    #[test]
    fn test_entity_ref_serializes_with_kind_tag() {
        let json = serde_json::to_string(&EntityRef::Cycle("AC-001-2026-0001".to_string())).unwrap();
        assert_eq!(json, r#"{"kind":"cycle","id":"AC-001-2026-0001"}"#);
    }
}
