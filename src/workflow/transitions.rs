use chrono::{DateTime, Utc};

use super::soak::{compute_soak_status, SoakStatus};
use super::types::{Item, Stage};
use crate::error::{CssdError, CssdResult, EntityRef};

/// Who is allowed to drive a given edge of the stage graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Requested directly by an operator through `advance`
    Operator,
    /// Driven by load, cycle and validation operations
    Engine,
    /// Terminal disposal, always with a reason
    Disposal,
}

/// How a transition was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Operator,
    Override,
    Engine,
    Disposal,
}

/// The stage graph. `None` means the edge does not exist.
pub fn edge_kind(from: Stage, to: Stage) -> Option<EdgeKind> {
    use Stage::*;

    match (from, to) {
        (Registered, Soaking) => Some(EdgeKind::Operator),
        (Soaking, Cleaning) => Some(EdgeKind::Operator),
        (Cleaning, Packaging) => Some(EdgeKind::Operator),
        (Validated, Distributed) => Some(EdgeKind::Operator),

        (Packaging, Cleaning) => Some(EdgeKind::Engine),
        (Packaging, Loaded) => Some(EdgeKind::Engine),
        (Loaded, Sterilizing) => Some(EdgeKind::Engine),
        (Sterilizing, PendingValidation) => Some(EdgeKind::Engine),
        (Sterilizing, Rejected) => Some(EdgeKind::Engine),
        (PendingValidation, Validated) => Some(EdgeKind::Engine),
        (PendingValidation, Rejected) => Some(EdgeKind::Engine),
        (Rejected, Cleaning) => Some(EdgeKind::Engine),

        (from, Disposed) if !from.is_terminal() && !from.is_bound_to_load() => {
            Some(EdgeKind::Disposal)
        }

        _ => None,
    }
}

impl Stage {
    pub fn successors(self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|to| edge_kind(self, *to).is_some())
            .collect()
    }

    pub fn can_transition_to(self, to: Stage) -> bool {
        edge_kind(self, to).is_some()
    }
}

fn illegal(item: &Item, to: Stage, reason: impl Into<String>) -> CssdError {
    CssdError::IllegalTransition {
        entity: EntityRef::Item(item.id.clone()),
        from: item.stage.to_string(),
        to: to.to_string(),
        reason: reason.into(),
    }
}

/// Check whether `item` may move to `to` under `trigger` at `now`.
///
/// Guards:
/// - soaking -> cleaning needs a finished soak unless overridden
/// - validated -> distributed needs a signed release
/// - an emergency override only lifts the soak guard
pub fn check_transition(item: &Item, to: Stage, trigger: Trigger, now: DateTime<Utc>) -> CssdResult<()> {
    let Some(kind) = edge_kind(item.stage, to) else {
        let reason = if item.stage.is_terminal() {
            format!("{} is terminal", item.stage)
        } else {
            format!("{to} is not reachable from {}", item.stage)
        };
        return Err(illegal(item, to, reason));
    };

    match (kind, trigger) {
        (EdgeKind::Disposal, Trigger::Disposal) => Ok(()),
        (EdgeKind::Disposal, _) => Err(CssdError::MissingReason {
            entity: EntityRef::Item(item.id.clone()),
            action: "dispose".to_string(),
        }),
        (EdgeKind::Engine, Trigger::Engine) => Ok(()),
        (EdgeKind::Engine, _) => Err(illegal(
            item,
            to,
            "driven by load, cycle and validation operations",
        )),
        (EdgeKind::Operator, Trigger::Engine | Trigger::Disposal) => {
            Err(illegal(item, to, "operator transition"))
        }
        (EdgeKind::Operator, Trigger::Override) => {
            if item.stage == Stage::Soaking && to == Stage::Cleaning {
                Ok(())
            } else {
                Err(illegal(
                    item,
                    to,
                    "emergency override only applies to soaking -> cleaning",
                ))
            }
        }
        (EdgeKind::Operator, Trigger::Operator) => match (item.stage, to) {
            (Stage::Soaking, Stage::Cleaning) => {
                if compute_soak_status(&item.soak, now) == SoakStatus::Soaking {
                    let remaining = item.soak.required() - (now - item.soak.started_at);
                    Err(illegal(
                        item,
                        to,
                        format!(
                            "soak not complete, {} min remaining",
                            remaining.num_minutes().max(1)
                        ),
                    ))
                } else {
                    Ok(())
                }
            }
            (Stage::Validated, Stage::Distributed) if item.release.is_none() => {
                Err(illegal(item, to, "no signed release"))
            }
            _ => Ok(()),
        },
    }
}
