use chrono::Duration;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::trace::{BackwardTrace, ForwardTrace, GraphSnapshot};
use super::types::{LotOrigin, PackExpiry, ProcedureContext, RecallImpact, TraceabilityLink};
use crate::clock::Clock;
use crate::cycle::{CycleEngine, CycleStatus};
use crate::error::{CssdError, CssdResult, EntityRef};
use crate::identity::Operator;
use crate::journal::{AuditEvent, AuditJournal, PendingEntry};
use crate::scan::{classify_scan, normalize_token};
use crate::workflow::ItemType;

/// Append-only links between pack lots, cycles and patient procedures.
///
/// Traversals run over a shared snapshot, so a long recall query never
/// holds up new links.
pub struct TraceabilityGraph {
    engine: Arc<CycleEngine>,
    journal: Arc<dyn AuditJournal>,
    clock: Arc<dyn Clock>,
    state: RwLock<Arc<GraphSnapshot>>,
}

impl TraceabilityGraph {
    pub fn new(engine: Arc<CycleEngine>, journal: Arc<dyn AuditJournal>, clock: Arc<dyn Clock>) -> Self {
        Self {
            engine,
            journal,
            clock,
            state: RwLock::new(Arc::new(GraphSnapshot::default())),
        }
    }

    /// Record that a pack lot from a validated cycle was used in a procedure.
    ///
    /// The lot must be a sterile pack released by that cycle and still
    /// within its shelf life.
    pub async fn link_pack_to_procedure(
        &self,
        lot_id: &str,
        cycle_id: &str,
        procedure_id: &str,
        patient_id: &str,
        context: ProcedureContext,
        operator: &Operator,
    ) -> CssdResult<TraceabilityLink> {
        let lot_id = normalize_token(lot_id);
        let procedure_id = procedure_id.trim().to_string();
        let patient_id = patient_id.trim().to_string();
        for (field, value) in [
            ("lot_id", lot_id.as_str()),
            ("procedure_id", procedure_id.as_str()),
            ("patient_id", patient_id.as_str()),
            ("operating_room", context.operating_room.trim()),
            ("surgeon", context.surgeon.trim()),
        ] {
            if value.is_empty() {
                return Err(CssdError::validation(field, "required"));
            }
        }
        if !matches!(classify_scan(&lot_id), Ok(ItemType::SterilePack)) {
            warn!(lot_id = %lot_id, "Link refused, not a sterile pack barcode");
            return Err(CssdError::validation(
                "lot_id",
                format!("{lot_id} is not a sterile pack barcode"),
            ));
        }

        let cycle = match self.engine.cycle(cycle_id).await {
            Ok(cycle) => cycle,
            Err(CssdError::NotFound { .. }) => {
                warn!(cycle_id, lot_id = %lot_id, "Link refused, cycle does not exist");
                return Err(CssdError::UnknownCycle {
                    cycle: cycle_id.to_string(),
                    status: "unknown".to_string(),
                });
            }
            Err(e) => return Err(e),
        };
        if cycle.status != CycleStatus::Validated {
            warn!(
                cycle_id,
                status = %cycle.status,
                lot_id = %lot_id,
                "Link refused, cycle is not validated"
            );
            return Err(CssdError::UnknownCycle {
                cycle: cycle.id.clone(),
                status: cycle.status.to_string(),
            });
        }

        let mut state = self.state.write().await;
        let origin = match state.origins.get(&lot_id) {
            None => {
                warn!(lot_id = %lot_id, cycle_id = %cycle.id, "Link refused, lot was never released");
                return Err(CssdError::validation(
                    "lot_id",
                    format!("lot {lot_id} has no recorded release"),
                ));
            }
            Some(origin) if origin.cycle_id != cycle.id => {
                return Err(CssdError::validation(
                    "lot_id",
                    format!("lot {lot_id} originates from cycle {}, not {}", origin.cycle_id, cycle.id),
                ));
            }
            Some(origin) => origin.clone(),
        };
        if let Some(existing) = state.links.iter().find(|l| l.procedure_id == procedure_id) {
            if existing.patient_id != patient_id {
                return Err(CssdError::validation(
                    "procedure_id",
                    format!(
                        "procedure {procedure_id} is already linked to another patient"
                    ),
                ));
            }
        }
        if let Some(existing) = state
            .links
            .iter()
            .find(|l| l.lot_id == lot_id && l.procedure_id == procedure_id)
        {
            debug!(lot_id = %lot_id, procedure_id = %procedure_id, "Link already recorded");
            return Ok(existing.clone());
        }

        let now = self.clock.now();
        if origin.is_expired(now) {
            warn!(
                lot_id = %lot_id,
                expires_at = %origin.expires_at,
                "Link refused, pack is past its shelf life"
            );
            return Err(CssdError::validation(
                "lot_id",
                format!("lot {lot_id} expired at {}", origin.expires_at),
            ));
        }

        let link = TraceabilityLink {
            lot_id: lot_id.clone(),
            cycle_id: cycle.id.clone(),
            procedure_id,
            patient_id,
            operating_room: context.operating_room.trim().to_string(),
            surgeon: context.surgeon.trim().to_string(),
            procedure_date: context.procedure_date,
            linked_by: operator.id.clone(),
            linked_at: now,
        };
        self.journal
            .append(PendingEntry::new(
                EntityRef::Procedure(link.procedure_id.clone()),
                AuditEvent::PackLinked { link: link.clone() },
                Some(&operator.id),
                now,
            ))
            .await?;

        Arc::make_mut(&mut *state).links.push(link.clone());

        info!(
            lot_id = %link.lot_id,
            cycle_id = %link.cycle_id,
            procedure_id = %link.procedure_id,
            operating_room = %link.operating_room,
            "Pack linked to procedure"
        );
        Ok(link)
    }

    /// Journal entries registering `lots` as released with `origin`.
    /// Fails if any of them already originates from another cycle.
    pub(crate) async fn origin_entries(
        &self,
        lots: &[String],
        origin: &LotOrigin,
        actor: &str,
    ) -> CssdResult<Vec<PendingEntry>> {
        let state = self.state.read().await;
        let mut entries = Vec::with_capacity(lots.len());
        for lot in lots {
            match state.origins.get(lot) {
                Some(existing) if existing.cycle_id == origin.cycle_id => {}
                Some(existing) => {
                    return Err(CssdError::validation(
                        "lot_id",
                        format!("lot {lot} already originates from cycle {}", existing.cycle_id),
                    ));
                }
                None => entries.push(PendingEntry::new(
                    EntityRef::PackLot(lot.clone()),
                    AuditEvent::LotOriginRegistered {
                        cycle: origin.cycle_id.clone(),
                        expires_at: origin.expires_at,
                    },
                    Some(actor),
                    origin.released_at,
                )),
            }
        }
        Ok(entries)
    }

    /// Make released lots linkable once their entries are journaled
    pub(crate) async fn commit_origins(&self, lots: &[String], origin: &LotOrigin) {
        let mut state = self.state.write().await;
        let snapshot = Arc::make_mut(&mut *state);
        for lot in lots {
            snapshot
                .origins
                .entry(lot.clone())
                .or_insert_with(|| origin.clone());
        }
        debug!(cycle_id = %origin.cycle_id, lots = lots.len(), "Lot origins registered");
    }

    async fn snapshot(&self) -> Arc<GraphSnapshot> {
        Arc::clone(&*self.state.read().await)
    }

    /// Procedures reached through lots of `cycle_id`, produced lazily
    pub async fn trace_forward_from_cycle(&self, cycle_id: &str) -> ForwardTrace {
        ForwardTrace::new(self.snapshot().await, cycle_id)
    }

    /// Packs and originating cycles used on `patient_id`, produced lazily
    pub async fn trace_backward_from_patient(&self, patient_id: &str) -> BackwardTrace {
        BackwardTrace::new(self.snapshot().await, patient_id.trim())
    }

    pub async fn recall_impact(&self, cycle_id: &str) -> RecallImpact {
        let snapshot = self.snapshot().await;
        let procedures: Vec<TraceabilityLink> = ForwardTrace::new(Arc::clone(&snapshot), cycle_id).collect();

        let mut lots: BTreeSet<String> = snapshot
            .origins
            .iter()
            .filter(|(_, origin)| origin.cycle_id == cycle_id)
            .map(|(lot, _)| lot.clone())
            .collect();
        lots.extend(procedures.iter().map(|l| l.lot_id.clone()));
        let patients = procedures.iter().map(|l| l.patient_id.clone()).collect();

        RecallImpact {
            cycle_id: cycle_id.to_string(),
            lots,
            procedures,
            patients,
        }
    }

    pub async fn origin_of(&self, lot_id: &str) -> Option<String> {
        self.lot(lot_id).await.map(|origin| origin.cycle_id)
    }

    pub async fn lot(&self, lot_id: &str) -> Option<LotOrigin> {
        self.state.read().await.origins.get(&normalize_token(lot_id)).cloned()
    }

    /// Unused lots that expire within `window` of now, expired ones included,
    /// soonest first
    pub async fn expiring_within(&self, window: Duration) -> Vec<PackExpiry> {
        let snapshot = self.snapshot().await;
        let now = self.clock.now();
        let used: BTreeSet<&str> = snapshot.links.iter().map(|l| l.lot_id.as_str()).collect();

        let mut expiring: Vec<PackExpiry> = snapshot
            .origins
            .iter()
            .filter(|(lot, origin)| !used.contains(lot.as_str()) && origin.expires_at <= now + window)
            .map(|(lot, origin)| PackExpiry {
                lot_id: lot.clone(),
                cycle_id: origin.cycle_id.clone(),
                expires_at: origin.expires_at,
                status: origin.expiry_status(now, window),
            })
            .collect();
        expiring.sort_by(|a, b| a.expires_at.cmp(&b.expires_at).then_with(|| a.lot_id.cmp(&b.lot_id)));
        expiring
    }

    pub async fn links(&self) -> Vec<TraceabilityLink> {
        self.state.read().await.links.clone()
    }
}
