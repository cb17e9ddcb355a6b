use chrono::Duration;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use super::signature::content_hash;
use super::types::{Checklist, Outcome, RejectionReason, Signature, ValidationRecord};
use crate::clock::Clock;
use crate::cycle::{Cycle, CycleEngine, CycleStatus};
use crate::error::{CssdError, CssdResult, EntityRef};
use crate::identity::Operator;
use crate::journal::{AuditEvent, AuditJournal, PendingEntry};
use crate::traceability::{lot_id_for, LotOrigin, TraceabilityGraph};
use crate::workflow::{check_transition, Release, Stage, Trigger};

/// Release decision for completed cycles.
///
/// Nothing leaves the department without an approved record carrying a
/// signature over the exact checklist and comments that were approved.
pub struct ValidationGate {
    engine: Arc<CycleEngine>,
    traceability: Arc<TraceabilityGraph>,
    journal: Arc<dyn AuditJournal>,
    clock: Arc<dyn Clock>,
    /// Stamped on every released pack
    shelf_life: Duration,
    records: RwLock<BTreeMap<String, ValidationRecord>>,
}

impl ValidationGate {
    pub fn new(
        engine: Arc<CycleEngine>,
        traceability: Arc<TraceabilityGraph>,
        journal: Arc<dyn AuditJournal>,
        clock: Arc<dyn Clock>,
        shelf_life: Duration,
    ) -> Self {
        Self {
            engine,
            traceability,
            journal,
            clock,
            shelf_life,
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// Record an inspection of a completed cycle. The outcome is computed
    /// from the checklist; a failed check rejects the load immediately.
    pub async fn submit_validation(
        &self,
        cycle_id: &str,
        checklist: Checklist,
        comments: &str,
        inspector: &Operator,
    ) -> CssdResult<ValidationRecord> {
        inspector.require_validator("submit a validation")?;

        let handle = self.engine.cycle_handle(cycle_id).await?;
        let mut cycle = handle.write().await;
        require_pending(&cycle, "validation")?;

        let missing = checklist.missing();
        if !missing.is_empty() {
            warn!(cycle_id = %cycle.id, missing = ?missing, "Incomplete checklist");
            return Err(CssdError::IncompleteChecklist {
                cycle: cycle.id.clone(),
                missing: missing.iter().map(|m| m.as_str().to_string()).collect(),
            });
        }

        if self
            .records
            .read()
            .await
            .values()
            .any(|r| r.cycle_id == cycle.id && r.awaiting_signature())
        {
            return Err(CssdError::IllegalTransition {
                entity: EntityRef::Cycle(cycle.id.clone()),
                from: cycle.status.to_string(),
                to: "validation".to_string(),
                reason: "an approved validation is already awaiting signature".to_string(),
            });
        }

        let comments = comments.trim().to_string();
        let outcome = checklist.outcome();
        let record = ValidationRecord {
            id: new_validation_id(),
            cycle_id: cycle.id.clone(),
            inspector: inspector.id.clone(),
            checklist,
            content_hash: content_hash(&cycle.id, &checklist, &comments)?,
            comments,
            outcome,
            rejection_reason: checklist.first_failure().map(|item| item.rejection_reason()),
            signature: None,
            superseded_by: None,
            created_at: self.clock.now(),
        };

        match outcome {
            Outcome::Approved => {
                self.journal.append(submission_entry(&record, &inspector.id)).await?;
                self.records.write().await.insert(record.id.clone(), record.clone());
                info!(
                    cycle_id = %record.cycle_id,
                    validation_id = %record.id,
                    inspector = %inspector.id,
                    "Validation approved, awaiting signature"
                );
                Ok(record)
            }
            Outcome::Rejected => self.reject_locked(&mut cycle, record, inspector).await,
        }
    }

    /// Reject a completed cycle outright and send its items back to cleaning
    pub async fn reject_load(
        &self,
        cycle_id: &str,
        reason: Option<RejectionReason>,
        comments: &str,
        inspector: &Operator,
    ) -> CssdResult<ValidationRecord> {
        inspector.require_validator("reject a load")?;

        let comments = comments.trim().to_string();
        let reason = match reason {
            Some(RejectionReason::Other) if comments.is_empty() => None,
            other => other,
        };
        let Some(reason) = reason else {
            warn!(cycle_id, inspector = %inspector.id, "Rejection without reason refused");
            return Err(CssdError::MissingReason {
                entity: EntityRef::Cycle(cycle_id.to_string()),
                action: "reject load".to_string(),
            });
        };

        let handle = self.engine.cycle_handle(cycle_id).await?;
        let mut cycle = handle.write().await;
        require_pending(&cycle, "rejected")?;

        let checklist = Checklist::default();
        let record = ValidationRecord {
            id: new_validation_id(),
            cycle_id: cycle.id.clone(),
            inspector: inspector.id.clone(),
            checklist,
            content_hash: content_hash(&cycle.id, &checklist, &comments)?,
            comments,
            outcome: Outcome::Rejected,
            rejection_reason: Some(reason),
            signature: None,
            superseded_by: None,
            created_at: self.clock.now(),
        };
        self.reject_locked(&mut cycle, record, inspector).await
    }

    /// Reject the locked cycle. Any approval still waiting for a signature is
    /// superseded by the rejection; the record, the rejection and both item
    /// steps (rejected, then cleaning) are journaled as one batch.
    async fn reject_locked(
        &self,
        cycle: &mut Cycle,
        record: ValidationRecord,
        inspector: &Operator,
    ) -> CssdResult<ValidationRecord> {
        let registry = self.engine.registry();
        let mut guards = registry.lock_items(&cycle.item_ids).await?;
        let now = self.clock.now();
        for item in guards.iter() {
            check_transition(item, Stage::Rejected, Trigger::Engine, now)?;
        }

        let mut records = self.records.write().await;
        let superseded: Vec<String> = records
            .values()
            .filter(|r| r.cycle_id == cycle.id && r.awaiting_signature())
            .map(|r| r.id.clone())
            .collect();

        let reason = record.rejection_reason.unwrap_or(RejectionReason::Other);
        let mut leading = vec![
            submission_entry(&record, &inspector.id),
            PendingEntry::new(
                EntityRef::Validation(record.id.clone()),
                AuditEvent::LoadRejected {
                    cycle: cycle.id.clone(),
                    reason,
                    comments: record.comments.clone(),
                },
                Some(&inspector.id),
                now,
            ),
        ];
        leading.extend(superseded.iter().map(|id| {
            PendingEntry::new(
                EntityRef::Validation(id.clone()),
                AuditEvent::ValidationSuperseded {
                    cycle: cycle.id.clone(),
                    superseded_by: record.id.clone(),
                },
                Some(&inspector.id),
                now,
            )
        }));

        let why = format!("validation {} rejected ({reason:?})", record.id);
        registry
            .transition_locked(
                &mut guards,
                leading,
                &[
                    (Stage::Rejected, Some(why.as_str())),
                    (Stage::Cleaning, Some("reprocessing after rejection")),
                ],
                Some(&inspector.id),
                |_| {},
            )
            .await?;

        cycle.status = CycleStatus::Rejected;
        for id in &superseded {
            if let Some(approval) = records.get_mut(id) {
                approval.superseded_by = Some(record.id.clone());
            }
        }
        records.insert(record.id.clone(), record.clone());

        warn!(
            cycle_id = %cycle.id,
            validation_id = %record.id,
            reason = ?reason,
            inspector = %inspector.id,
            items = cycle.item_ids.len(),
            superseded = superseded.len(),
            "Load rejected, items returned to cleaning"
        );
        Ok(record)
    }

    /// Sign an approved record. Signature, cycle status, item release and
    /// pack lot origins are committed together.
    pub async fn sign_release(
        &self,
        validation_id: &str,
        signer: &Operator,
        acknowledged_hash: &str,
    ) -> CssdResult<ValidationRecord> {
        signer.require_validator("sign a release")?;

        let record = self.record(validation_id).await?;
        if !record.awaiting_signature() {
            let from = if record.signature.is_some() {
                "signed"
            } else if record.superseded_by.is_some() {
                "superseded"
            } else {
                "rejected"
            };
            return Err(CssdError::IllegalTransition {
                entity: EntityRef::Validation(record.id.clone()),
                from: from.to_string(),
                to: "signed".to_string(),
                reason: "only an approved, unsigned record can be signed".to_string(),
            });
        }
        if acknowledged_hash.trim() != record.content_hash {
            warn!(
                validation_id = %record.id,
                signer = %signer.id,
                "Signature acknowledges different content"
            );
            return Err(CssdError::SignatureMismatch {
                validation: record.id.clone(),
                expected: record.content_hash.clone(),
                provided: acknowledged_hash.trim().to_string(),
            });
        }

        let handle = self.engine.cycle_handle(&record.cycle_id).await?;
        let mut cycle = handle.write().await;
        require_pending(&cycle, "validated")?;

        let registry = self.engine.registry();
        let mut guards = registry.lock_items(&cycle.item_ids).await?;
        let now = self.clock.now();
        for item in guards.iter() {
            check_transition(item, Stage::Validated, Trigger::Engine, now)?;
        }

        let mut records = self.records.write().await;
        let mut record = records
            .get(validation_id)
            .cloned()
            .ok_or_else(|| CssdError::not_found(EntityRef::Validation(validation_id.to_string())))?;
        if !record.awaiting_signature() {
            return Err(CssdError::IllegalTransition {
                entity: EntityRef::Validation(record.id.clone()),
                from: "signed".to_string(),
                to: "signed".to_string(),
                reason: "record was signed or superseded concurrently".to_string(),
            });
        }

        let signature = Signature {
            signer: signer.id.clone(),
            signed_at: now,
            content_hash: record.content_hash.clone(),
        };
        let origin = LotOrigin {
            cycle_id: cycle.id.clone(),
            released_at: now,
            expires_at: now + self.shelf_life,
        };
        let lots: Vec<String> = cycle
            .item_ids
            .iter()
            .map(|item_id| lot_id_for(&cycle.id, item_id))
            .collect();

        let mut leading = vec![PendingEntry::new(
            EntityRef::Validation(record.id.clone()),
            AuditEvent::ReleaseSigned {
                cycle: cycle.id.clone(),
                signature: signature.clone(),
            },
            Some(&signer.id),
            now,
        )];
        leading.extend(self.traceability.origin_entries(&lots, &origin, &signer.id).await?);

        let validation_id = record.id.clone();
        registry
            .transition_locked(
                &mut guards,
                leading,
                &[(Stage::Validated, None)],
                Some(&signer.id),
                |item| {
                    item.release = Some(Release {
                        lot_id: lot_id_for(&origin.cycle_id, &item.id),
                        cycle_id: origin.cycle_id.clone(),
                        validation_id: validation_id.clone(),
                        signed_by: signature.signer.clone(),
                        signed_at: now,
                        expires_at: origin.expires_at,
                    });
                },
            )
            .await?;
        // lots only become linkable once the release batch is journaled
        self.traceability.commit_origins(&lots, &origin).await;

        cycle.status = CycleStatus::Validated;
        record.signature = Some(signature);
        records.insert(record.id.clone(), record.clone());

        info!(
            cycle_id = %cycle.id,
            validation_id = %record.id,
            signer = %signer.id,
            lots = lots.len(),
            "Release signed"
        );
        Ok(record)
    }

    pub async fn record(&self, validation_id: &str) -> CssdResult<ValidationRecord> {
        self.records
            .read()
            .await
            .get(validation_id)
            .cloned()
            .ok_or_else(|| CssdError::not_found(EntityRef::Validation(validation_id.to_string())))
    }

    pub async fn records(&self) -> Vec<ValidationRecord> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn records_for_cycle(&self, cycle_id: &str) -> Vec<ValidationRecord> {
        let mut records: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.cycle_id == cycle_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }
}

fn require_pending(cycle: &Cycle, to: &str) -> CssdResult<()> {
    if cycle.status == CycleStatus::PendingValidation {
        Ok(())
    } else {
        Err(CssdError::IllegalTransition {
            entity: EntityRef::Cycle(cycle.id.clone()),
            from: cycle.status.to_string(),
            to: to.to_string(),
            reason: "cycle is not pending validation".to_string(),
        })
    }
}

fn submission_entry(record: &ValidationRecord, actor: &str) -> PendingEntry {
    PendingEntry::new(
        EntityRef::Validation(record.id.clone()),
        AuditEvent::ValidationSubmitted {
            cycle: record.cycle_id.clone(),
            outcome: record.outcome,
            content_hash: record.content_hash.clone(),
        },
        Some(actor),
        record.created_at,
    )
}

fn new_validation_id() -> String {
    format!("VAL-{}", &Uuid::new_v4().simple().to_string()[..12].to_ascii_uppercase())
}
