use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{info, warn};

use super::soak::{soak_progress, SoakProgress};
use super::transitions::{check_transition, Trigger};
use super::types::{
    EmergencyOverride, InspectionResult, Item, Registration, SoakingRecord, Stage,
};
use crate::clock::Clock;
use crate::error::{CssdError, CssdResult, EntityRef};
use crate::identity::Operator;
use crate::journal::{AuditEvent, AuditJournal, PendingEntry};
use crate::scan::{classify_scan, normalize_token};

pub const MIN_ITEM_COUNT: u32 = 1;
pub const MAX_ITEM_COUNT: u32 = 100;

/// Owns every item from registration until distribution or disposal.
///
/// Each item sits behind its own mutex, so concurrent requests against the
/// same item are serialized and the loser observes the winner's result.
/// Every change is written to the audit journal before it is committed.
pub struct ItemRegistry {
    items: RwLock<HashMap<String, Arc<Mutex<Item>>>>,
    journal: Arc<dyn AuditJournal>,
    clock: Arc<dyn Clock>,
}

impl ItemRegistry {
    pub fn new(journal: Arc<dyn AuditJournal>, clock: Arc<dyn Clock>) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            journal,
            clock,
        }
    }

    /// Register a scanned item and open its soaking record
    pub async fn register_item(
        &self,
        scan: &str,
        registration: Registration,
        operator: &Operator,
    ) -> CssdResult<Item> {
        let item_type = classify_scan(scan)?;
        let id = normalize_token(scan);

        let department = registration
            .department
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| CssdError::validation("department", "source department is required"))?
            .to_string();
        let contamination = registration
            .contamination
            .ok_or_else(|| CssdError::validation("contamination_level", "contamination level is required"))?;
        if !(MIN_ITEM_COUNT..=MAX_ITEM_COUNT).contains(&registration.item_count) {
            return Err(CssdError::validation(
                "item_count",
                format!(
                    "{} is outside {MIN_ITEM_COUNT}..={MAX_ITEM_COUNT}",
                    registration.item_count
                ),
            ));
        }

        let mut items = self.items.write().await;
        if items.contains_key(&id) {
            return Err(CssdError::validation("item_id", format!("{id} is already registered")));
        }

        let now = self.clock.now();
        let item = Item {
            id: id.clone(),
            item_type,
            stage: Stage::Registered,
            department,
            contamination,
            item_count: registration.item_count,
            operator: operator.id.clone(),
            created_at: now,
            notes: registration.notes.filter(|n| !n.trim().is_empty()),
            urgent: registration.urgent,
            soak: SoakingRecord::open(id.clone(), contamination, now),
            emergency_override: None,
            prerequisites: Default::default(),
            weight_grams: None,
            load_id: None,
            release: None,
            disposal_reason: None,
            version: 1,
            history: Vec::new(),
        };

        self.journal
            .append(PendingEntry::new(
                EntityRef::Item(id.clone()),
                AuditEvent::ItemRegistered {
                    item_type,
                    department: item.department.clone(),
                    contamination,
                    item_count: item.item_count,
                    required_soak_minutes: item.soak.required_minutes,
                },
                Some(&operator.id),
                now,
            ))
            .await?;
        items.insert(id.clone(), Arc::new(Mutex::new(item.clone())));

        info!(
            item_id = %id,
            item_type = %item_type,
            department = %item.department,
            contamination = %contamination,
            urgent = item.urgent,
            operator = %operator.id,
            "Item registered"
        );
        Ok(item)
    }

    /// Move an item along an operator-driven edge of the stage graph
    pub async fn advance(&self, id: &str, to: Stage, operator: &Operator) -> CssdResult<Item> {
        self.operator_transition(id, to, Trigger::Operator, None, None, operator)
            .await
    }

    /// Like [`advance`](Self::advance), failing with `Conflict` if the item
    /// changed since the caller read `expected_version`
    pub async fn advance_expecting(
        &self,
        id: &str,
        to: Stage,
        expected_version: u64,
        operator: &Operator,
    ) -> CssdResult<Item> {
        self.operator_transition(id, to, Trigger::Operator, None, Some(expected_version), operator)
            .await
    }

    /// Leave soaking before the soak is complete. The reason is persisted on
    /// the item and in the journal.
    pub async fn advance_with_override(
        &self,
        id: &str,
        to: Stage,
        reason: &str,
        operator: &Operator,
    ) -> CssdResult<Item> {
        if reason.trim().is_empty() {
            return Err(CssdError::MissingReason {
                entity: EntityRef::Item(normalize_token(id)),
                action: "emergency override".to_string(),
            });
        }
        self.operator_transition(id, to, Trigger::Override, Some(reason.trim()), None, operator)
            .await
    }

    /// Take an item out of circulation for good
    pub async fn dispose(&self, id: &str, reason: &str, operator: &Operator) -> CssdResult<Item> {
        if reason.trim().is_empty() {
            return Err(CssdError::MissingReason {
                entity: EntityRef::Item(normalize_token(id)),
                action: "dispose".to_string(),
            });
        }
        self.operator_transition(id, Stage::Disposed, Trigger::Disposal, Some(reason.trim()), None, operator)
            .await
    }

    async fn operator_transition(
        &self,
        id: &str,
        to: Stage,
        trigger: Trigger,
        reason: Option<&str>,
        expected_version: Option<u64>,
        operator: &Operator,
    ) -> CssdResult<Item> {
        let handle = self.handle(id).await?;
        let mut item = handle.lock().await;

        if let Some(expected) = expected_version {
            if item.version != expected {
                warn!(
                    item_id = %item.id,
                    expected,
                    actual = item.version,
                    "Stale item version"
                );
                return Err(CssdError::Conflict {
                    entity: EntityRef::Item(item.id.clone()),
                    expected,
                    actual: item.version,
                });
            }
        }

        let now = self.clock.now();
        if let Err(e) = check_transition(&item, to, trigger, now) {
            warn!(
                item_id = %item.id,
                from = %item.stage,
                to = %to,
                operator = %operator.id,
                error = %e,
                "Stage transition refused"
            );
            return Err(e);
        }

        let from = item.stage;
        let mut next = item.transitioned(to, Some(&operator.id), reason, now);
        let mut events = Vec::with_capacity(2);
        if trigger == Trigger::Override {
            let reason = reason.unwrap_or_default().to_string();
            next.emergency_override = Some(EmergencyOverride {
                reason: reason.clone(),
                operator: operator.id.clone(),
                at: now,
            });
            events.push(AuditEvent::EmergencyOverride { reason });
        }
        events.push(AuditEvent::StageChanged {
            from,
            to,
            reason: reason.map(str::to_string),
        });

        for event in events {
            self.journal
                .append(PendingEntry::new(
                    EntityRef::Item(next.id.clone()),
                    event,
                    Some(&operator.id),
                    now,
                ))
                .await?;
        }
        *item = next.clone();

        if trigger == Trigger::Override {
            warn!(
                item_id = %next.id,
                reason = reason.unwrap_or_default(),
                operator = %operator.id,
                "Emergency override applied"
            );
        }
        info!(
            item_id = %next.id,
            from = %from,
            to = %to,
            operator = %operator.id,
            version = next.version,
            "Item stage changed"
        );
        Ok(next)
    }

    /// Record the inspection prerequisite. A failed inspection sends the item
    /// back to cleaning.
    pub async fn record_inspection(
        &self,
        id: &str,
        passed: bool,
        notes: Option<&str>,
        operator: &Operator,
    ) -> CssdResult<Item> {
        let handle = self.handle(id).await?;
        let mut item = handle.lock().await;
        require_packaging(&item, "inspection")?;

        let now = self.clock.now();
        let notes = notes.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string);
        let mut events = vec![AuditEvent::InspectionRecorded {
            passed,
            notes: notes.clone(),
        }];

        let next = if passed {
            let mut next = item.clone();
            next.prerequisites.inspection = Some(InspectionResult {
                passed,
                inspector: operator.id.clone(),
                at: now,
                notes,
            });
            next.version += 1;
            next
        } else {
            check_transition(&item, Stage::Cleaning, Trigger::Engine, now)?;
            events.push(AuditEvent::StageChanged {
                from: item.stage,
                to: Stage::Cleaning,
                reason: Some("failed inspection".to_string()),
            });
            item.transitioned(Stage::Cleaning, Some(&operator.id), Some("failed inspection"), now)
        };

        for event in events {
            self.journal
                .append(PendingEntry::new(
                    EntityRef::Item(next.id.clone()),
                    event,
                    Some(&operator.id),
                    now,
                ))
                .await?;
        }
        *item = next.clone();

        if passed {
            info!(item_id = %next.id, inspector = %operator.id, "Inspection passed");
        } else {
            warn!(item_id = %next.id, inspector = %operator.id, "Inspection failed, item returned to cleaning");
        }
        Ok(next)
    }

    /// Record packaging completion with the packed weight used for load capacity
    pub async fn complete_packaging(
        &self,
        id: &str,
        weight_grams: u64,
        operator: &Operator,
    ) -> CssdResult<Item> {
        if weight_grams == 0 {
            return Err(CssdError::validation("weight_grams", "packed weight must be positive"));
        }

        let handle = self.handle(id).await?;
        let mut item = handle.lock().await;
        require_packaging(&item, "packaging_complete")?;

        let now = self.clock.now();
        let mut next = item.clone();
        next.prerequisites.packaging_completed_at = Some(now);
        next.weight_grams = Some(weight_grams);
        next.version += 1;

        self.journal
            .append(PendingEntry::new(
                EntityRef::Item(next.id.clone()),
                AuditEvent::PackagingCompleted { weight_grams },
                Some(&operator.id),
                now,
            ))
            .await?;
        *item = next.clone();

        info!(item_id = %next.id, weight_grams, "Packaging completed");
        Ok(next)
    }

    pub async fn get(&self, id: &str) -> CssdResult<Item> {
        let handle = self.handle(id).await?;
        let item = handle.lock().await;
        Ok(item.clone())
    }

    /// Snapshot of every item, ordered by id
    pub async fn list(&self) -> Vec<Item> {
        let handles: Vec<_> = self.items.read().await.values().cloned().collect();
        let mut items = Vec::with_capacity(handles.len());
        for handle in handles {
            items.push(handle.lock().await.clone());
        }
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    pub async fn soak_status(&self, id: &str) -> CssdResult<SoakProgress> {
        let item = self.get(id).await?;
        Ok(soak_progress(&item.soak, self.clock.now()))
    }

    async fn handle(&self, id: &str) -> CssdResult<Arc<Mutex<Item>>> {
        let id = normalize_token(id);
        self.items
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(CssdError::NotFound {
                entity: EntityRef::Item(id),
            })
    }

    /// Lock several items in ascending id order
    pub(crate) async fn lock_items(&self, ids: &[String]) -> CssdResult<Vec<OwnedMutexGuard<Item>>> {
        let ordered: BTreeSet<String> = ids.iter().map(|id| normalize_token(id)).collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for id in ordered {
            let handle = self.handle(&id).await?;
            guards.push(handle.lock_owned().await);
        }
        Ok(guards)
    }

    /// Apply engine-driven stage changes to already locked items.
    ///
    /// `steps` run in order on every item. The `leading` entries describing
    /// what caused the change go into the same journal batch as the per-item
    /// stage changes; nothing is committed unless the whole batch is written.
    pub(crate) async fn transition_locked(
        &self,
        guards: &mut [OwnedMutexGuard<Item>],
        leading: Vec<PendingEntry>,
        steps: &[(Stage, Option<&str>)],
        actor: Option<&str>,
        decorate: impl Fn(&mut Item),
    ) -> CssdResult<Vec<Item>> {
        let now = self.clock.now();

        let mut batch = leading;
        let mut staged = Vec::with_capacity(guards.len());
        for guard in guards.iter() {
            let mut next: Item = (**guard).clone();
            for &(to, reason) in steps {
                check_transition(&next, to, Trigger::Engine, now)?;
                batch.push(PendingEntry::new(
                    EntityRef::Item(next.id.clone()),
                    AuditEvent::StageChanged {
                        from: next.stage,
                        to,
                        reason: reason.map(str::to_string),
                    },
                    actor,
                    now,
                ));
                next = next.transitioned(to, actor, reason, now);
            }
            decorate(&mut next);
            staged.push(next);
        }

        self.journal.append_batch(batch).await?;

        for (guard, next) in guards.iter_mut().zip(&staged) {
            info!(item_id = %next.id, from = %guard.stage, to = %next.stage, "Item stage changed");
            **guard = next.clone();
        }
        Ok(staged)
    }
}

fn require_packaging(item: &Item, action: &str) -> CssdResult<()> {
    if item.stage == Stage::Packaging {
        Ok(())
    } else {
        Err(CssdError::IllegalTransition {
            entity: EntityRef::Item(item.id.clone()),
            from: item.stage.to_string(),
            to: action.to_string(),
            reason: "only recorded while the item is in packaging".to_string(),
        })
    }
}
