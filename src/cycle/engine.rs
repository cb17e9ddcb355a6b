use chrono::{DateTime, Datelike, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::program::{CycleProgram, Phase};
use super::types::{
    Autoclave, AutoclaveState, Cycle, CycleSnapshot, CycleStatus, FailureCause, FailureReport,
    FailureReportForm, FailureReason, Load, ParameterSample, SampleOutcome,
};
use crate::clock::Clock;
use crate::error::{CssdError, CssdResult, EntityRef};
use crate::identity::Operator;
use crate::journal::{AuditEvent, AuditJournal, PendingEntry};
use crate::scan::normalize_token;
use crate::workflow::{check_transition, ItemRegistry, Stage, Trigger};

/// Runs loads through autoclaves.
///
/// Lock order is always cycle, then the autoclave table, then items, so the
/// engine never deadlocks against itself or the validation gate.
pub struct CycleEngine {
    registry: Arc<ItemRegistry>,
    journal: Arc<dyn AuditJournal>,
    clock: Arc<dyn Clock>,
    programs: BTreeMap<String, CycleProgram>,
    autoclaves: Mutex<BTreeMap<String, Autoclave>>,
    loads: RwLock<HashMap<String, Load>>,
    cycles: RwLock<HashMap<String, Arc<RwLock<Cycle>>>>,
    sequence: AtomicU64,
}

impl CycleEngine {
    pub fn new(
        registry: Arc<ItemRegistry>,
        journal: Arc<dyn AuditJournal>,
        clock: Arc<dyn Clock>,
        autoclaves: Vec<Autoclave>,
        programs: Vec<CycleProgram>,
    ) -> Self {
        Self {
            registry,
            journal,
            clock,
            programs: programs.into_iter().map(|p| (p.name.clone(), p)).collect(),
            autoclaves: Mutex::new(autoclaves.into_iter().map(|a| (a.id.clone(), a)).collect()),
            loads: RwLock::new(HashMap::new()),
            cycles: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn programs(&self) -> Vec<CycleProgram> {
        self.programs.values().cloned().collect()
    }

    pub fn program(&self, name: &str) -> CssdResult<&CycleProgram> {
        self.programs.get(name).ok_or_else(|| {
            CssdError::validation(
                "program",
                format!(
                    "unknown program '{name}' (available: {})",
                    self.programs.keys().cloned().collect::<Vec<_>>().join(", ")
                ),
            )
        })
    }

    pub async fn autoclaves(&self) -> Vec<Autoclave> {
        self.autoclaves.lock().await.values().cloned().collect()
    }

    /// Assemble packaged items into a load for one autoclave.
    ///
    /// Capacity is checked first (a load at exactly the capacity is
    /// accepted), then every member's cleaning, inspection and packaging
    /// prerequisites.
    pub async fn build_load(
        &self,
        autoclave_id: &str,
        item_ids: &[String],
        operator: &Operator,
    ) -> CssdResult<Load> {
        if item_ids.is_empty() {
            return Err(CssdError::validation("item_ids", "a load needs at least one item"));
        }
        let unique: BTreeSet<String> = item_ids.iter().map(|id| normalize_token(id)).collect();
        if unique.len() != item_ids.len() {
            return Err(CssdError::validation("item_ids", "an item can only appear once in a load"));
        }

        let capacity_grams = {
            let autoclaves = self.autoclaves.lock().await;
            autoclaves
                .get(autoclave_id)
                .map(|a| a.capacity_grams)
                .ok_or_else(|| CssdError::not_found(EntityRef::Autoclave(autoclave_id.to_string())))?
        };

        let mut guards = self.registry.lock_items(item_ids).await?;

        let total_grams: u64 = guards.iter().map(|item| item.weight_grams.unwrap_or(0)).sum();
        if total_grams > capacity_grams {
            warn!(
                autoclave = autoclave_id,
                total_grams,
                capacity_grams,
                "Load exceeds autoclave capacity"
            );
            return Err(CssdError::CapacityExceeded {
                autoclave: autoclave_id.to_string(),
                total_grams,
                capacity_grams,
            });
        }

        let now = self.clock.now();
        for item in guards.iter() {
            let missing = item.prerequisites.missing();
            if !missing.is_empty() {
                warn!(item_id = %item.id, missing = ?missing, "Item not ready for loading");
                return Err(CssdError::PrerequisiteNotMet {
                    item: item.id.clone(),
                    missing,
                });
            }
            check_transition(item, Stage::Loaded, Trigger::Engine, now)?;
        }

        let load = Load {
            id: format!("LD-{}", &Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase()),
            autoclave_id: autoclave_id.to_string(),
            item_ids: guards.iter().map(|item| item.id.clone()).collect(),
            total_grams,
            capacity_grams,
            built_by: operator.id.clone(),
            built_at: now,
            cycle_id: None,
        };

        let built = PendingEntry::new(
            EntityRef::Load(load.id.clone()),
            AuditEvent::LoadBuilt {
                autoclave: load.autoclave_id.clone(),
                items: load.item_ids.clone(),
                total_grams,
            },
            Some(&operator.id),
            now,
        );
        let load_id = load.id.clone();
        self.registry
            .transition_locked(
                &mut guards,
                vec![built],
                &[(Stage::Loaded, None)],
                Some(&operator.id),
                |item| item.load_id = Some(load_id.clone()),
            )
            .await?;
        self.loads.write().await.insert(load.id.clone(), load.clone());

        info!(
            load_id = %load.id,
            autoclave = %load.autoclave_id,
            items = load.item_ids.len(),
            total_grams,
            capacity_grams,
            "Load built"
        );
        Ok(load)
    }

    /// Claim the load's autoclave and start a cycle on it
    pub async fn start_cycle(
        &self,
        load_id: &str,
        program_name: &str,
        operator: &Operator,
    ) -> CssdResult<Cycle> {
        let program = self.program(program_name)?.clone();

        let mut autoclaves = self.autoclaves.lock().await;
        let load = self
            .loads
            .read()
            .await
            .get(load_id)
            .cloned()
            .ok_or_else(|| CssdError::not_found(EntityRef::Load(load_id.to_string())))?;
        if let Some(cycle_id) = &load.cycle_id {
            return Err(CssdError::IllegalTransition {
                entity: EntityRef::Load(load.id.clone()),
                from: "loaded".to_string(),
                to: "sterilizing".to_string(),
                reason: format!("load already ran cycle {cycle_id}"),
            });
        }

        let autoclave = autoclaves
            .get_mut(&load.autoclave_id)
            .ok_or_else(|| CssdError::not_found(EntityRef::Autoclave(load.autoclave_id.clone())))?;
        if autoclave.state != AutoclaveState::Idle {
            warn!(
                autoclave = %autoclave.id,
                state = %autoclave.state,
                load_id = %load.id,
                "Autoclave busy"
            );
            return Err(CssdError::AutoclaveBusy {
                autoclave: autoclave.id.clone(),
                state: autoclave.state.to_string(),
            });
        }

        let mut guards = self.registry.lock_items(&load.item_ids).await?;
        let now = self.clock.now();
        for item in guards.iter() {
            check_transition(item, Stage::Sterilizing, Trigger::Engine, now)?;
        }

        let cycle_id = self.next_cycle_id(&autoclave.id, now);
        let started = PendingEntry::new(
            EntityRef::Cycle(cycle_id.clone()),
            AuditEvent::CycleStarted {
                load: load.id.clone(),
                autoclave: autoclave.id.clone(),
                program: program.name.clone(),
            },
            Some(&operator.id),
            now,
        );
        self.registry
            .transition_locked(
                &mut guards,
                vec![started],
                &[(Stage::Sterilizing, None)],
                Some(&operator.id),
                |_| {},
            )
            .await?;

        let cycle = Cycle {
            id: cycle_id.clone(),
            load_id: load.id.clone(),
            autoclave_id: autoclave.id.clone(),
            item_ids: load.item_ids.clone(),
            program,
            operator: operator.id.clone(),
            started_at: now,
            ended_at: None,
            status: CycleStatus::Running,
            samples: Vec::new(),
            failure: None,
            failure_report: None,
        };

        autoclave.state = AutoclaveState::Running {
            cycle_id: cycle_id.clone(),
        };
        if let Some(stored) = self.loads.write().await.get_mut(&load.id) {
            stored.cycle_id = Some(cycle_id.clone());
        }
        self.cycles
            .write()
            .await
            .insert(cycle_id.clone(), Arc::new(RwLock::new(cycle.clone())));

        info!(
            cycle_id = %cycle_id,
            load_id = %load.id,
            autoclave = %cycle.autoclave_id,
            program = %cycle.program.name,
            operator = %operator.id,
            "Sterilization cycle started"
        );
        Ok(cycle)
    }

    /// Append one parameter sample to a running cycle.
    ///
    /// A single out-of-band sample during the hold phase fails the cycle.
    pub async fn record_sample(
        &self,
        cycle_id: &str,
        temperature: f64,
        pressure: f64,
        at: DateTime<Utc>,
    ) -> CssdResult<SampleOutcome> {
        if !temperature.is_finite() || !pressure.is_finite() {
            return Err(CssdError::validation("sample", "temperature and pressure must be finite"));
        }

        let handle = self.cycle_handle(cycle_id).await?;
        let mut cycle = handle.write().await;

        if cycle.status != CycleStatus::Running {
            return Err(CssdError::IllegalTransition {
                entity: EntityRef::Cycle(cycle.id.clone()),
                from: cycle.status.to_string(),
                to: "sample".to_string(),
                reason: "samples are only accepted while the cycle is running".to_string(),
            });
        }
        if at < cycle.started_at {
            return Err(CssdError::validation(
                "sample.at",
                format!("{at} is before cycle start {}", cycle.started_at),
            ));
        }

        let sample = ParameterSample {
            at,
            temperature,
            pressure,
        };
        match cycle.samples.binary_search_by_key(&at, |s| s.at) {
            Ok(existing) => {
                let existing = cycle.samples[existing];
                return if existing == sample {
                    debug!(cycle_id = %cycle.id, at = %at, "Duplicate sample ignored");
                    Ok(SampleOutcome::Duplicate)
                } else {
                    Err(CssdError::validation(
                        "sample",
                        format!("a different sample is already recorded at {at}"),
                    ))
                };
            }
            Err(position) => cycle.samples.insert(position, sample),
        }

        let phase = cycle.program.phase_at(at - cycle.started_at);
        let in_tolerance = cycle.program.in_tolerance(temperature, pressure);
        debug!(
            cycle_id = %cycle.id,
            temperature,
            pressure,
            phase = %phase,
            in_tolerance,
            "Sample recorded"
        );

        if phase == Phase::Sterilization && !in_tolerance {
            let cause = FailureCause::OutOfTolerance {
                at,
                temperature,
                pressure,
            };
            if let Err(e) = self.fail_locked(&mut cycle, cause, None).await {
                // Keep the trace consistent with the unchanged status
                if let Ok(position) = cycle.samples.binary_search_by_key(&at, |s| s.at) {
                    cycle.samples.remove(position);
                }
                return Err(e);
            }
            return Ok(SampleOutcome::CycleFailed);
        }

        Ok(SampleOutcome::Recorded {
            phase,
            in_tolerance,
        })
    }

    /// Finish a running cycle whose program time has fully elapsed
    pub async fn complete_cycle(&self, cycle_id: &str, operator: &Operator) -> CssdResult<Cycle> {
        let handle = self.cycle_handle(cycle_id).await?;
        let mut cycle = handle.write().await;
        let now = self.clock.now();

        if cycle.status != CycleStatus::Running {
            warn!(cycle_id = %cycle.id, status = %cycle.status, "Cannot complete cycle");
            return Err(CssdError::IllegalTransition {
                entity: EntityRef::Cycle(cycle.id.clone()),
                from: cycle.status.to_string(),
                to: CycleStatus::PendingValidation.to_string(),
                reason: "only a running cycle can complete".to_string(),
            });
        }
        let progress = cycle.progress(now);
        if progress < 100 {
            return Err(CssdError::IllegalTransition {
                entity: EntityRef::Cycle(cycle.id.clone()),
                from: cycle.status.to_string(),
                to: CycleStatus::PendingValidation.to_string(),
                reason: format!("cycle is at {progress}%"),
            });
        }

        let mut autoclaves = self.autoclaves.lock().await;
        let mut guards = self.registry.lock_items(&cycle.item_ids).await?;
        for item in guards.iter() {
            check_transition(item, Stage::PendingValidation, Trigger::Engine, now)?;
        }

        let completed = PendingEntry::new(
            EntityRef::Cycle(cycle.id.clone()),
            AuditEvent::CycleCompleted,
            Some(&operator.id),
            now,
        );
        self.registry
            .transition_locked(
                &mut guards,
                vec![completed],
                &[(Stage::PendingValidation, None)],
                Some(&operator.id),
                |_| {},
            )
            .await?;

        if let Some(autoclave) = autoclaves.get_mut(&cycle.autoclave_id) {
            autoclave.state = AutoclaveState::Idle;
        }
        cycle.status = CycleStatus::PendingValidation;
        cycle.ended_at = Some(now);

        info!(
            cycle_id = %cycle.id,
            autoclave = %cycle.autoclave_id,
            samples = cycle.samples.len(),
            "Cycle completed, awaiting validation"
        );
        Ok(cycle.clone())
    }

    /// Operator abort. The cycle fails and the autoclave waits for a failure report.
    pub async fn emergency_stop(
        &self,
        cycle_id: &str,
        reason: &str,
        operator: &Operator,
    ) -> CssdResult<Cycle> {
        if reason.trim().is_empty() {
            return Err(CssdError::MissingReason {
                entity: EntityRef::Cycle(cycle_id.to_string()),
                action: "emergency stop".to_string(),
            });
        }

        let handle = self.cycle_handle(cycle_id).await?;
        let mut cycle = handle.write().await;
        if cycle.status != CycleStatus::Running {
            return Err(CssdError::IllegalTransition {
                entity: EntityRef::Cycle(cycle.id.clone()),
                from: cycle.status.to_string(),
                to: CycleStatus::Failed.to_string(),
                reason: "only a running cycle can be stopped".to_string(),
            });
        }

        let cause = FailureCause::EmergencyStop {
            reason: reason.trim().to_string(),
            operator: operator.id.clone(),
        };
        self.fail_locked(&mut cycle, cause, Some(&operator.id)).await?;
        Ok(cycle.clone())
    }

    async fn fail_locked(
        &self,
        cycle: &mut Cycle,
        cause: FailureCause,
        actor: Option<&str>,
    ) -> CssdResult<()> {
        let now = self.clock.now();
        let mut autoclaves = self.autoclaves.lock().await;
        let mut guards = self.registry.lock_items(&cycle.item_ids).await?;
        for item in guards.iter() {
            check_transition(item, Stage::Rejected, Trigger::Engine, now)?;
        }

        let failed = PendingEntry::new(
            EntityRef::Cycle(cycle.id.clone()),
            AuditEvent::CycleFailed {
                cause: cause.clone(),
            },
            actor,
            now,
        );
        let reason = format!("cycle {} failed", cycle.id);
        self.registry
            .transition_locked(
                &mut guards,
                vec![failed],
                &[(Stage::Rejected, Some(reason.as_str()))],
                actor,
                |_| {},
            )
            .await?;

        if let Some(autoclave) = autoclaves.get_mut(&cycle.autoclave_id) {
            autoclave.state = AutoclaveState::AwaitingFailureReport {
                cycle_id: cycle.id.clone(),
            };
        }
        cycle.status = CycleStatus::Failed;
        cycle.ended_at = Some(now);

        error!(
            cycle_id = %cycle.id,
            autoclave = %cycle.autoclave_id,
            cause = ?cause,
            "Sterilization cycle failed"
        );
        cycle.failure = Some(cause);
        Ok(())
    }

    /// File the human-authored report for a failed cycle. Releases the
    /// autoclave (or takes it out of service) and sends the items to rework.
    pub async fn file_failure_report(
        &self,
        cycle_id: &str,
        form: FailureReportForm,
        operator: &Operator,
    ) -> CssdResult<Cycle> {
        let description = form.description.trim().to_string();
        if description.is_empty() && form.reason == FailureReason::Other {
            return Err(CssdError::MissingReason {
                entity: EntityRef::Cycle(cycle_id.to_string()),
                action: "failure report".to_string(),
            });
        }

        let handle = self.cycle_handle(cycle_id).await?;
        let mut cycle = handle.write().await;
        if cycle.status != CycleStatus::Failed || cycle.failure_report.is_some() {
            return Err(CssdError::IllegalTransition {
                entity: EntityRef::Cycle(cycle.id.clone()),
                from: cycle.status.to_string(),
                to: "failure_reported".to_string(),
                reason: "only failed cycles without a report accept one".to_string(),
            });
        }

        let now = self.clock.now();
        let report = FailureReport {
            reason: form.reason,
            equipment_issue: form.equipment_issue,
            operator_error: form.operator_error,
            maintenance_required: form.maintenance_required,
            description,
            reporter: operator.id.clone(),
            reported_at: now,
        };

        let mut autoclaves = self.autoclaves.lock().await;
        let mut guards = self.registry.lock_items(&cycle.item_ids).await?;
        for item in guards.iter() {
            check_transition(item, Stage::Cleaning, Trigger::Engine, now)?;
        }

        let reported = PendingEntry::new(
            EntityRef::Cycle(cycle.id.clone()),
            AuditEvent::FailureReported {
                report: report.clone(),
            },
            Some(&operator.id),
            now,
        );
        self.registry
            .transition_locked(
                &mut guards,
                vec![reported],
                &[(Stage::Cleaning, Some("reprocessing after failed cycle"))],
                Some(&operator.id),
                |_| {},
            )
            .await?;

        if let Some(autoclave) = autoclaves.get_mut(&cycle.autoclave_id) {
            autoclave.state = if report.maintenance_required {
                AutoclaveState::OutOfService {
                    reason: format!("maintenance after cycle {}", cycle.id),
                }
            } else {
                AutoclaveState::Idle
            };
            info!(
                autoclave = %autoclave.id,
                state = %autoclave.state,
                "Autoclave released after failure report"
            );
        }

        warn!(
            cycle_id = %cycle.id,
            reason = ?report.reason,
            equipment_issue = ?report.equipment_issue,
            maintenance_required = report.maintenance_required,
            reporter = %operator.id,
            "Failure report filed"
        );
        cycle.failure_report = Some(report);
        Ok(cycle.clone())
    }

    pub async fn return_to_service(&self, autoclave_id: &str, operator: &Operator) -> CssdResult<Autoclave> {
        operator.require(operator.role.can_manage_equipment(), "return an autoclave to service")?;

        let mut autoclaves = self.autoclaves.lock().await;
        let autoclave = autoclaves
            .get_mut(autoclave_id)
            .ok_or_else(|| CssdError::not_found(EntityRef::Autoclave(autoclave_id.to_string())))?;
        if !matches!(autoclave.state, AutoclaveState::OutOfService { .. }) {
            return Err(CssdError::IllegalTransition {
                entity: EntityRef::Autoclave(autoclave.id.clone()),
                from: autoclave.state.as_str().to_string(),
                to: AutoclaveState::Idle.as_str().to_string(),
                reason: "autoclave is not out of service".to_string(),
            });
        }

        self.journal
            .append(PendingEntry::new(
                EntityRef::Autoclave(autoclave.id.clone()),
                AuditEvent::AutoclaveReturnedToService,
                Some(&operator.id),
                self.clock.now(),
            ))
            .await?;
        autoclave.state = AutoclaveState::Idle;

        info!(autoclave = %autoclave.id, operator = %operator.id, "Autoclave returned to service");
        Ok(autoclave.clone())
    }

    pub async fn cycle(&self, cycle_id: &str) -> CssdResult<Cycle> {
        let handle = self.cycle_handle(cycle_id).await?;
        let cycle = handle.read().await;
        Ok(cycle.clone())
    }

    pub async fn snapshot(&self, cycle_id: &str) -> CssdResult<CycleSnapshot> {
        let handle = self.cycle_handle(cycle_id).await?;
        let cycle = handle.read().await;
        Ok(cycle.snapshot(self.clock.now()))
    }

    /// Every cycle ordered by start time
    pub async fn cycles(&self) -> Vec<Cycle> {
        let handles: Vec<_> = self.cycles.read().await.values().cloned().collect();
        let mut cycles = Vec::with_capacity(handles.len());
        for handle in handles {
            cycles.push(handle.read().await.clone());
        }
        cycles.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        cycles
    }

    pub async fn load(&self, load_id: &str) -> CssdResult<Load> {
        self.loads
            .read()
            .await
            .get(load_id)
            .cloned()
            .ok_or_else(|| CssdError::not_found(EntityRef::Load(load_id.to_string())))
    }

    pub(crate) async fn cycle_handle(&self, cycle_id: &str) -> CssdResult<Arc<RwLock<Cycle>>> {
        self.cycles
            .read()
            .await
            .get(cycle_id)
            .cloned()
            .ok_or_else(|| CssdError::not_found(EntityRef::Cycle(cycle_id.to_string())))
    }

    pub(crate) fn registry(&self) -> &Arc<ItemRegistry> {
        &self.registry
    }

    fn next_cycle_id(&self, autoclave_id: &str, now: DateTime<Utc>) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}-{seq:04}", autoclave_id.replace('-', ""), now.year())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::cycle::{standard_programs, EquipmentIssue};
    use crate::journal::MemoryJournal;
    use crate::workflow::{ContaminationLevel, Registration};
    use chrono::{Duration, TimeZone};

    struct Harness {
        clock: Arc<ManualClock>,
        registry: Arc<ItemRegistry>,
        engine: CycleEngine,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 7, 0, 0).unwrap()));
        let journal: Arc<dyn AuditJournal> = Arc::new(MemoryJournal::new());
        let registry = Arc::new(ItemRegistry::new(journal.clone(), clock.clone()));
        let engine = CycleEngine::new(
            registry.clone(),
            journal,
            clock.clone(),
            vec![Autoclave::new("AC-001", 10_000), Autoclave::new("AC-002", 10_000)],
            standard_programs(),
        );
        Harness {
            clock,
            registry,
            engine,
        }
    }

    async fn packaged(h: &Harness, id: &str, grams: u64) {
        let tech = Operator::technician("TECH-001");
        h.registry
            .register_item(id, Registration::new("OR-1", ContaminationLevel::Standard, 4), &tech)
            .await
            .unwrap();
        h.registry.advance(id, Stage::Soaking, &tech).await.unwrap();
        h.clock.advance_minutes(15);
        h.registry.advance(id, Stage::Cleaning, &tech).await.unwrap();
        h.registry.advance(id, Stage::Packaging, &tech).await.unwrap();
        h.registry.record_inspection(id, true, None, &tech).await.unwrap();
        h.registry.complete_packaging(id, grams, &tech).await.unwrap();
    }

    #[tokio::test]
    async fn test_capacity_boundary_is_inclusive() {
        let h = harness();
        packaged(&h, "BSK001", 6_000).await;
        packaged(&h, "BSK002", 4_000).await;
        packaged(&h, "BSK003", 1).await;
        let tech = Operator::technician("TECH-001");

        let err = h
            .engine
            .build_load(
                "AC-001",
                &["BSK001".to_string(), "BSK002".to_string(), "BSK003".to_string()],
                &tech,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "capacity_exceeded");

        let load = h
            .engine
            .build_load("AC-001", &["BSK001".to_string(), "BSK002".to_string()], &tech)
            .await
            .unwrap();
        assert_eq!(load.total_grams, 10_000);
        assert_eq!(h.registry.get("BSK001").await.unwrap().stage, Stage::Loaded);
    }

    #[tokio::test]
    async fn test_build_load_checks_prerequisites() {
        let h = harness();
        let tech = Operator::technician("TECH-001");
        h.registry
            .register_item("BSK010", Registration::new("ICU", ContaminationLevel::Standard, 2), &tech)
            .await
            .unwrap();

        let err = h
            .engine
            .build_load("AC-001", &["BSK010".to_string()], &tech)
            .await
            .unwrap_err();
        match err {
            CssdError::PrerequisiteNotMet { item, missing } => {
                assert_eq!(item, "BSK010");
                assert_eq!(missing.len(), 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_busy_autoclave_refuses_second_cycle() {
        let h = harness();
        packaged(&h, "BSK020", 1_000).await;
        packaged(&h, "BSK021", 1_000).await;
        let tech = Operator::technician("TECH-001");

        let first = h.engine.build_load("AC-001", &["BSK020".to_string()], &tech).await.unwrap();
        let second = h.engine.build_load("AC-001", &["BSK021".to_string()], &tech).await.unwrap();
        h.engine.start_cycle(&first.id, "standard-134", &tech).await.unwrap();

        let err = h.engine.start_cycle(&second.id, "standard-134", &tech).await.unwrap_err();
        assert_eq!(err.kind(), "autoclave_busy");
    }

    #[tokio::test]
    async fn test_out_of_band_hold_sample_fails_cycle() {
        let h = harness();
        packaged(&h, "BSK030", 2_000).await;
        let tech = Operator::technician("TECH-001");
        let load = h.engine.build_load("AC-001", &["BSK030".to_string()], &tech).await.unwrap();
        let cycle = h.engine.start_cycle(&load.id, "standard-134", &tech).await.unwrap();

        // Heat-up samples below the band are fine
        let outcome = h
            .engine
            .record_sample(&cycle.id, 90.0, 0.8, cycle.started_at + Duration::minutes(3))
            .await
            .unwrap();
        assert!(matches!(outcome, SampleOutcome::Recorded { in_tolerance: false, .. }));

        let outcome = h
            .engine
            .record_sample(&cycle.id, 133.5, 2.1, cycle.started_at + Duration::minutes(12))
            .await
            .unwrap();
        assert_eq!(outcome, SampleOutcome::CycleFailed);

        h.clock.advance_minutes(60);
        let err = h.engine.complete_cycle(&cycle.id, &tech).await.unwrap_err();
        assert_eq!(err.kind(), "illegal_transition");
        assert_eq!(h.registry.get("BSK030").await.unwrap().stage, Stage::Rejected);

        let autoclaves = h.engine.autoclaves().await;
        assert_eq!(autoclaves[0].state.as_str(), "awaiting_failure_report");
    }

    #[tokio::test]
    async fn test_duplicate_sample_is_not_double_counted() {
        let h = harness();
        packaged(&h, "BSK040", 2_000).await;
        let tech = Operator::technician("TECH-001");
        let load = h.engine.build_load("AC-002", &["BSK040".to_string()], &tech).await.unwrap();
        let cycle = h.engine.start_cycle(&load.id, "standard-134", &tech).await.unwrap();

        let at = cycle.started_at + Duration::minutes(15);
        h.engine.record_sample(&cycle.id, 134.6, 2.15, at).await.unwrap();
        let outcome = h.engine.record_sample(&cycle.id, 134.6, 2.15, at).await.unwrap();
        assert_eq!(outcome, SampleOutcome::Duplicate);
        assert_eq!(h.engine.cycle(&cycle.id).await.unwrap().samples.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_report_releases_autoclave() {
        let h = harness();
        packaged(&h, "BSK050", 2_000).await;
        let tech = Operator::technician("TECH-001");
        let load = h.engine.build_load("AC-001", &["BSK050".to_string()], &tech).await.unwrap();
        let cycle = h.engine.start_cycle(&load.id, "flash-132", &tech).await.unwrap();

        let err = h.engine.emergency_stop(&cycle.id, "", &tech).await.unwrap_err();
        assert_eq!(err.kind(), "missing_reason");
        h.engine.emergency_stop(&cycle.id, "door seal alarm", &tech).await.unwrap();

        let form = FailureReportForm::new(FailureReason::EquipmentMalfunction, "door seal replaced")
            .with_equipment_issue(EquipmentIssue::DoorSeal)
            .requiring_maintenance();
        h.engine.file_failure_report(&cycle.id, form, &tech).await.unwrap();

        assert_eq!(h.registry.get("BSK050").await.unwrap().stage, Stage::Cleaning);
        let err = h.engine.return_to_service("AC-001", &tech).await.unwrap_err();
        assert_eq!(err.kind(), "unauthorized");
        let autoclave = h
            .engine
            .return_to_service("AC-001", &Operator::supervisor("SUP-001"))
            .await
            .unwrap();
        assert_eq!(autoclave.state, AutoclaveState::Idle);
    }

    #[test]
    fn test_cycle_ids_carry_autoclave_and_year() {
        let h = harness();
        let now = Utc.with_ymd_and_hms(2026, 5, 4, 7, 0, 0).unwrap();
        assert_eq!(h.engine.next_cycle_id("AC-001", now), "AC001-2026-0001");
        assert_eq!(h.engine.next_cycle_id("AC-002", now), "AC002-2026-0002");
    }
}
