use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;

use crate::clock::{Clock, SystemClock};
use crate::config::CssdConfig;
use crate::cycle::{
    standard_programs, Autoclave, Cycle, CycleEngine, CycleProgram, CycleSnapshot, FailureReportForm,
    Load, SampleOutcome,
};
use crate::error::{CssdResult, EntityRef};
use crate::identity::Operator;
use crate::journal::{AuditJournal, JournalEntry, JsonlJournal, MemoryJournal};
use crate::observability::{CssdMetrics, OperationTimer};
use crate::report::{build_dashboard, DashboardSnapshot};
use crate::scan::normalize_token;
use crate::telemetry::{create_operation_span, generate_correlation_id};
use crate::traceability::{
    BackwardTrace, ForwardTrace, LotOrigin, PackExpiry, PackPolicy, ProcedureContext, RecallImpact,
    TraceabilityGraph, TraceabilityLink,
};
use crate::validation::{Checklist, Outcome, RejectionReason, ValidationGate, ValidationRecord};
use crate::workflow::{Item, ItemRegistry, Registration, SoakProgress, Stage};

/// Single entry point over every CSSD component.
///
/// All components share one audit journal and one clock. Each mutating call
/// runs inside its own correlation span and is timed and counted.
pub struct CssdService {
    registry: Arc<ItemRegistry>,
    engine: Arc<CycleEngine>,
    traceability: Arc<TraceabilityGraph>,
    gate: ValidationGate,
    journal: Arc<dyn AuditJournal>,
    clock: Arc<dyn Clock>,
    pack_policy: PackPolicy,
    metrics: CssdMetrics,
}

impl CssdService {
    pub fn new(
        journal: Arc<dyn AuditJournal>,
        clock: Arc<dyn Clock>,
        autoclaves: Vec<Autoclave>,
        programs: Vec<CycleProgram>,
    ) -> Self {
        Self::with_pack_policy(journal, clock, autoclaves, programs, PackPolicy::default())
    }

    pub fn with_pack_policy(
        journal: Arc<dyn AuditJournal>,
        clock: Arc<dyn Clock>,
        autoclaves: Vec<Autoclave>,
        programs: Vec<CycleProgram>,
        pack_policy: PackPolicy,
    ) -> Self {
        let registry = Arc::new(ItemRegistry::new(Arc::clone(&journal), Arc::clone(&clock)));
        let engine = Arc::new(CycleEngine::new(
            Arc::clone(&registry),
            Arc::clone(&journal),
            Arc::clone(&clock),
            autoclaves,
            programs,
        ));
        let traceability = Arc::new(TraceabilityGraph::new(
            Arc::clone(&engine),
            Arc::clone(&journal),
            Arc::clone(&clock),
        ));
        let gate = ValidationGate::new(
            Arc::clone(&engine),
            Arc::clone(&traceability),
            Arc::clone(&journal),
            Arc::clone(&clock),
            pack_policy.shelf_life,
        );

        Self {
            registry,
            engine,
            traceability,
            gate,
            journal,
            clock,
            pack_policy,
            metrics: CssdMetrics::new(),
        }
    }

    /// Default autoclaves and programs over an in-memory journal
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(
            Arc::new(MemoryJournal::new()),
            clock,
            CssdConfig::default().build_autoclaves(),
            standard_programs(),
        )
    }

    /// Service backed by the configured JSON-lines journal
    pub fn from_config(config: &CssdConfig) -> CssdResult<Self> {
        Self::from_config_with_clock(config, Arc::new(SystemClock))
    }

    pub fn from_config_with_clock(config: &CssdConfig, clock: Arc<dyn Clock>) -> CssdResult<Self> {
        config.validate()?;
        Ok(Self::with_pack_policy(
            Arc::new(JsonlJournal::new(&config.journal.path)),
            clock,
            config.build_autoclaves(),
            config.programs.clone(),
            config.packs.policy(),
        ))
    }

    async fn observed<T, F>(
        &self,
        operation: &'static str,
        entity: EntityRef,
        operator: &Operator,
        work: F,
    ) -> CssdResult<T>
    where
        F: Future<Output = CssdResult<T>>,
    {
        let correlation_id = generate_correlation_id();
        let span = create_operation_span(operation, Some(&entity), Some(&operator.id), &correlation_id);
        let timer = OperationTimer::new(operation);
        let result = work.instrument(span).await;
        match &result {
            Ok(_) => timer.finish(),
            Err(e) => {
                self.metrics.record_refused();
                timer.finish_refused(e.kind());
            }
        }
        result
    }

    // Item workflow

    pub async fn register_item(
        &self,
        scan: &str,
        registration: Registration,
        operator: &Operator,
    ) -> CssdResult<Item> {
        let entity = EntityRef::Item(normalize_token(scan));
        let item = self
            .observed("register_item", entity, operator, self.registry.register_item(scan, registration, operator))
            .await?;
        self.metrics.record_registration();
        Ok(item)
    }

    pub async fn advance(&self, item_id: &str, to: Stage, operator: &Operator) -> CssdResult<Item> {
        let entity = EntityRef::Item(normalize_token(item_id));
        let item = self
            .observed("advance", entity, operator, self.registry.advance(item_id, to, operator))
            .await?;
        self.metrics.record_transition();
        Ok(item)
    }

    pub async fn advance_expecting(
        &self,
        item_id: &str,
        to: Stage,
        expected_version: u64,
        operator: &Operator,
    ) -> CssdResult<Item> {
        let entity = EntityRef::Item(normalize_token(item_id));
        let item = self
            .observed(
                "advance",
                entity,
                operator,
                self.registry.advance_expecting(item_id, to, expected_version, operator),
            )
            .await?;
        self.metrics.record_transition();
        Ok(item)
    }

    pub async fn advance_with_override(
        &self,
        item_id: &str,
        to: Stage,
        reason: &str,
        operator: &Operator,
    ) -> CssdResult<Item> {
        let entity = EntityRef::Item(normalize_token(item_id));
        let item = self
            .observed(
                "emergency_override",
                entity,
                operator,
                self.registry.advance_with_override(item_id, to, reason, operator),
            )
            .await?;
        self.metrics.record_transition();
        self.metrics.record_override();
        Ok(item)
    }

    pub async fn record_inspection(
        &self,
        item_id: &str,
        passed: bool,
        notes: Option<&str>,
        operator: &Operator,
    ) -> CssdResult<Item> {
        let entity = EntityRef::Item(normalize_token(item_id));
        self.observed(
            "record_inspection",
            entity,
            operator,
            self.registry.record_inspection(item_id, passed, notes, operator),
        )
        .await
    }

    pub async fn complete_packaging(
        &self,
        item_id: &str,
        weight_grams: u64,
        operator: &Operator,
    ) -> CssdResult<Item> {
        let entity = EntityRef::Item(normalize_token(item_id));
        self.observed(
            "complete_packaging",
            entity,
            operator,
            self.registry.complete_packaging(item_id, weight_grams, operator),
        )
        .await
    }

    /// Hand a released item out to a care unit
    pub async fn distribute(&self, item_id: &str, operator: &Operator) -> CssdResult<Item> {
        let entity = EntityRef::Item(normalize_token(item_id));
        let item = self
            .observed(
                "distribute",
                entity,
                operator,
                self.registry.advance(item_id, Stage::Distributed, operator),
            )
            .await?;
        self.metrics.record_transition();
        Ok(item)
    }

    pub async fn dispose(&self, item_id: &str, reason: &str, operator: &Operator) -> CssdResult<Item> {
        let entity = EntityRef::Item(normalize_token(item_id));
        let item = self
            .observed("dispose", entity, operator, self.registry.dispose(item_id, reason, operator))
            .await?;
        self.metrics.record_transition();
        Ok(item)
    }

    pub async fn item(&self, item_id: &str) -> CssdResult<Item> {
        self.registry.get(item_id).await
    }

    pub async fn items(&self) -> Vec<Item> {
        self.registry.list().await
    }

    pub async fn soak_status(&self, item_id: &str) -> CssdResult<SoakProgress> {
        self.registry.soak_status(item_id).await
    }

    // Loads and cycles

    pub async fn build_load(
        &self,
        autoclave_id: &str,
        item_ids: &[String],
        operator: &Operator,
    ) -> CssdResult<Load> {
        let entity = EntityRef::Autoclave(autoclave_id.to_string());
        let load = self
            .observed("build_load", entity, operator, self.engine.build_load(autoclave_id, item_ids, operator))
            .await?;
        self.metrics.record_load();
        Ok(load)
    }

    pub async fn start_cycle(&self, load_id: &str, program: &str, operator: &Operator) -> CssdResult<Cycle> {
        let entity = EntityRef::Load(load_id.to_string());
        let cycle = self
            .observed("start_cycle", entity, operator, self.engine.start_cycle(load_id, program, operator))
            .await?;
        self.metrics.record_cycle_started();
        Ok(cycle)
    }

    /// Sensor feed entry point. Not wrapped in an operation span: samples
    /// arrive once per tick.
    pub async fn record_sample(
        &self,
        cycle_id: &str,
        temperature: f64,
        pressure: f64,
        at: DateTime<Utc>,
    ) -> CssdResult<SampleOutcome> {
        let outcome = self.engine.record_sample(cycle_id, temperature, pressure, at).await;
        match &outcome {
            Ok(SampleOutcome::CycleFailed) => self.metrics.record_cycle_failed(),
            Ok(_) => {}
            Err(_) => self.metrics.record_refused(),
        }
        outcome
    }

    pub async fn complete_cycle(&self, cycle_id: &str, operator: &Operator) -> CssdResult<Cycle> {
        let entity = EntityRef::Cycle(cycle_id.to_string());
        let cycle = self
            .observed("complete_cycle", entity, operator, self.engine.complete_cycle(cycle_id, operator))
            .await?;
        self.metrics.record_cycle_completed();
        Ok(cycle)
    }

    pub async fn emergency_stop(&self, cycle_id: &str, reason: &str, operator: &Operator) -> CssdResult<Cycle> {
        let entity = EntityRef::Cycle(cycle_id.to_string());
        let cycle = self
            .observed(
                "emergency_stop",
                entity,
                operator,
                self.engine.emergency_stop(cycle_id, reason, operator),
            )
            .await?;
        self.metrics.record_cycle_failed();
        Ok(cycle)
    }

    pub async fn file_failure_report(
        &self,
        cycle_id: &str,
        form: FailureReportForm,
        operator: &Operator,
    ) -> CssdResult<Cycle> {
        let entity = EntityRef::Cycle(cycle_id.to_string());
        self.observed(
            "file_failure_report",
            entity,
            operator,
            self.engine.file_failure_report(cycle_id, form, operator),
        )
        .await
    }

    pub async fn return_to_service(&self, autoclave_id: &str, operator: &Operator) -> CssdResult<Autoclave> {
        let entity = EntityRef::Autoclave(autoclave_id.to_string());
        self.observed(
            "return_to_service",
            entity,
            operator,
            self.engine.return_to_service(autoclave_id, operator),
        )
        .await
    }

    pub async fn cycle(&self, cycle_id: &str) -> CssdResult<Cycle> {
        self.engine.cycle(cycle_id).await
    }

    pub async fn cycle_snapshot(&self, cycle_id: &str) -> CssdResult<CycleSnapshot> {
        self.engine.snapshot(cycle_id).await
    }

    pub async fn cycles(&self) -> Vec<Cycle> {
        self.engine.cycles().await
    }

    pub async fn load(&self, load_id: &str) -> CssdResult<Load> {
        self.engine.load(load_id).await
    }

    pub async fn autoclaves(&self) -> Vec<Autoclave> {
        self.engine.autoclaves().await
    }

    pub fn programs(&self) -> Vec<CycleProgram> {
        self.engine.programs()
    }

    // Validation

    pub async fn submit_validation(
        &self,
        cycle_id: &str,
        checklist: Checklist,
        comments: &str,
        inspector: &Operator,
    ) -> CssdResult<ValidationRecord> {
        let entity = EntityRef::Cycle(cycle_id.to_string());
        let record = self
            .observed(
                "submit_validation",
                entity,
                inspector,
                self.gate.submit_validation(cycle_id, checklist, comments, inspector),
            )
            .await?;
        if record.outcome == Outcome::Rejected {
            self.metrics.record_rejection();
        }
        Ok(record)
    }

    pub async fn reject_load(
        &self,
        cycle_id: &str,
        reason: Option<RejectionReason>,
        comments: &str,
        inspector: &Operator,
    ) -> CssdResult<ValidationRecord> {
        let entity = EntityRef::Cycle(cycle_id.to_string());
        let record = self
            .observed(
                "reject_load",
                entity,
                inspector,
                self.gate.reject_load(cycle_id, reason, comments, inspector),
            )
            .await?;
        self.metrics.record_rejection();
        Ok(record)
    }

    pub async fn sign_release(
        &self,
        validation_id: &str,
        signer: &Operator,
        acknowledged_hash: &str,
    ) -> CssdResult<ValidationRecord> {
        let entity = EntityRef::Validation(validation_id.to_string());
        let record = self
            .observed(
                "sign_release",
                entity,
                signer,
                self.gate.sign_release(validation_id, signer, acknowledged_hash),
            )
            .await?;
        self.metrics.record_release();
        Ok(record)
    }

    pub async fn validation(&self, validation_id: &str) -> CssdResult<ValidationRecord> {
        self.gate.record(validation_id).await
    }

    pub async fn validations(&self) -> Vec<ValidationRecord> {
        self.gate.records().await
    }

    pub async fn validations_for_cycle(&self, cycle_id: &str) -> Vec<ValidationRecord> {
        self.gate.records_for_cycle(cycle_id).await
    }

    // Traceability

    pub async fn link_pack_to_procedure(
        &self,
        lot_id: &str,
        cycle_id: &str,
        procedure_id: &str,
        patient_id: &str,
        context: ProcedureContext,
        operator: &Operator,
    ) -> CssdResult<TraceabilityLink> {
        let entity = EntityRef::Procedure(procedure_id.trim().to_string());
        let link = self
            .observed(
                "link_pack_to_procedure",
                entity,
                operator,
                self.traceability
                    .link_pack_to_procedure(lot_id, cycle_id, procedure_id, patient_id, context, operator),
            )
            .await?;
        self.metrics.record_link();
        Ok(link)
    }

    pub async fn trace_forward_from_cycle(&self, cycle_id: &str) -> ForwardTrace {
        self.traceability.trace_forward_from_cycle(cycle_id).await
    }

    pub async fn trace_backward_from_patient(&self, patient_id: &str) -> BackwardTrace {
        self.traceability.trace_backward_from_patient(patient_id).await
    }

    pub async fn recall_impact(&self, cycle_id: &str) -> RecallImpact {
        self.traceability.recall_impact(cycle_id).await
    }

    pub async fn origin_of(&self, lot_id: &str) -> Option<String> {
        self.traceability.origin_of(lot_id).await
    }

    pub async fn lot(&self, lot_id: &str) -> Option<LotOrigin> {
        self.traceability.lot(lot_id).await
    }

    /// Unused packs expiring within `window`, expired packs included
    pub async fn expiring_packs(&self, window: Duration) -> Vec<PackExpiry> {
        self.traceability.expiring_within(window).await
    }

    pub fn pack_policy(&self) -> PackPolicy {
        self.pack_policy
    }

    // Reporting

    pub async fn dashboard(&self) -> DashboardSnapshot {
        let items = self.registry.list().await;
        let cycles = self.engine.cycles().await;
        let records = self.gate.records().await;
        let autoclaves = self.engine.autoclaves().await;
        let links = self.traceability.links().await.len();
        let expiring = self.traceability.expiring_within(self.pack_policy.expiry_warning).await;
        build_dashboard(&items, &cycles, &records, autoclaves, expiring, links, self.clock.now())
    }

    pub async fn audit_trail(&self, entity: &EntityRef) -> CssdResult<Vec<JournalEntry>> {
        self.journal.entries_for(entity).await
    }

    pub async fn journal_entries(&self) -> CssdResult<Vec<JournalEntry>> {
        self.journal.entries().await
    }

    pub fn metrics(&self) -> &CssdMetrics {
        &self.metrics
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
