//! Shared scenario builders for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cssd_trace::cycle::standard_programs;
use cssd_trace::journal::PendingEntry;
use cssd_trace::{
    AuditJournal, Checklist, ContaminationLevel, CssdConfig, CssdError, CssdResult, CssdService, Cycle,
    JournalEntry, ManualClock, MemoryJournal, Operator, Phase, ProcedureContext, Registration, Stage,
    ValidationRecord,
};

pub const AUTOCLAVE: &str = "AC-001";
pub const PROGRAM: &str = "standard-134";

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 7, 0, 0).unwrap()
}

pub fn tech() -> Operator {
    Operator::technician("TECH-001")
}

pub fn qc() -> Operator {
    Operator::quality_control("QC-001")
}

pub fn supervisor() -> Operator {
    Operator::supervisor("SUP-001")
}

pub fn context() -> ProcedureContext {
    ProcedureContext {
        operating_room: "OR-2".to_string(),
        surgeon: "Dr. Moreau".to_string(),
        procedure_date: NaiveDate::from_ymd_opt(2026, 1, 6).unwrap(),
    }
}

/// In-memory journal whose writes can be made to fail on demand
#[derive(Default)]
pub struct SwitchableJournal {
    inner: MemoryJournal,
    failing: AtomicBool,
}

impl SwitchableJournal {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditJournal for SwitchableJournal {
    async fn append_batch(&self, entries: Vec<PendingEntry>) -> CssdResult<Vec<JournalEntry>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CssdError::Journal {
                reason: "disk full".to_string(),
            });
        }
        self.inner.append_batch(entries).await
    }

    async fn entries(&self) -> CssdResult<Vec<JournalEntry>> {
        self.inner.entries().await
    }
}

pub struct Harness {
    pub service: CssdService,
    pub clock: Arc<ManualClock>,
    pub journal: Arc<SwitchableJournal>,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let journal = Arc::new(SwitchableJournal::default());
        let service = CssdService::new(
            journal.clone(),
            clock.clone(),
            CssdConfig::default().build_autoclaves(),
            standard_programs(),
        );
        Self {
            service,
            clock,
            journal,
        }
    }

    pub async fn register(&self, scan: &str, level: ContaminationLevel) -> String {
        self.service
            .register_item(scan, Registration::new("Surgery", level, 10), &tech())
            .await
            .unwrap()
            .id
    }

    /// Register `scans`, soak them for the standard 15 minutes and take them
    /// through cleaning, inspection and packaging
    pub async fn packaged(&self, scans: &[&str], weight_grams: u64) -> Vec<String> {
        let op = tech();
        let mut ids = Vec::new();
        for scan in scans {
            let id = self.register(scan, ContaminationLevel::Standard).await;
            self.service.advance(&id, Stage::Soaking, &op).await.unwrap();
            ids.push(id);
        }
        self.clock.advance_minutes(15);
        for id in &ids {
            self.service.advance(id, Stage::Cleaning, &op).await.unwrap();
            self.service.advance(id, Stage::Packaging, &op).await.unwrap();
            self.service.record_inspection(id, true, None, &op).await.unwrap();
            self.service.complete_packaging(id, weight_grams, &op).await.unwrap();
        }
        ids
    }

    /// Build a load, start a cycle and feed in-band samples through the hold
    /// phase. The clock is left at the end of the hold phase.
    pub async fn running_cycle(&self, ids: &[String]) -> Cycle {
        let load = self.service.build_load(AUTOCLAVE, ids, &tech()).await.unwrap();
        let cycle = self.service.start_cycle(&load.id, PROGRAM, &tech()).await.unwrap();

        let (hold_start, hold_end) = cycle.program.hold_window();
        let mut offset = hold_start;
        while offset < hold_end {
            let at = cycle.started_at + offset;
            self.clock.set(at);
            self.service.record_sample(&cycle.id, 135.0, 2.1, at).await.unwrap();
            offset = offset + Duration::minutes(1);
        }
        assert_eq!(cycle.program.phase_at(hold_end), Phase::Exhaust);
        cycle
    }

    /// Run a cycle to the end and complete it; returns it pending validation
    pub async fn completed_cycle(&self, ids: &[String]) -> Cycle {
        let cycle = self.running_cycle(ids).await;
        self.clock.set(cycle.started_at + cycle.program.total());
        self.service.complete_cycle(&cycle.id, &tech()).await.unwrap()
    }

    /// Full path from packaging to a signed release
    pub async fn released_cycle(&self, scans: &[&str]) -> (Cycle, ValidationRecord) {
        let ids = self.packaged(scans, 2_000).await;
        let cycle = self.completed_cycle(&ids).await;
        let record = self
            .service
            .submit_validation(&cycle.id, Checklist::uniform(true), "indicators ok", &qc())
            .await
            .unwrap();
        let signed = self
            .service
            .sign_release(&record.id, &qc(), &record.content_hash)
            .await
            .unwrap();
        let cycle = self.service.cycle(&cycle.id).await.unwrap();
        (cycle, signed)
    }
}
