use anyhow::{bail, Result};
use chrono::{Duration, TimeZone, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::Command;
use crate::clock::{Clock, ManualClock};
use crate::config::CssdConfig;
use crate::cycle::{FailureReason, FailureReportForm, Phase, SampleOutcome};
use crate::identity::Operator;
use crate::journal::{AuditJournal, JsonlJournal, MemoryJournal};
use crate::service::CssdService;
use crate::traceability::{lot_id_for, ProcedureContext};
use crate::validation::Checklist;
use crate::workflow::{ContaminationLevel, Registration, Stage};

const BASKET_WEIGHT_GRAMS: u64 = 2_500;

/// Drives baskets from intake to patient linkage on a manual clock
pub struct SimulateCommand {
    pub config: CssdConfig,
    pub items: u32,
    pub program: String,
    pub fail: bool,
    pub journal: Option<PathBuf>,
    pub json: bool,
}

impl Command for SimulateCommand {
    async fn execute(&self) -> Result<()> {
        if !(1..=20).contains(&self.items) {
            bail!("--items must be between 1 and 20");
        }

        let start = Utc
            .with_ymd_and_hms(2026, 1, 5, 7, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let clock = Arc::new(ManualClock::new(start));
        let journal: Arc<dyn AuditJournal> = match &self.journal {
            Some(path) => Arc::new(JsonlJournal::new(path)),
            None => Arc::new(MemoryJournal::new()),
        };
        self.config.validate()?;
        let service = CssdService::with_pack_policy(
            journal,
            clock.clone(),
            self.config.build_autoclaves(),
            self.config.programs.clone(),
            self.config.packs.policy(),
        );
        let program = service
            .programs()
            .into_iter()
            .find(|p| p.name == self.program)
            .ok_or_else(|| anyhow::anyhow!("unknown program '{}'", self.program))?;
        let autoclave = self
            .config
            .autoclaves
            .first()
            .map(|a| a.id.clone())
            .ok_or_else(|| anyhow::anyhow!("no autoclave configured"))?;

        let tech = Operator::technician("TECH-001");
        let qc = Operator::quality_control("QC-001");

        // Intake and soak
        let mut ids = Vec::new();
        for n in 1..=self.items {
            let scan = format!("BSK{n:03}");
            let item = service
                .register_item(&scan, Registration::new("Surgery", ContaminationLevel::Medium, 12), &tech)
                .await?;
            service.advance(&item.id, Stage::Soaking, &tech).await?;
            ids.push(item.id);
        }
        clock.advance_minutes(ContaminationLevel::Medium.required_soak_minutes());

        for id in &ids {
            service.advance(id, Stage::Cleaning, &tech).await?;
            service.advance(id, Stage::Packaging, &tech).await?;
            service.record_inspection(id, true, None, &tech).await?;
            service.complete_packaging(id, BASKET_WEIGHT_GRAMS, &tech).await?;
        }
        println!("✅ {} baskets soaked, cleaned, inspected and packaged", ids.len());

        // Sterilization
        let load = service.build_load(&autoclave, &ids, &tech).await?;
        let cycle = service.start_cycle(&load.id, &program.name, &tech).await?;
        println!("🔥 Cycle {} started on {} ({})", cycle.id, autoclave, program.name);

        let (hold_start, _) = program.hold_window();
        let failing_minute = hold_start.num_minutes() + 2;
        let mut failed = false;
        for minute in 0..program.total().num_minutes() {
            let at = cycle.started_at + Duration::minutes(minute);
            clock.set(at);
            let phase = program.phase_at(Duration::minutes(minute));
            let (temperature, pressure) = if self.fail && minute == failing_minute {
                (program.temperature.min - 4.0, program.pressure.min)
            } else if phase == Phase::Sterilization {
                (
                    (program.temperature.min + program.temperature.max) / 2.0,
                    (program.pressure.min + program.pressure.max) / 2.0,
                )
            } else {
                (90.0, 1.0)
            };
            if let SampleOutcome::CycleFailed = service.record_sample(&cycle.id, temperature, pressure, at).await? {
                failed = true;
                break;
            }
        }

        if failed {
            println!("❌ Cycle {} failed during the hold phase", cycle.id);
            let report = FailureReportForm::new(
                FailureReason::TemperatureDeviation,
                "temperature dropped below the hold band",
            );
            service.file_failure_report(&cycle.id, report, &tech).await?;
            println!("📝 Failure report filed, items returned to cleaning");
        } else {
            clock.set(cycle.started_at + program.total());
            service.complete_cycle(&cycle.id, &tech).await?;

            let record = service
                .submit_validation(&cycle.id, Checklist::uniform(true), "all indicators passed", &qc)
                .await?;
            service.sign_release(&record.id, &qc, &record.content_hash).await?;
            println!("✅ Cycle {} validated and released by {}", cycle.id, qc.id);
            if let Some(lot) = service.lot(&lot_id_for(&cycle.id, &ids[0])).await {
                println!("📦 Packs usable until {}", lot.expires_at.format("%Y-%m-%d"));
            }

            let context = ProcedureContext {
                operating_room: "OR-3".to_string(),
                surgeon: "Dr. Laurent".to_string(),
                procedure_date: clock.now().date_naive(),
            };
            let first = &ids[0];
            service
                .link_pack_to_procedure(
                    &lot_id_for(&cycle.id, first),
                    &cycle.id,
                    "PROC-0001",
                    "PAT-0001",
                    context,
                    &tech,
                )
                .await?;
            service.distribute(first, &tech).await?;

            let impact = service.recall_impact(&cycle.id).await;
            println!(
                "🔎 Recall of {} would reach {} lots, {} procedures, {} patients",
                cycle.id,
                impact.lots.len(),
                impact.procedures.len(),
                impact.patients.len()
            );
        }

        let dashboard = service.dashboard().await;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&dashboard)?);
        } else {
            for (stage, count) in dashboard.stage_counts.iter().filter(|(_, c)| **c > 0) {
                println!("   {stage}: {count}");
            }
        }

        let entries = service.journal_entries().await?;
        info!(entries = entries.len(), "Simulation finished");
        if self.config.observability.metrics_enabled {
            service.metrics().log_stats();
        }
        Ok(())
    }
}
