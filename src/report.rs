// Read-only views for the dashboard and export collaborators. Everything here
// is computed from cloned state and the caller's "now".

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::cycle::{Autoclave, Cycle, CycleSnapshot, CycleStatus};
use crate::traceability::PackExpiry;
use crate::validation::ValidationRecord;
use crate::workflow::{soak_progress, Item, SoakProgress, Stage};

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub stage_counts: BTreeMap<Stage, usize>,
    /// Items currently soaking, most urgent status first
    pub active_soaks: Vec<SoakProgress>,
    pub urgent_items: Vec<String>,
    pub running_cycles: Vec<CycleSnapshot>,
    pub awaiting_validation: Vec<CycleSnapshot>,
    /// Approved validation records without a signature
    pub awaiting_signature: Vec<String>,
    pub awaiting_failure_report: Vec<CycleSnapshot>,
    pub autoclaves: Vec<Autoclave>,
    /// Unused packs inside the expiry warning window, expired ones included
    pub expiring_packs: Vec<PackExpiry>,
    pub compliance: ComplianceSummary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ComplianceSummary {
    pub cycles_total: usize,
    pub cycles_validated: usize,
    pub cycles_rejected: usize,
    pub cycles_failed: usize,
    pub traceability_links: usize,
}

impl ComplianceSummary {
    /// Share of finished cycles that were released, as a percentage
    pub fn release_rate(&self) -> f64 {
        let finished = self.cycles_validated + self.cycles_rejected + self.cycles_failed;
        if finished == 0 {
            return 0.0;
        }
        self.cycles_validated as f64 * 100.0 / finished as f64
    }
}

pub fn build_dashboard(
    items: &[Item],
    cycles: &[Cycle],
    records: &[ValidationRecord],
    autoclaves: Vec<Autoclave>,
    expiring_packs: Vec<PackExpiry>,
    traceability_links: usize,
    now: DateTime<Utc>,
) -> DashboardSnapshot {
    let mut stage_counts: BTreeMap<Stage, usize> = Stage::ALL.iter().map(|s| (*s, 0)).collect();
    for item in items {
        *stage_counts.entry(item.stage).or_default() += 1;
    }

    let mut active_soaks: Vec<SoakProgress> = items
        .iter()
        .filter(|item| item.stage == Stage::Soaking)
        .map(|item| soak_progress(&item.soak, now))
        .collect();
    active_soaks.sort_by(|a, b| b.status.cmp(&a.status).then_with(|| a.item_id.cmp(&b.item_id)));

    let urgent_items = items
        .iter()
        .filter(|item| item.urgent && !item.stage.is_terminal())
        .map(|item| item.id.clone())
        .collect();

    let snapshots_with = |wanted: fn(&Cycle) -> bool| -> Vec<CycleSnapshot> {
        cycles.iter().filter(|c| wanted(c)).map(|c| c.snapshot(now)).collect()
    };

    let compliance = ComplianceSummary {
        cycles_total: cycles.len(),
        cycles_validated: count_status(cycles, CycleStatus::Validated),
        cycles_rejected: count_status(cycles, CycleStatus::Rejected),
        cycles_failed: count_status(cycles, CycleStatus::Failed),
        traceability_links,
    };

    DashboardSnapshot {
        generated_at: now,
        stage_counts,
        active_soaks,
        urgent_items,
        running_cycles: snapshots_with(|c| c.status == CycleStatus::Running),
        awaiting_validation: snapshots_with(|c| c.status == CycleStatus::PendingValidation),
        awaiting_signature: records
            .iter()
            .filter(|r| r.awaiting_signature())
            .map(|r| r.id.clone())
            .collect(),
        awaiting_failure_report: snapshots_with(|c| c.status == CycleStatus::Failed && c.failure_report.is_none()),
        autoclaves,
        expiring_packs,
        compliance,
    }
}

fn count_status(cycles: &[Cycle], status: CycleStatus) -> usize {
    cycles.iter().filter(|c| c.status == status).count()
}
