use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// Operation counters for one service instance
#[derive(Debug, Default)]
pub struct CssdMetrics {
    pub items_registered: AtomicU64,
    pub stage_transitions: AtomicU64,
    pub emergency_overrides: AtomicU64,
    pub loads_built: AtomicU64,
    pub cycles_started: AtomicU64,
    pub cycles_completed: AtomicU64,
    pub cycles_failed: AtomicU64,
    pub loads_rejected: AtomicU64,
    pub releases_signed: AtomicU64,
    pub links_recorded: AtomicU64,
    pub refused: AtomicU64,
}

impl CssdMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_registration(&self) {
        self.items_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transition(&self) {
        self.stage_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_override(&self) {
        self.emergency_overrides.fetch_add(1, Ordering::Relaxed);
        warn!("Emergency soak override used");
    }

    pub fn record_load(&self) {
        self.loads_built.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_started(&self) {
        self.cycles_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_completed(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_failed(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.loads_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_release(&self) {
        self.releases_signed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_link(&self) {
        self.links_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refused(&self) {
        self.refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> CssdStats {
        CssdStats {
            items_registered: self.items_registered.load(Ordering::Relaxed),
            stage_transitions: self.stage_transitions.load(Ordering::Relaxed),
            emergency_overrides: self.emergency_overrides.load(Ordering::Relaxed),
            loads_built: self.loads_built.load(Ordering::Relaxed),
            cycles_started: self.cycles_started.load(Ordering::Relaxed),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            loads_rejected: self.loads_rejected.load(Ordering::Relaxed),
            releases_signed: self.releases_signed.load(Ordering::Relaxed),
            links_recorded: self.links_recorded.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            items_registered = stats.items_registered,
            stage_transitions = stats.stage_transitions,
            emergency_overrides = stats.emergency_overrides,
            cycles_started = stats.cycles_started,
            cycles_failed = stats.cycles_failed,
            releases_signed = stats.releases_signed,
            links_recorded = stats.links_recorded,
            refused = stats.refused,
            "CSSD operation metrics"
        );
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CssdStats {
    pub items_registered: u64,
    pub stage_transitions: u64,
    pub emergency_overrides: u64,
    pub loads_built: u64,
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub loads_rejected: u64,
    pub releases_signed: u64,
    pub links_recorded: u64,
    pub refused: u64,
}

/// Logs how long an operation took once finished
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        info!(
            operation = self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }

    pub fn finish_refused(self, kind: &str) {
        let duration = self.start.elapsed();
        warn!(
            operation = self.operation,
            duration_ms = duration.as_millis() as u64,
            error.kind = kind,
            "Operation refused"
        );
    }
}
