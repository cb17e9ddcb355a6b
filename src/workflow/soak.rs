// Soak timers are recomputed from the record and an explicit "now" on every read.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::types::SoakingRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoakStatus {
    Soaking,
    Ready,
    Overdue,
}

impl std::fmt::Display for SoakStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SoakStatus::Soaking => "soaking",
            SoakStatus::Ready => "ready",
            SoakStatus::Overdue => "overdue",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoakProgress {
    pub item_id: String,
    pub status: SoakStatus,
    pub elapsed_seconds: i64,
    pub remaining_seconds: i64,
    /// 0..=100
    pub percentage: u8,
}

/// Elapsed soak time at `now`, frozen once the soak has ended. Never negative.
fn elapsed(record: &SoakingRecord, now: DateTime<Utc>) -> Duration {
    let until = match record.ended_at {
        Some(ended) if ended < now => ended,
        _ => now,
    };
    let elapsed = until - record.started_at;
    if elapsed < Duration::zero() {
        Duration::zero()
    } else {
        elapsed
    }
}

/// Classify a soak at `now`.
///
/// `soaking` below the required time, `ready` from the required time up to
/// and including 1.1x of it, `overdue` beyond that. Compared in whole
/// milliseconds so the boundaries are exact.
pub fn compute_soak_status(record: &SoakingRecord, now: DateTime<Utc>) -> SoakStatus {
    let elapsed_ms = elapsed(record, now).num_milliseconds() as i128;
    let required_ms = record.required().num_milliseconds() as i128;

    if elapsed_ms < required_ms {
        SoakStatus::Soaking
    } else if elapsed_ms * 10 > required_ms * 11 {
        SoakStatus::Overdue
    } else {
        SoakStatus::Ready
    }
}

pub fn soak_progress(record: &SoakingRecord, now: DateTime<Utc>) -> SoakProgress {
    let elapsed = elapsed(record, now);
    let required = record.required();
    let remaining = (required - elapsed).max(Duration::zero());

    let percentage = if required <= Duration::zero() {
        100
    } else {
        let ratio = elapsed.num_seconds().saturating_mul(100) / required.num_seconds().max(1);
        ratio.clamp(0, 100) as u8
    };

    SoakProgress {
        item_id: record.item_id.clone(),
        status: compute_soak_status(record, now),
        elapsed_seconds: elapsed.num_seconds(),
        remaining_seconds: remaining.num_seconds(),
        percentage,
    }
}
