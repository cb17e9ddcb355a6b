use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{CssdError, CssdResult};

/// Closed tolerance band: both bounds are in tolerance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    HeatUp,
    Sterilization,
    Exhaust,
    Drying,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::HeatUp => "heat-up",
            Phase::Sterilization => "sterilization",
            Phase::Exhaust => "exhaust",
            Phase::Drying => "drying",
        };
        f.write_str(name)
    }
}

/// Temperature / pressure / hold-time profile of an autoclave program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleProgram {
    pub name: String,
    /// Degrees Celsius
    pub temperature: Band,
    /// Bar (gauge)
    pub pressure: Band,
    pub heat_up_minutes: u32,
    pub hold_minutes: u32,
    pub exhaust_minutes: u32,
    pub drying_minutes: u32,
}

impl CycleProgram {
    pub fn total(&self) -> Duration {
        Duration::minutes(
            i64::from(self.heat_up_minutes)
                + i64::from(self.hold_minutes)
                + i64::from(self.exhaust_minutes)
                + i64::from(self.drying_minutes),
        )
    }

    /// Hold window as offsets from cycle start, `[start, end)`
    pub fn hold_window(&self) -> (Duration, Duration) {
        let start = Duration::minutes(i64::from(self.heat_up_minutes));
        (start, start + Duration::minutes(i64::from(self.hold_minutes)))
    }

    pub fn phase_at(&self, elapsed: Duration) -> Phase {
        let (hold_start, hold_end) = self.hold_window();
        let exhaust_end = hold_end + Duration::minutes(i64::from(self.exhaust_minutes));

        if elapsed < hold_start {
            Phase::HeatUp
        } else if elapsed < hold_end {
            Phase::Sterilization
        } else if elapsed < exhaust_end || self.drying_minutes == 0 {
            Phase::Exhaust
        } else {
            Phase::Drying
        }
    }

    /// Whole-percent progress, 100 once the full program time has elapsed
    pub fn progress_at(&self, elapsed: Duration) -> u8 {
        let total = self.total().num_seconds();
        if total <= 0 {
            return 100;
        }
        let elapsed = elapsed.num_seconds().max(0);
        (elapsed.saturating_mul(100) / total).min(100) as u8
    }

    pub fn in_tolerance(&self, temperature: f64, pressure: f64) -> bool {
        self.temperature.contains(temperature) && self.pressure.contains(pressure)
    }

    pub fn validate(&self) -> CssdResult<()> {
        if self.name.trim().is_empty() {
            return Err(CssdError::validation("program.name", "must not be empty"));
        }
        for (field, band) in [("temperature", self.temperature), ("pressure", self.pressure)] {
            if !band.min.is_finite() || !band.max.is_finite() || band.min > band.max {
                return Err(CssdError::validation(
                    field,
                    format!("program {} has an inverted or non-finite band", self.name),
                ));
            }
        }
        if self.hold_minutes == 0 {
            return Err(CssdError::validation(
                "hold_minutes",
                format!("program {} needs a non-zero hold", self.name),
            ));
        }
        Ok(())
    }
}

/// Programs available on every autoclave unless configured otherwise
pub fn standard_programs() -> Vec<CycleProgram> {
    vec![
        CycleProgram {
            name: "standard-134".to_string(),
            temperature: Band::new(134.0, 137.0),
            pressure: Band::new(2.0, 2.3),
            heat_up_minutes: 10,
            hold_minutes: 18,
            exhaust_minutes: 5,
            drying_minutes: 15,
        },
        CycleProgram {
            name: "prion-134".to_string(),
            temperature: Band::new(134.0, 137.0),
            pressure: Band::new(2.0, 2.3),
            heat_up_minutes: 10,
            hold_minutes: 18,
            exhaust_minutes: 5,
            drying_minutes: 20,
        },
        CycleProgram {
            name: "flash-132".to_string(),
            temperature: Band::new(132.0, 135.0),
            pressure: Band::new(1.8, 2.1),
            heat_up_minutes: 5,
            hold_minutes: 4,
            exhaust_minutes: 3,
            drying_minutes: 0,
        },
        CycleProgram {
            name: "textile-121".to_string(),
            temperature: Band::new(121.0, 124.0),
            pressure: Band::new(1.0, 1.3),
            heat_up_minutes: 8,
            hold_minutes: 15,
            exhaust_minutes: 5,
            drying_minutes: 20,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard() -> CycleProgram {
        standard_programs().remove(0)
    }

    #[test]
    fn test_band_is_closed() {
        let band = Band::new(134.0, 137.0);
        assert!(band.contains(134.0));
        assert!(band.contains(137.0));
        assert!(!band.contains(133.9));
        assert!(!band.contains(f64::NAN));
    }

    #[test]
    fn test_phases_follow_elapsed_time() {
        let program = standard();
        assert_eq!(program.phase_at(Duration::minutes(0)), Phase::HeatUp);
        assert_eq!(program.phase_at(Duration::minutes(10)), Phase::Sterilization);
        assert_eq!(program.phase_at(Duration::minutes(27)), Phase::Sterilization);
        assert_eq!(program.phase_at(Duration::minutes(28)), Phase::Exhaust);
        assert_eq!(program.phase_at(Duration::minutes(33)), Phase::Drying);
        assert_eq!(program.phase_at(Duration::minutes(120)), Phase::Drying);
    }

    #[test]
    fn test_progress_caps_at_100() {
        let program = standard();
        assert_eq!(program.progress_at(Duration::zero()), 0);
        assert_eq!(program.progress_at(Duration::minutes(24)), 50);
        assert_eq!(program.progress_at(Duration::minutes(48)), 100);
        assert_eq!(program.progress_at(Duration::minutes(90)), 100);
    }

    #[test]
    fn test_flash_program_has_no_drying() {
        let flash = standard_programs().remove(2);
        assert_eq!(flash.phase_at(Duration::minutes(11)), Phase::Exhaust);
        assert_eq!(flash.phase_at(Duration::minutes(30)), Phase::Exhaust);
    }

    #[test]
    fn test_validate_rejects_inverted_band() {
        let mut program = standard();
        program.temperature = Band::new(137.0, 134.0);
        assert!(program.validate().is_err());
        assert!(standard().validate().is_ok());
    }
}
