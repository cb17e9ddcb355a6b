use anyhow::Result;

use super::Command;
use crate::cycle::CycleProgram;

pub struct ProgramsCommand {
    pub programs: Vec<CycleProgram>,
}

impl Command for ProgramsCommand {
    async fn execute(&self) -> Result<()> {
        println!(
            "{:<14} {:>13} {:>11} {:>7} {:>5} {:>8} {:>7} {:>6}",
            "PROGRAM", "TEMP (C)", "PRESS (bar)", "HEAT-UP", "HOLD", "EXHAUST", "DRYING", "TOTAL"
        );
        for program in &self.programs {
            println!(
                "{:<14} {:>6.1}-{:<6.1} {:>5.2}-{:<5.2} {:>7} {:>5} {:>8} {:>7} {:>6}",
                program.name,
                program.temperature.min,
                program.temperature.max,
                program.pressure.min,
                program.pressure.max,
                program.heat_up_minutes,
                program.hold_minutes,
                program.exhaust_minutes,
                program.drying_minutes,
                program.total().num_minutes(),
            );
        }
        Ok(())
    }
}
