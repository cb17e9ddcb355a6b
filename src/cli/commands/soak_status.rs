use anyhow::Result;
use chrono::Utc;

use super::{parse_instant, Command};
use crate::workflow::{soak_progress, ContaminationLevel, SoakingRecord};

pub struct SoakStatusCommand {
    pub level: String,
    pub started: String,
    pub at: Option<String>,
}

impl Command for SoakStatusCommand {
    async fn execute(&self) -> Result<()> {
        let level: ContaminationLevel = self.level.parse()?;
        let started_at = parse_instant("started", &self.started)?;
        let now = match &self.at {
            Some(at) => parse_instant("at", at)?,
            None => Utc::now(),
        };

        let record = SoakingRecord::open("-", level, started_at);
        let progress = soak_progress(&record, now);

        println!("level:     {} ({} min)", level, level.required_soak_minutes());
        println!("status:    {}", progress.status);
        println!("elapsed:   {}", format_seconds(progress.elapsed_seconds));
        println!("remaining: {}", format_seconds(progress.remaining_seconds));
        println!("progress:  {}%", progress.percentage);
        Ok(())
    }
}

fn format_seconds(seconds: i64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(0), "00:00");
        assert_eq!(format_seconds(3661), "61:01");
    }
}
