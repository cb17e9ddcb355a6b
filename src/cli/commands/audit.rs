use anyhow::Result;
use std::path::PathBuf;

use super::Command;
use crate::journal::{AuditJournal, JsonlJournal};
use crate::scan::normalize_token;

pub struct AuditCommand {
    pub journal: PathBuf,
    pub entity: Option<String>,
    pub json: bool,
}

impl Command for AuditCommand {
    async fn execute(&self) -> Result<()> {
        let journal = JsonlJournal::new(&self.journal);
        let entries = journal.entries().await?;
        let wanted = self.entity.as_deref().map(normalize_token);

        let mut shown = 0;
        for entry in entries
            .iter()
            .filter(|e| wanted.as_deref().map_or(true, |id| e.entity.id().eq_ignore_ascii_case(id)))
        {
            shown += 1;
            if self.json {
                println!("{}", serde_json::to_string(entry)?);
                continue;
            }
            let event = serde_json::to_value(&entry.event)?;
            let kind = event.get("type").and_then(|t| t.as_str()).unwrap_or("event");
            println!(
                "#{:<5} {} {:<28} {:<24} {}",
                entry.sequence,
                entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                entry.entity.to_string(),
                kind,
                entry.actor.as_deref().unwrap_or("system"),
            );
        }

        if !self.json {
            println!("{shown} entries from {}", journal.path().display());
        }
        Ok(())
    }
}
