use anyhow::{bail, Result};
use std::path::Path;

use super::Command;
use crate::config::CssdConfig;

pub struct ConfigCommand {
    pub config: CssdConfig,
    pub init: bool,
    pub force: bool,
}

impl Command for ConfigCommand {
    async fn execute(&self) -> Result<()> {
        if !self.init {
            print!("{}", toml::to_string_pretty(&self.config)?);
            return Ok(());
        }

        let path = Path::new("cssd.toml");
        if path.exists() && !self.force {
            bail!("cssd.toml already exists (use --force to overwrite)");
        }
        self.config.save_to_file(path)?;
        println!("✅ Wrote {}", path.display());
        Ok(())
    }
}
