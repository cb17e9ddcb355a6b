use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::cycle::{standard_programs, Autoclave, CycleProgram};
use crate::error::{CssdError, CssdResult};
use crate::traceability::PackPolicy;

/// Main configuration structure for the CSSD core
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CssdConfig {
    /// Audit journal settings
    pub journal: JournalConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
    /// Sterile pack shelf life
    #[serde(default)]
    pub packs: PacksConfig,
    /// Autoclaves available to the engine
    pub autoclaves: Vec<AutoclaveConfig>,
    /// Cycle programs offered on every autoclave
    pub programs: Vec<CycleProgram>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JournalConfig {
    /// JSON-lines file the audit trail is appended to
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Default filter when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON lines instead of human-readable logs
    pub json: bool,
    /// Log operation counters when the process exits
    pub metrics_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PacksConfig {
    /// Days a released pack stays usable
    pub shelf_life_days: u32,
    /// Unused packs this close to expiry are flagged on the dashboard
    pub expiry_warning_days: u32,
}

impl Default for PacksConfig {
    fn default() -> Self {
        Self {
            shelf_life_days: 180,
            expiry_warning_days: 30,
        }
    }
}

impl PacksConfig {
    pub fn policy(&self) -> PackPolicy {
        PackPolicy {
            shelf_life: chrono::Duration::days(i64::from(self.shelf_life_days)),
            expiry_warning: chrono::Duration::days(i64::from(self.expiry_warning_days)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AutoclaveConfig {
    pub id: String,
    /// Maximum load weight in grams
    pub capacity_grams: u64,
}

impl Default for CssdConfig {
    fn default() -> Self {
        Self {
            journal: JournalConfig {
                path: ".cssd/journal.jsonl".to_string(),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json: false,
                metrics_enabled: true,
            },
            autoclaves: ["AC-001", "AC-002", "AC-003"]
                .into_iter()
                .map(|id| AutoclaveConfig {
                    id: id.to_string(),
                    capacity_grams: 50_000, // 50 kg chamber
                })
                .collect(),
            packs: PacksConfig::default(),
            programs: standard_programs(),
        }
    }
}

impl CssdConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (cssd.toml, .cssd-rc)
    /// 3. Environment variables (CSSD_ prefix, `__` between nested keys)
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&CssdConfig::default())?);

        if Path::new("cssd.toml").exists() {
            builder = builder.add_source(File::with_name("cssd.toml"));
        }

        if Path::new(".cssd-rc").exists() {
            builder = builder.add_source(File::new(".cssd-rc", config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("CSSD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let cssd_config: CssdConfig = builder.build()?.try_deserialize()?;
        cssd_config.validate()?;
        Ok(cssd_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }

    pub fn validate(&self) -> CssdResult<()> {
        if self.autoclaves.is_empty() {
            return Err(CssdError::validation("autoclaves", "at least one autoclave is required"));
        }

        let mut seen = HashSet::new();
        for autoclave in &self.autoclaves {
            if autoclave.id.trim().is_empty() {
                return Err(CssdError::validation("autoclaves.id", "must not be empty"));
            }
            if !seen.insert(autoclave.id.as_str()) {
                return Err(CssdError::validation(
                    "autoclaves.id",
                    format!("duplicate autoclave {}", autoclave.id),
                ));
            }
            if autoclave.capacity_grams == 0 {
                return Err(CssdError::validation(
                    "autoclaves.capacity_grams",
                    format!("autoclave {} needs a positive capacity", autoclave.id),
                ));
            }
        }

        if self.packs.shelf_life_days == 0 {
            return Err(CssdError::validation("packs.shelf_life_days", "must be positive"));
        }
        if self.packs.expiry_warning_days >= self.packs.shelf_life_days {
            return Err(CssdError::validation(
                "packs.expiry_warning_days",
                "warning window must be shorter than the shelf life",
            ));
        }

        let mut names = HashSet::new();
        for program in &self.programs {
            program.validate()?;
            if !names.insert(program.name.as_str()) {
                return Err(CssdError::validation(
                    "programs.name",
                    format!("duplicate program {}", program.name),
                ));
            }
        }
        Ok(())
    }

    pub fn build_autoclaves(&self) -> Vec<Autoclave> {
        self.autoclaves
            .iter()
            .map(|a| Autoclave::new(a.id.clone(), a.capacity_grams))
            .collect()
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<CssdConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = CssdConfig::load_env_file();
        CssdConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static CssdConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let config = config()?;
    tracing::info!(
        autoclaves = config.autoclaves.len(),
        programs = config.programs.len(),
        journal = %config.journal.path,
        "Configuration loaded successfully"
    );
    Ok(())
}
