use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "cssd")]
#[command(about = "Sterile supply traceability: items, sterilization cycles, release and patient linkage")]
#[command(long_about = "cssd tracks reusable surgical instruments from contaminated intake through \
                       soaking, cleaning, sterilization, validation and release, and links every \
                       released pack to the procedures it was used in. Try 'cssd simulate' for a \
                       full cycle on the built-in autoclaves.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify a scanned barcode token
    Classify {
        /// Raw token as read by the scanner
        token: String,
    },
    /// Compute soak progress for a contamination level and start time
    SoakStatus {
        /// Contamination level: standard, medium or high
        #[arg(long)]
        level: String,
        /// Soak start (RFC 3339)
        #[arg(long)]
        started: String,
        /// Evaluation instant (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<String>,
    },
    /// List configured sterilization programs
    Programs,
    /// Run a scripted workflow from registration to patient linkage
    Simulate {
        /// Number of baskets to process
        #[arg(long, default_value = "3", help = "Number of baskets to register (1-20)")]
        items: u32,
        /// Cycle program to run
        #[arg(long, default_value = "standard-134")]
        program: String,
        /// Inject an out-of-band sample during the hold phase
        #[arg(long, help = "Fail the cycle with a temperature drop during the hold phase")]
        fail: bool,
        /// Append the audit trail to this JSON-lines file instead of memory
        #[arg(long)]
        journal: Option<PathBuf>,
        /// Print the final dashboard as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print audit journal entries
    Audit {
        /// Journal file, defaults to the configured path
        #[arg(long)]
        journal: Option<PathBuf>,
        /// Only entries for this entity id
        #[arg(long)]
        entity: Option<String>,
        /// Print raw JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Show or write the effective configuration
    Config {
        /// Write the effective configuration to cssd.toml
        #[arg(long)]
        init: bool,
        /// Overwrite an existing cssd.toml
        #[arg(long)]
        force: bool,
    },
}
