use anyhow::Result;
use clap::Parser;

use cssd_trace::cli::commands::{
    audit::AuditCommand, classify::ClassifyCommand, config::ConfigCommand, programs::ProgramsCommand,
    simulate::SimulateCommand, soak_status::SoakStatusCommand, Command,
};
use cssd_trace::cli::{Cli, Commands};
use cssd_trace::{config, init_config, init_telemetry, shutdown_telemetry};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config()?;

    // a subscriber installed by the host process is fine
    if let Err(e) = init_telemetry(&config.observability) {
        eprintln!("telemetry not initialized: {e}");
    }
    init_config()?;

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async move {
        match cli.command {
            None => {
                println!("cssd: sterile supply traceability core");
                println!("Run 'cssd --help' for commands, or 'cssd simulate' for a full cycle.");
                Ok(())
            }
            Some(Commands::Classify { token }) => ClassifyCommand::new(token).execute().await,
            Some(Commands::SoakStatus { level, started, at }) => {
                SoakStatusCommand { level, started, at }.execute().await
            }
            Some(Commands::Programs) => {
                ProgramsCommand {
                    programs: config.programs.clone(),
                }
                .execute()
                .await
            }
            Some(Commands::Simulate {
                items,
                program,
                fail,
                journal,
                json,
            }) => {
                SimulateCommand {
                    config: config.clone(),
                    items,
                    program,
                    fail,
                    journal,
                    json,
                }
                .execute()
                .await
            }
            Some(Commands::Audit { journal, entity, json }) => {
                AuditCommand {
                    journal: journal.unwrap_or_else(|| config.journal.path.clone().into()),
                    entity,
                    json,
                }
                .execute()
                .await
            }
            Some(Commands::Config { init, force }) => {
                ConfigCommand {
                    config: config.clone(),
                    init,
                    force,
                }
                .execute()
                .await
            }
        }
    });

    shutdown_telemetry();
    result
}
