use crate::{
    commands::Commands,
    env::EnvManager,
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use engine_config::settings::MigrationSettings;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::EnvFilter;

mod app;
mod commands;
mod env;
mod error;
mod shutdown;

#[derive(Parser)]
#[command(name = "trawl", version, about = "Resumable keyset table migration")]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "Load KEY=VALUE pairs from this file before reading settings (repeatable)"
    )]
    env_file: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "trawl failed");
            ExitCode::GeneralError
        }
    };
    std::process::exit(code.as_i32());
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let mut env = EnvManager::from_process();
    for path in &cli.env_file {
        env.load_from_file(path)?;
    }
    let settings = MigrationSettings::from_env(env.all())?;

    match cli.command {
        Commands::Start { run_id, cursor } => {
            let shutdown = ShutdownCoordinator::new(CancellationToken::new());
            shutdown.register_handlers();
            let code = app::start(&settings, &run_id, cursor, &shutdown).await?;
            Ok(exit_code(code, &shutdown))
        }
        Commands::Worker => {
            let shutdown = ShutdownCoordinator::new(CancellationToken::new());
            shutdown.register_handlers();
            app::serve(&settings, &shutdown).await
        }
        Commands::Status { run_id, json } => {
            app::status(&settings, &run_id, json).await?;
            Ok(ExitCode::Success)
        }
        Commands::Cancel { run_id } => {
            app::cancel(&settings, &run_id).await?;
            Ok(ExitCode::Success)
        }
    }
}

/// A run cut short by a signal reports the signal, whatever it was doing.
fn exit_code(code: ExitCode, shutdown: &ShutdownCoordinator) -> ExitCode {
    if code == ExitCode::Success || !shutdown.is_shutdown_requested() {
        code
    } else {
        ExitCode::ShutdownRequested
    }
}
