use std::env;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use swarmflow::config::{Cli, Command, Config};
use swarmflow::shutdown;

mod commands;

use commands::{
    cmd_add_task, cmd_cleanup, cmd_merge, cmd_promote, cmd_setup, cmd_status, cmd_verify, Workspace,
};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.command == Command::InitConfig {
        print!("{}", Config::default_toml());
        return Ok(());
    }

    let project = match cli.project {
        Some(path) => path,
        None => env::current_dir().context("failed to read current directory")?,
    };
    let config = Config::load(&project, &cli.overrides)?;
    init_tracing(&config.log_level);

    if let Err(e) = shutdown::register_handler() {
        warn!(error = %e, "failed to register Ctrl+C handler");
    }

    let ws = Workspace::open(project, config);
    match cli.command {
        Command::Setup { task, workers } => cmd_setup(&ws, &task, workers),
        Command::AddTask {
            title,
            test,
            depends_on,
            worker,
        } => cmd_add_task(&ws, &title, test.as_deref(), &depends_on, worker),
        Command::Verify { task_id } => cmd_verify(&ws, &task_id),
        Command::Merge { task_id, message } => cmd_merge(&ws, &task_id, message.as_deref()),
        Command::Promote { reject } => cmd_promote(&ws, &reject),
        Command::Cleanup { keep_branches } => cmd_cleanup(&ws, keep_branches),
        Command::Status { json } => cmd_status(&ws, json),
        Command::InitConfig => Ok(()),
    }
}

/// Log to stderr so command output stays clean on stdout.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
