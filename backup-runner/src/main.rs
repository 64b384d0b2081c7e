//! backup-runner - Main entry point

use anyhow::{bail, Context, Result};
use backup_runner::{
    config::Config,
    executor::BackupExecutor,
    systemd::{self, RunAs},
    utils,
};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Comma separated target names, or "all"
    #[arg(short, long, value_delimiter = ',', value_name = "NAMES")]
    targets: Vec<String>,

    /// Back up the selected targets now
    #[arg(short, long)]
    backup: bool,

    /// Write systemd units for the selected targets into DIR
    #[arg(long, value_name = "DIR")]
    install: Option<PathBuf>,

    /// User the generated services run as
    #[arg(long, value_name = "USER", requires = "install")]
    run_as: Option<String>,

    /// Remove previously generated units from DIR before writing new ones
    #[arg(long, requires = "install")]
    clean: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref()).context("Unable to load configuration")?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting backup-runner v{}", env!("CARGO_PKG_VERSION"));

    if !args.backup && args.install.is_none() {
        bail!("Nothing to do, pass --backup and/or --install");
    }

    let targets = config.resolve_targets(&args.targets)?;

    if let Some(dir) = &args.install {
        let run_as = args.run_as.as_deref().map(RunAs::lookup).transpose()?;
        let exe = std::env::current_exe().context("Unable to locate the backup-runner binary")?;

        if args.clean {
            let removed = systemd::clean_units(dir)
                .with_context(|| format!("Unable to clean unit files in {}", dir.display()))?;
            tracing::info!("Removed {} stale unit file(s)", removed.len());
        }

        let units = systemd::generate_units(&config, &targets, &exe, run_as.as_ref());
        let written = systemd::write_units(dir, &units)
            .with_context(|| format!("Unable to write unit files to {}", dir.display()))?;
        tracing::info!(
            "Wrote {} unit file(s), run \"systemctl daemon-reload\" and enable the timers",
            written.len()
        );
    }

    if !args.backup {
        return Ok(ExitCode::SUCCESS);
    }

    let executor = BackupExecutor::new(config)?;
    let summary = executor
        .run(&targets)
        .await
        .context("Backup run aborted, the backup list could not be updated")?;

    if summary.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!("{} target(s) failed", summary.failed_count());
        Ok(ExitCode::FAILURE)
    }
}
