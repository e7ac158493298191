mod cli;

use std::process::{self, ExitCode};

use anyhow::Context;
use chrono::Local;
use clap::{CommandFactory, Parser};
use cli::commands::{Cli, Commands, SyncArgs};
use cli::logging;
use cli::progress::CliReporter;
use colored::*;
use dotenv::dotenv;
use tag_sync::config::load_configuration;
use tag_sync::report::ItemClass;
use tag_sync::{AppConfig, SyncEngine, SyncRun};
use tracing::{error, info, warn};

const EXIT_FAILURE: u8 = 1;
const EXIT_INTERRUPTED: i32 = 130;

fn main() -> ExitCode {
    dotenv().ok();

    let args = Cli::parse();
    let level = match &args.command {
        Some(Commands::Sync(sync)) => sync.log_level.clone(),
        _ => None,
    };
    let _guard = logging::init_logger(level.as_deref());

    if let Err(err) = ctrlc::set_handler(|| {
        eprintln!();
        warn!("Interrupted; stopping");
        process::exit(EXIT_INTERRUPTED);
    }) {
        warn!("Could not install the Ctrl-C handler: {}", err);
    }

    match run(args) {
        Ok(code) => code,
        Err(err) => {
            error!("Error: {:#}", err);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run(args: Cli) -> anyhow::Result<ExitCode> {
    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return Ok(ExitCode::SUCCESS);
    };

    let config = load_configuration(args.config.as_deref()).context("loading configuration")?;

    match command {
        Commands::Sync(sync) => run_sync(config, &sync),
        Commands::Check => run_check(config),
        Commands::PrintConfig => {
            let rendered = toml::to_string_pretty(&config.redacted())
                .context("rendering configuration")?;
            println!("{}", rendered);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_sync(config: AppConfig, args: &SyncArgs) -> anyhow::Result<ExitCode> {
    if args.dry_run {
        info!("{}", "Dry run: no sidecar or server changes will be made".yellow());
    }
    let engine = SyncEngine::new(config).with_dry_run(args.dry_run);
    let reporter = CliReporter::new();
    let run = engine.sync(&reporter)?;

    print_summary(&run);

    if let Some(err) = &run.error {
        error!("Sync failed: {}", err);
    }
    if run.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_FAILURE))
    }
}

fn print_summary(run: &SyncRun) {
    let report = &run.report;
    let outcome = &report.outcome;

    println!();
    report.log_summary();

    if let Some(plan) = &report.plan {
        info!(
            "Plan: {} to create, {} to update, {} unchanged, {} skipped",
            format!("{}", plan.create).green(),
            format!("{}", plan.update).yellow(),
            format!("{}", plan.unchanged).cyan(),
            format!("{}", plan.skip).cyan(),
        );
    } else {
        info!(
            "{} created, {} updated, {} unchanged, {} failed",
            format!("{}", report.count(ItemClass::Created)).green(),
            format!("{}", report.count(ItemClass::Updated)).green(),
            format!("{}", report.count(ItemClass::Unchanged)).cyan(),
            format!("{}", outcome.failed).red(),
        );
    }
    if report.items_refreshed > 0 {
        info!(
            "{} items refreshed on the server",
            format!("{}", report.items_refreshed).cyan()
        );
    }

    let state = format!("{:?}", run.final_state);
    let state = if run.is_success() {
        state.green()
    } else {
        state.red()
    };
    info!(
        "Finished as {} at {} ({})",
        state,
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        format!("{:.2}s", report.duration.as_secs_f64()).green(),
    );
}

fn run_check(config: AppConfig) -> anyhow::Result<ExitCode> {
    let engine = SyncEngine::new(config);
    let result = engine.check()?;

    info!(
        "Server: {} {}",
        result.server.name.green(),
        result.server.version
    );
    info!(
        "Library: {} media files, {} tagged, {} unreadable",
        format!("{}", result.items).green(),
        format!("{}", result.tagged).green(),
        format!("{}", result.unreadable).red(),
    );
    println!("{}", "Configuration OK".green());
    Ok(ExitCode::SUCCESS)
}
