//! strata-etl - runs tiered ETL over an appliance configuration.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use alopex_strata::config::{ApplianceConfig, StaticConfigService};
use alopex_strata::error::Result;
use alopex_strata::etl::{AdminResponse, EtlExecutor, EtlScheduler};
use alopex_strata::logging::init_logging;
use alopex_strata::time::Timestamp;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

/// Moves aged partitions down each PV's store chain.
#[derive(Parser, Debug)]
#[command(name = "strata-etl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the appliance configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level directive (overrides the config file)
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one pass over every PV
    RunOnce {
        /// Logical time of the pass (ISO-8601, defaults to now)
        #[arg(long)]
        at: Option<String>,
    },
    /// List the partitions of a PV that may migrate
    ListCandidates {
        /// PV name
        #[arg(long)]
        pv: String,
        /// Logical time (ISO-8601, defaults to now)
        #[arg(long)]
        at: Option<String>,
    },
    /// Move the data of every earlier tier of a PV into one store
    Consolidate {
        /// PV name
        #[arg(long)]
        pv: String,
        /// Target store name
        #[arg(long)]
        store: String,
    },
    /// Move all data of a PV from one store directly into another
    Move {
        /// PV name
        #[arg(long)]
        pv: String,
        /// Source store name
        #[arg(long)]
        from: String,
        /// Destination store name
        #[arg(long)]
        to: String,
    },
    /// Run passes at the configured cadence until stdin closes
    Serve,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("strata-etl: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => ApplianceConfig::load(path)?,
        None => ApplianceConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_logging(&config.logging)?;

    let service = Arc::new(StaticConfigService::from_config(&config)?);
    let executor = Arc::new(EtlExecutor::new(service, config.etl.clone()));

    match cli.command {
        Commands::RunOnce { at } => {
            let summary = executor.run_etl(parse_at(at.as_deref())?);
            print_json(&summary)?;
            Ok(exit_code(summary.is_clean()))
        }
        Commands::ListCandidates { pv, at } => {
            let candidates = executor.list_candidates(&pv, parse_at(at.as_deref())?)?;
            let names: Vec<_> = candidates
                .iter()
                .map(|c| (c.source_store.as_str(), c.partition.name.as_str()))
                .collect();
            print_json(&names)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Consolidate { pv, store } => {
            let result = executor.consolidate(&pv, &store, Timestamp::now());
            report(AdminResponse::from((pv.as_str(), &result)))
        }
        Commands::Move { pv, from, to } => {
            let result = executor.move_data(&pv, &from, &to, Timestamp::now());
            report(AdminResponse::from((pv.as_str(), &result)))
        }
        Commands::Serve => serve(executor, config.etl.cadence_secs),
    }
}

fn serve(executor: Arc<EtlExecutor>, cadence_secs: u64) -> Result<ExitCode> {
    let mut scheduler = EtlScheduler::start(executor.clone(), Duration::from_secs(cadence_secs))?;
    info!("Serving; close stdin to stop");
    for line in std::io::stdin().lock().lines() {
        if line?.trim() == "quit" {
            break;
        }
    }
    scheduler.stop();

    let summary = executor.shutdown_consolidation(Timestamp::now());
    if !summary.is_clean() {
        error!("Shutdown consolidation had {} failures", summary.failures.len());
    }
    print_json(&executor.metrics())?;
    Ok(exit_code(summary.is_clean()))
}

fn parse_at(at: Option<&str>) -> Result<Timestamp> {
    match at {
        Some(text) => Timestamp::parse_iso8601(text),
        None => Ok(Timestamp::now()),
    }
}

fn report(response: AdminResponse) -> Result<ExitCode> {
    print_json(&response)?;
    Ok(exit_code(response.is_ok()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
