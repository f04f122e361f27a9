use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sea_orm::DatabaseConnection;
use tracing::{error, info, warn};

use pdfharvest::config::load_effective_config;
use pdfharvest::db::{self, health, migrations, stats_repo};
use pdfharvest::telemetry::{init_tracing, LogFormat};
use pdfharvest::{
    BatchDriver, Config, DocumentQueue, HarvestError, QueueSettings, QueueTable, StopReason,
};

#[derive(Parser, Debug)]
#[command(
    name = "pdfharvest",
    version,
    about = "Download, validate and text-extract queued PDF documents"
)]
struct Cli {
    /// JSON config file; defaults and environment variables apply without it
    #[arg(long, global = true, env = "PDFHARVEST_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process the queue until it is drained or a limit is hit
    Run {
        #[arg(long)]
        max_batches: Option<u64>,
        #[arg(long)]
        max_runtime_secs: Option<u64>,
    },
    /// Check database connectivity
    Healthcheck,
    /// Print queue statistics
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Create the queue table and its lease columns and indexes if missing
    Migrate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_format) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let mut config = match load_effective_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::from(2);
        }
    };

    if let Command::Run {
        max_batches,
        max_runtime_secs,
    } = &cli.command
    {
        if max_batches.is_some() {
            config.worker.max_batches = *max_batches;
        }
        if max_runtime_secs.is_some() {
            config.worker.max_runtime_secs = *max_runtime_secs;
        }
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(dispatch(cli.command, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(HarvestError::Config(e)) => {
            error!(error = %e, "Invalid configuration");
            ExitCode::from(2)
        }
        Err(HarvestError::Secret(e)) => {
            error!(error = %e, "No usable database URL");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Command, config: Config) -> Result<(), HarvestError> {
    match command {
        Command::Run { .. } => run(config).await,
        Command::Healthcheck => {
            let conn = open(&config).await?;
            let report = health::check(&conn).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report).unwrap_or_else(|_| format!("{:?}", report))
            );
            Ok(())
        }
        Command::Stats { json } => {
            let conn = open(&config).await?;
            let table = QueueTable::parse(&config.queue.table)?;
            let report = stats_repo::report(&conn, &table).await?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report)
                        .unwrap_or_else(|_| format!("{:?}", report))
                );
            } else {
                println!("{}", report);
            }
            Ok(())
        }
        Command::Migrate => {
            let conn = open(&config).await?;
            let table = QueueTable::parse(&config.queue.table)?;
            migrations::run_all(&conn, &table).await?;
            info!(table = %table, "Queue table is up to date");
            Ok(())
        }
    }
}

async fn open(config: &Config) -> Result<DatabaseConnection, HarvestError> {
    let url = config.database.resolve_url()?;
    Ok(db::connect(&url, config).await?)
}

async fn run(config: Config) -> Result<(), HarvestError> {
    let table = QueueTable::parse(&config.queue.table)?;
    let conn = open(&config).await?;
    let queue = DocumentQueue::new(conn, table, QueueSettings::from_config(&config.queue));
    info!(table = %queue.table(), claim_token = queue.claim_token(), "Worker ready");

    let driver = BatchDriver::from_config(Arc::new(queue), &config)?;
    let flag = driver.shutdown_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            // second signal
            std::process::exit(130);
        }
    }) {
        warn!(error = %e, "Could not install Ctrl-C handler");
    }

    let summary = driver.run().await?;
    if summary.stop_reason == StopReason::ShutdownRequested {
        warn!("Stopped on shutdown request");
    }
    println!("{}", summary);
    Ok(())
}
