//! unidb - probe or monitor a configured database.
//!
//! `unidb probe` prints one health report as JSON on stdout and exits with 1
//! when the database is down. `unidb monitor` probes on an interval until
//! Ctrl-C. Logs go to stderr.

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use unidb::{Database, Settings};

#[derive(Debug, Parser)]
#[command(name = "unidb", version, about = "Backend-agnostic database health tool")]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "UNIDB_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "UNIDB_JSON_LOGS", global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one health probe and print it as JSON
    Probe,
    /// Probe periodically until interrupted
    Monitor,
}

/// Initialize the tracing subscriber for logging.
fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

async fn probe(db: &Database) -> Result<bool, Box<dyn std::error::Error>> {
    let status = db.health().await;
    println!("{}", serde_json::to_string(&status)?);
    Ok(status.is_available())
}

async fn monitor(db: &Database) -> Result<bool, Box<dyn std::error::Error>> {
    let mut monitor = db.spawn_health_monitor();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; stopping monitor");
                break;
            }
            status = monitor.next() => match status {
                Some(status) => println!("{}", serde_json::to_string(&status)?),
                None => break,
            },
        }
    }
    monitor.stop();
    Ok(true)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!(
        settings = %cli.settings,
        "Starting unidb v{}",
        env!("CARGO_PKG_VERSION")
    );

    let db = match Database::new(&cli.settings) {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::from(2);
        }
    };

    // A failed init still yields a report: the probe classifies the engine as down.
    if let Err(e) = db.init().await {
        error!(error = %e, suggestion = e.suggestion().unwrap_or(""), "Database initialization failed");
    }

    let result = match cli.command {
        Command::Probe => probe(&db).await,
        Command::Monitor => monitor(&db).await,
    };

    if let Err(e) = db.dispose().await {
        error!(error = %e, "Dispose failed");
    }

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "unidb failed");
            ExitCode::FAILURE
        }
    }
}
