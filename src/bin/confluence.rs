//! Confluence CLI - Command-line interface for Confluence
//!
//! Commands:
//! - sync: Synchronize action log, affect predictions and coded observations
//! - link: Link coded observations to session logs only
//! - config: Print the default configuration

use clap::{Parser, Subcommand};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use confluence::{
    link_files, synchronize_files, SyncConfig, SyncError, SyncInputs, CONFLUENCE_VERSION,
};

/// Confluence - per-student timeline synchronization
#[derive(Parser)]
#[command(name = "confluence")]
#[command(version = CONFLUENCE_VERSION)]
#[command(about = "Synchronize action logs, affect predictions and classroom observations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize the three streams into one merged CSV
    Sync {
        /// Action log CSV
        #[arg(long)]
        actions: PathBuf,

        /// Affect prediction CSV
        #[arg(long)]
        affect: PathBuf,

        /// Directory of observation session logs
        #[arg(long)]
        session_logs: PathBuf,

        /// Coded observation CSV
        #[arg(long)]
        codes: PathBuf,

        /// Merged output CSV
        #[arg(short, long)]
        output: PathBuf,

        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the affect matching tolerance (ms)
        #[arg(long)]
        tolerance_ms: Option<i64>,

        /// Override the observation clock correction (ms)
        #[arg(long, allow_hyphen_values = true)]
        observation_offset_ms: Option<i64>,

        /// Worker threads (defaults to one per core)
        #[arg(long)]
        workers: Option<usize>,

        /// Write the coverage report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Print the coverage report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Link coded observations to session logs and write the linked stream
    Link {
        /// Directory of observation session logs
        #[arg(long)]
        session_logs: PathBuf,

        /// Coded observation CSV
        #[arg(long)]
        codes: PathBuf,

        /// Linked observation CSV
        #[arg(short, long)]
        output: PathBuf,

        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the default configuration as TOML
    Config,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "confluence=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), ConfluenceCliError> {
    match cli.command {
        Commands::Sync {
            actions,
            affect,
            session_logs,
            codes,
            output,
            config,
            tolerance_ms,
            observation_offset_ms,
            workers,
            report,
            json,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(tolerance_ms) = tolerance_ms {
                config.window.tolerance_ms = tolerance_ms;
            }
            if let Some(offset) = observation_offset_ms {
                config.window.observation_offset_ms = offset;
            }
            if workers.is_some() {
                config.workers = workers;
            }

            let inputs = SyncInputs {
                actions,
                affect,
                session_logs,
                codes,
            };
            cmd_sync(&inputs, &output, &config, report.as_deref(), json)
        }

        Commands::Link {
            session_logs,
            codes,
            output,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            cmd_link(&session_logs, &codes, &output, &config)
        }

        Commands::Config => {
            print!("{}", SyncConfig::default().to_toml()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SyncConfig, ConfluenceCliError> {
    match path {
        Some(path) => Ok(SyncConfig::load(path)?),
        None => Ok(SyncConfig::default()),
    }
}

fn cmd_sync(
    inputs: &SyncInputs,
    output: &Path,
    config: &SyncConfig,
    report_path: Option<&Path>,
    json: bool,
) -> Result<(), ConfluenceCliError> {
    let report = synchronize_files(inputs, output, config)?;

    if let Some(path) = report_path {
        fs::write(path, serde_json::to_string_pretty(&report)?)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }

    Ok(())
}

fn cmd_link(
    session_logs: &Path,
    codes: &Path,
    output: &Path,
    config: &SyncConfig,
) -> Result<(), ConfluenceCliError> {
    let report = link_files(session_logs, codes, output, config)?;

    println!("Link Report");
    println!("===========");
    println!("Coded rows: {}", report.coded_rows);
    println!(
        "Linked:     {} ({:.1}%)",
        report.linked,
        report.link_ratio() * 100.0
    );

    if !report.unlinked.is_empty() {
        println!("\nUnlinked:");
        for identifier in &report.unlinked {
            println!("  - {}", identifier);
        }
    }

    Ok(())
}

// Error handling

#[derive(Debug)]
enum ConfluenceCliError {
    Io(io::Error),
    Sync(SyncError),
    Json(serde_json::Error),
}

impl From<io::Error> for ConfluenceCliError {
    fn from(e: io::Error) -> Self {
        ConfluenceCliError::Io(e)
    }
}

impl From<SyncError> for ConfluenceCliError {
    fn from(e: SyncError) -> Self {
        ConfluenceCliError::Sync(e)
    }
}

impl From<serde_json::Error> for ConfluenceCliError {
    fn from(e: serde_json::Error) -> Self {
        ConfluenceCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<ConfluenceCliError> for CliError {
    fn from(e: ConfluenceCliError) -> Self {
        match e {
            ConfluenceCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            ConfluenceCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            ConfluenceCliError::Sync(e) => {
                let (code, hint) = match &e {
                    SyncError::MalformedTimestamp { .. } => (
                        "MALFORMED_TIMESTAMP",
                        "Check timestamp_format and the timestamp column in the configuration",
                    ),
                    SyncError::MissingColumn { .. } => (
                        "MISSING_COLUMN",
                        "Check the column layout in the configuration",
                    ),
                    SyncError::UnparseableIdentifier { .. } => (
                        "UNPARSEABLE_IDENTIFIER",
                        "Check linker.year_marker against the coded observation identifiers",
                    ),
                    SyncError::Csv(_) => ("CSV_ERROR", "Check the input is valid CSV"),
                    SyncError::Io { .. } => ("IO_ERROR", "Check file paths and permissions"),
                    SyncError::Config(_) => (
                        "CONFIG_ERROR",
                        "Run 'confluence config' for a valid starting point",
                    ),
                    SyncError::WorkerPool(_) => ("WORKER_POOL_ERROR", "Try fewer --workers"),
                    SyncError::Writer(_) => ("WRITER_ERROR", "Check the output location"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
        }
    }
}
