//! ringlog CLI - operator tooling for file-backed ring buffers.

mod commands;
mod observability;

use anyhow::Result;
use clap::{Parser, Subcommand};
use observability::{LogFormat, TracingConfig, init_tracing};
use std::path::PathBuf;

/// ringlog - inspect and maintain crash-resilient ring buffer files.
#[derive(Parser)]
#[command(name = "ringlog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a ring buffer file (no-op if it exists)
    Create {
        /// Path of the buffer file
        path: PathBuf,

        /// Capacity of the data area in 32-bit words
        #[arg(short, long)]
        words: Option<u32>,

        /// Rotate into archives when full instead of wrapping around
        #[arg(long)]
        no_wrap: bool,
    },

    /// Show header values, occupancy and archives
    Summary {
        /// Path of the buffer file or of an archive
        path: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print the unconsumed records
    Dump {
        /// Path of the buffer file or of an archive
        path: PathBuf,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Consume the printed records
        #[arg(long)]
        consume: bool,
    },

    /// Append one record
    Enqueue {
        /// Path of the buffer file
        path: PathBuf,

        /// Payload words in hexadecimal (e.g. 0xdeadbeef 2a)
        words: Vec<String>,

        /// Start time of the record
        #[arg(long, default_value_t = 0.0)]
        t_start: f64,

        /// Stop time of the record
        #[arg(long, default_value_t = 0.0)]
        t_stop: f64,
    },

    /// Archive a non-wrapping buffer now
    Rotate {
        /// Path of the buffer file
        path: PathBuf,
    },

    /// Discard uncommitted reservations and reconcile the sequence store
    Repair {
        /// Path of the buffer file
        path: PathBuf,
    },

    /// List archived segments
    Archives {
        /// Path of the buffer file
        path: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn setup_logging(verbosity: u8) -> Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_config = TracingConfig::from_env();
    let log_format = std::env::var("RINGLOG_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse::<LogFormat>().ok())
        .unwrap_or_else(|| {
            if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
                LogFormat::Pretty
            } else {
                LogFormat::Compact
            }
        });

    // RUST_LOG wins over the verbosity flag
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| filter.to_string());

    let config = TracingConfig::builder()
        .log_format(log_format)
        .log_filter(log_filter)
        .include_location(env_config.include_location())
        .include_target(env_config.include_target())
        .build();

    init_tracing(&config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Create {
            path,
            words,
            no_wrap,
        } => commands::create::run(&path, words, no_wrap),
        Commands::Summary { path, json } => commands::summary::run(&path, json),
        Commands::Dump {
            path,
            limit,
            consume,
        } => commands::dump::run(&path, limit, consume),
        Commands::Enqueue {
            path,
            words,
            t_start,
            t_stop,
        } => commands::enqueue::run(&path, &words, t_start, t_stop),
        Commands::Rotate { path } => commands::rotate::run(&path),
        Commands::Repair { path } => commands::repair::run(&path),
        Commands::Archives { path, json } => commands::archives::run(&path, json),
    }
}
