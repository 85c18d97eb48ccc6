// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `jobrecon`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "jobrecon",
    version,
    about = "Reconcile distributed job results polled from an agent fleet into per-host status and logs.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `jobrecon.toml` in the current working directory. A missing
    /// default file means built-in defaults.
    #[arg(long, value_name = "PATH", default_value = "jobrecon.toml")]
    pub config: String,

    /// Scenario file (JSON) describing the task instances to reconcile and
    /// the result batches the backend reports for them.
    #[arg(long, value_name = "PATH")]
    pub scenario: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `JOBRECON_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Validate config and scenario, print a summary, reconcile nothing.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
