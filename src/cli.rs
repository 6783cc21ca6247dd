// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `scoutbatch`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "scoutbatch",
    version,
    about = "Run batches of research questions through an external search agent.",
    long_about = None
)]
pub struct CliArgs {
    /// Research questions to run. Blank entries are dropped after trimming;
    /// at least one non-blank question is required.
    #[arg(value_name = "QUESTION", required_unless_present = "dry_run")]
    pub questions: Vec<String>,

    /// Path to the config file (TOML).
    ///
    /// Default: `Scoutbatch.toml` in the current working directory. A missing
    /// file is fine; built-in defaults apply.
    #[arg(long, value_name = "PATH", default_value = "Scoutbatch.toml")]
    pub config: String,

    /// Requested worker count. Clamped to [1, min(question count, 5)].
    #[arg(long, value_name = "N")]
    pub parallel: Option<usize>,

    /// Per-run timeout in seconds. Clamped to [60, 3600].
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Model override passed to the agent (ignored when blank).
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Part of the reference year the answers should be framed against.
    #[arg(long, value_enum, value_name = "PERIOD")]
    pub period: Option<Period>,

    /// Reference year. Defaults to the current year.
    #[arg(long, value_name = "YEAR")]
    pub year: Option<i32>,

    /// Maximum number of sources kept per answer (1-20).
    #[arg(long, value_name = "N")]
    pub max_sources: Option<usize>,

    /// Accept runs whose telemetry contains command-like events instead of
    /// failing them with `command_events_detected`.
    #[arg(long)]
    pub allow_command_events: bool,

    /// Print the machine-readable batch details as JSON on stdout.
    #[arg(long)]
    pub json: bool,

    /// Print the resolved plan (questions, settings) without spawning anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SCOUTBATCH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Time-framing hint within the reference year.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Period {
    Early,
    Mid,
    Late,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Early => "early",
            Period::Mid => "mid",
            Period::Late => "late",
        }
    }

    pub fn from_config_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "early" => Some(Period::Early),
            "mid" => Some(Period::Mid),
            "late" => Some(Period::Late),
            _ => None,
        }
    }
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

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
