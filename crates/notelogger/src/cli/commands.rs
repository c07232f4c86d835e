//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::export::ExportFormat;

/// Ingest command arguments.
#[derive(Debug, Args)]
pub struct IngestCommand {
    /// File of JSON-lines notification events (reads stdin when omitted)
    pub file: Option<PathBuf>,
}

/// List command arguments.
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Only show notifications containing this text
    #[arg(short, long)]
    pub search: Option<String>,

    /// Only show notifications with a detected OTP
    #[arg(long)]
    pub otp: bool,

    /// Only show notifications from this package
    #[arg(short, long)]
    pub app: Option<String>,

    /// Maximum number of results
    #[arg(short, long, default_value = "50")]
    pub limit: usize,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Keyword management commands.
#[derive(Debug, Subcommand)]
pub enum KeywordCommand {
    /// Add a highlight keyword
    Add {
        /// The keyword
        keyword: String,
    },

    /// Remove a highlight keyword
    Remove {
        /// The keyword
        keyword: String,
    },

    /// List highlight keywords
    List,
}

/// Retention command arguments.
#[derive(Debug, Args)]
pub struct RetentionCommand {
    /// Turn age-based deletion on
    #[arg(long, conflicts_with = "disable")]
    pub enable: bool,

    /// Turn age-based deletion off
    #[arg(long)]
    pub disable: bool,

    /// Delete notifications older than this many days (7-90)
    #[arg(short, long)]
    pub days: Option<u32>,
}

impl RetentionCommand {
    /// The requested on/off state, if any.
    #[must_use]
    pub fn requested_state(&self) -> Option<bool> {
        match (self.enable, self.disable) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

/// Export command arguments.
#[derive(Debug, Args)]
pub struct ExportCommand {
    /// Output format
    #[arg(short, long, value_enum, default_value = "csv")]
    pub format: FormatArg,

    /// Directory to write to (defaults to the configured export directory)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Export format argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    /// Comma-separated values
    Csv,
    /// JSON array
    Json,
}

impl From<FormatArg> for ExportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => Self::Csv,
            FormatArg::Json => Self::Json,
        }
    }
}

/// On/off switch argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    /// Enable
    On,
    /// Disable
    Off,
}

impl From<Toggle> for bool {
    fn from(toggle: Toggle) -> Self {
        toggle == Toggle::On
    }
}
