//! Command-line interface for notelogger.
//!
//! This module provides the CLI structure for the `notelog` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, ExportCommand, FormatArg, IngestCommand, KeywordCommand, ListCommand,
    RetentionCommand, Toggle,
};

use crate::logging::Verbosity;

/// notelog - Keep a searchable history of your notifications
///
/// Records notification events, flags one-time passcodes, and lets you
/// search, filter and export what was captured.
#[derive(Debug, Parser)]
#[command(name = "notelog")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Capture notification events from a file or stdin
    Ingest(IngestCommand),

    /// List stored notifications
    List(ListCommand),

    /// List apps that have posted notifications
    Apps {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show storage statistics
    Stats {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Stop recording notifications from an app
    Block {
        /// Package identifier
        package: String,
    },

    /// Resume recording notifications from an app
    Unblock {
        /// Package identifier
        package: String,
    },

    /// Manage highlight keywords
    #[command(subcommand)]
    Keyword(KeywordCommand),

    /// Show or change the retention policy
    Retention(RetentionCommand),

    /// Turn automatic export on or off
    AutoExport {
        /// New state
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Delete notifications older than the retention threshold now
    Sweep,

    /// Export all stored notifications
    Export(ExportCommand),

    /// Delete all stored notifications
    Clear {
        /// Confirm deletion
        #[arg(short, long)]
        yes: bool,
    },

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}
