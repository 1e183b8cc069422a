//! Command-line interface for tagsheet.
//!
//! This module provides the CLI structure for the `tagsheet` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, ExportCommand, FailurePolicyArg, GenerateCommand, LayoutCommand, ListCommand,
    Selection, ShowCommand, SourceArg,
};

/// tagsheet - Printable QR tag sheets for lost-device labels
///
/// Issues QR codes into a local registry and lays them out on printable PDF
/// sheets, each code pointing at its scan page.
#[derive(Debug, Parser)]
#[command(name = "tagsheet")]
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
    /// Render QR codes onto a printable PDF sheet
    Export(ExportCommand),

    /// Show where each code would be placed, without rendering
    Layout(LayoutCommand),

    /// Issue a batch of new codes into the registry
    Generate(GenerateCommand),

    /// List registered codes, newest first
    List(ListCommand),

    /// Show one registered code
    Show(ShowCommand),

    /// View or check configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
