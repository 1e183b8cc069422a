//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::assets::FailurePolicy;
use crate::config::AssetSourceKind;

/// Where an export or layout takes its ids from.
#[derive(Debug, Clone, Default, Args)]
pub struct Selection {
    /// Tag ids, in print order
    pub ids: Vec<String>,

    /// Read ids from a file, one per line ('#' starts a comment)
    #[arg(long, value_name = "FILE")]
    pub ids_file: Option<PathBuf>,

    /// Select the N oldest inactive codes from the registry
    #[arg(long, value_name = "N", conflicts_with_all = ["ids", "ids_file"])]
    pub inactive: Option<usize>,
}

/// Export command arguments.
#[derive(Debug, Args)]
pub struct ExportCommand {
    /// The ids to print
    #[command(flatten)]
    pub selection: Selection,

    /// Output PDF path (default: timestamped file in the output directory)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Public origin the codes point to
    #[arg(long, value_name = "URL")]
    pub origin: Option<String>,

    /// What to do with codes whose image cannot be loaded
    #[arg(long, value_enum)]
    pub policy: Option<FailurePolicyArg>,

    /// Where QR images come from
    #[arg(long, value_enum)]
    pub source: Option<SourceArg>,

    /// Output the report as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Layout command arguments.
#[derive(Debug, Args)]
pub struct LayoutCommand {
    /// The ids to lay out
    #[command(flatten)]
    pub selection: Selection,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Generate command arguments.
#[derive(Debug, Args)]
pub struct GenerateCommand {
    /// Number of codes to issue
    #[arg(value_parser = clap::value_parser!(u32).range(1..=10_000))]
    pub count: u32,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// List command arguments.
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Page to show, starting at 0
    #[arg(short, long, default_value = "0")]
    pub page: usize,

    /// Codes per page
    #[arg(short, long, default_value = "20")]
    pub size: usize,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Show command arguments.
#[derive(Debug, Args)]
pub struct ShowCommand {
    /// The tag id
    pub id: String,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
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

/// Failure policy argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FailurePolicyArg {
    /// Fail the export if any image is missing
    Abort,
    /// Draw a placeholder frame in place of missing images
    Placeholder,
    /// Leave codes with missing images out of the sheet
    Exclude,
}

impl From<FailurePolicyArg> for FailurePolicy {
    fn from(arg: FailurePolicyArg) -> Self {
        match arg {
            FailurePolicyArg::Abort => Self::Abort,
            FailurePolicyArg::Placeholder => Self::Placeholder,
            FailurePolicyArg::Exclude => Self::Exclude,
        }
    }
}

/// Image source argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    /// Encode QR codes in-process
    Local,
    /// Fetch QR images from the configured service
    Remote,
}

impl From<SourceArg> for AssetSourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Local => Self::Local,
            SourceArg::Remote => Self::Remote,
        }
    }
}
