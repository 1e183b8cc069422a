//! Error types for tagsheet.
//!
//! This module defines the error type shared by the layout engine, the export
//! pipeline and the registry, with messages meant to be shown to an operator.

use std::path::PathBuf;
use thiserror::Error;

use crate::assets::AssetFailure;

/// The main error type for tagsheet operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Layout Errors ===
    /// The page geometry cannot hold a single label.
    #[error("invalid page geometry: {message}")]
    Configuration {
        /// Description of the geometry problem.
        message: String,
    },

    /// An export was requested with no items.
    #[error("no QR codes selected; select at least one code to export")]
    EmptySelection,

    /// The selection contains ids that cannot be exported.
    #[error("invalid selection: {message}")]
    InvalidSelection {
        /// Description of the offending ids.
        message: String,
    },

    // === Asset Errors ===
    /// QR images could not be provided for one or more items.
    #[error("failed to load QR images for {} item(s): {}", .failed.len(), failed_ids(.failed))]
    AssetFetch {
        /// The items that failed, in input order.
        failed: Vec<AssetFailure>,
    },

    // === Rendering Errors ===
    /// The rendering sink rejected a drawing operation.
    #[error("render error: {0}")]
    Render(String),

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Registry Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// No QR record exists with the given id.
    #[error("QR code not found for id: {id}")]
    RecordNotFound {
        /// The id that was looked up.
        id: String,
    },

    /// Could not find an unused id after repeated attempts.
    #[error("could not generate a unique id after {attempts} attempts")]
    IdSpaceExhausted {
        /// Number of attempts made.
        attempts: usize,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for tagsheet operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

fn failed_ids(failed: &[AssetFailure]) -> String {
    failed
        .iter()
        .map(|f| f.id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Create a new geometry configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new invalid selection error.
    #[must_use]
    pub fn invalid_selection(message: impl Into<String>) -> Self {
        Self::InvalidSelection {
            message: message.into(),
        }
    }

    /// Create a new render error.
    #[must_use]
    pub fn render(message: impl Into<String>) -> Self {
        Self::Render(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error aborts an export before anything is rendered.
    #[must_use]
    pub fn is_fatal_for_export(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::EmptySelection
                | Self::InvalidSelection { .. }
                | Self::AssetFetch { .. }
        )
    }

    /// Ids of the items whose QR images could not be loaded, if any.
    #[must_use]
    pub fn failed_item_ids(&self) -> Vec<&str> {
        match self {
            Self::AssetFetch { failed } => failed.iter().map(|f| f.id.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}
