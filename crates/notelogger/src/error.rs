//! Error types for notelogger.
//!
//! This module defines all error types used throughout the notelogger crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for notelogger operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
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

    /// A background storage task panicked or was cancelled.
    #[error("storage task failed: {0}")]
    StoreTask(#[from] tokio::task::JoinError),

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

    /// A stored preference could not be decoded as the requested type.
    #[error("preference '{key}' has an unexpected value: {message}")]
    PreferenceDecode {
        /// The preference key.
        key: String,
        /// Description of the decode failure.
        message: String,
    },

    // === Capture Errors ===
    /// The display label for a package could not be resolved.
    #[error("no display name known for package '{package}'")]
    AppNameLookup {
        /// The package identifier that was looked up.
        package: String,
    },

    /// A rule mutation was rejected.
    #[error("invalid rule: {message}")]
    InvalidRule {
        /// Why the rule was rejected.
        message: String,
    },

    // === Export Errors ===
    /// There are no stored notifications to export.
    #[error("No notifications to export")]
    NothingToExport,

    /// Writing an export file failed.
    #[error("failed to write export file {path}: {source}")]
    ExportWrite {
        /// Destination path of the export.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
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

/// A specialized Result type for notelogger operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create an app-name lookup error.
    #[must_use]
    pub fn app_name_lookup(package: impl Into<String>) -> Self {
        Self::AppNameLookup {
            package: package.into(),
        }
    }

    /// Create an invalid rule error.
    #[must_use]
    pub fn invalid_rule(message: impl Into<String>) -> Self {
        Self::InvalidRule {
            message: message.into(),
        }
    }

    /// Create a preference decode error.
    #[must_use]
    pub fn preference_decode(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PreferenceDecode {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Check if this error means the export had nothing to write.
    #[must_use]
    pub fn is_nothing_to_export(&self) -> bool {
        matches!(self, Self::NothingToExport)
    }
}
