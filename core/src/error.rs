//! Error handling for the netpulse core library
//!
//! This module provides error types for the durable store, the rotating
//! CSV log, configuration loading, and the read-side query path.

use std::io;

use thiserror::Error;

/// The main error type for core operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Storage related errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage related errors, covering both the SQLite sink and the CSV sink
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Directory creation failed: {path}")]
    DirectoryCreationFailed { path: String },

    #[error("Failed to open database: {reason}")]
    OpenFailed { reason: String },

    #[error("Database write failed: {reason}")]
    WriteFailed { reason: String },

    #[error("Database query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("CSV write failed: {reason}")]
    CsvWriteFailed { reason: String },

    #[error("Invalid hop index: {hop}")]
    InvalidHop { hop: u8 },
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Configuration parsing error: {reason}")]
    ParseError { reason: String },

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, CoreError>;

/// A specialized result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::QueryFailed {
            reason: e.to_string(),
        }
    }
}

impl From<csv::Error> for StorageError {
    fn from(e: csv::Error) -> Self {
        StorageError::CsvWriteFailed {
            reason: e.to_string(),
        }
    }
}
