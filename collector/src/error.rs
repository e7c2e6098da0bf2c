//! Error handling for the netpulse collector
//!
//! Steady-state probe failures are never fatal: each one is isolated to its
//! single measurement and the loop continues. Only unrecoverable startup
//! conditions (log directory, store open) terminate the process.

use std::io;

use thiserror::Error;

/// The main error type for collector operations
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Shared core errors (storage, config)
    #[error(transparent)]
    Core(#[from] netpulse_core::CoreError),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] netpulse_core::ConfigError),

    /// Storage related errors
    #[error("Storage error: {0}")]
    Storage(#[from] netpulse_core::StorageError),

    /// Probe related errors
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Probe failure taxonomy
///
/// `ToolUnavailable` degrades the affected measurement kind for the whole
/// run; the others cost exactly one measurement each.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Tool not found in PATH: {tool}")]
    ToolUnavailable { tool: String },

    #[error("{tool} timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    #[error("Failed to parse {tool} output: {reason}")]
    Parse { tool: String, reason: String },

    #[error("{tool} failed: {reason}")]
    Failed { tool: String, reason: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, CollectorError>;

/// A specialized result type for probe operations
pub type ProbeResult<T> = std::result::Result<T, ProbeError>;
