//! Error types for usenet-postproc
//!
//! This module provides the error handling for the pipeline:
//! - A crate-wide [`Error`] enum with contextual variants
//! - [`PostProcessError`] for failures tied to one collection (PAR2 load, repair, script spawn)
//! - Machine-readable error codes for consumers that surface errors to a UI

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for usenet-postproc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for usenet-postproc
///
/// Each variant includes contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "poll_interval")
        key: Option<String>,
    },

    /// Post-processing error (PAR2 load, verify, repair, script)
    #[error("post-processing error: {0}")]
    PostProcess(#[from] PostProcessError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Collection or file not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - the scheduler no longer advances jobs
    #[error("shutdown in progress")]
    ShuttingDown,

    /// External tool execution failed (par2)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, not implemented, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors tied to a single collection moving through the pipeline
#[derive(Debug, Error)]
pub enum PostProcessError {
    /// PAR2 file could not be parsed into a recovery set
    #[error("invalid PAR2 file {path}: {reason}")]
    InvalidParFile {
        /// Path of the unreadable PAR2 file
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// PAR2 verification could not be performed
    #[error("PAR2 verification failed for {collection}: {reason}")]
    VerificationFailed {
        /// Collection (NZB name) being verified
        collection: String,
        /// The reason verification failed
        reason: String,
    },

    /// PAR2 repair failed
    #[error("PAR2 repair failed for {collection}: {reason}")]
    RepairFailed {
        /// Collection (NZB name) being repaired
        collection: String,
        /// The reason repair failed
        reason: String,
    },

    /// The post-process script could not be started
    #[error("failed to start script {script}: {reason}")]
    ScriptSpawnFailed {
        /// Script path
        script: PathBuf,
        /// OS error text
        reason: String,
    },

    /// No post job exists for the collection
    #[error("no post job for collection {collection}")]
    JobNotFound {
        /// Collection (NZB name) that was looked up
        collection: String,
    },
}

impl Error {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::PostProcess(e) => e.error_code(),
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::ExternalTool(_) => "external_tool_error",
            Error::NotSupported(_) => "not_supported",
            Error::Other(_) => "internal_error",
        }
    }
}

impl PostProcessError {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            PostProcessError::InvalidParFile { .. } => "invalid_par_file",
            PostProcessError::VerificationFailed { .. } => "verification_failed",
            PostProcessError::RepairFailed { .. } => "repair_failed",
            PostProcessError::ScriptSpawnFailed { .. } => "script_spawn_failed",
            PostProcessError::JobNotFound { .. } => "job_not_found",
        }
    }
}
