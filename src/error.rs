//! Unified error type for typeweld.
//!
//! Per the error taxonomy, nothing in the core aborts the whole batch:
//! malformed observation records are discarded with a warning, parse and
//! write failures are file-local, and unmatched or already-annotated sites
//! are deliberate skips. The only run-fatal condition is an unusable
//! observation input file, because there is nothing to do without it.

use thiserror::Error;

/// Stable exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    /// Every requested file parsed and (in write mode) wrote cleanly.
    Success = 0,
    /// At least one requested file failed to parse or failed to write.
    FileFailures = 1,
    /// Bad input from the caller (arguments or observation file).
    InvalidInput = 2,
}

impl ExitStatus {
    /// Get the numeric code value.
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Unified error type for the pipeline.
#[derive(Debug, Error)]
pub enum WeldError {
    /// The observation input file could not be read or is not valid JSON.
    #[error("cannot load observations from {path}: {message}")]
    ObservationFile { path: String, message: String },

    /// One observation record has missing or invalid fields.
    ///
    /// Recoverable: the record is discarded and processing continues.
    #[error("malformed observation record #{index}: {message}")]
    MalformedObservation { index: usize, message: String },

    /// A source file could not be parsed into a tree.
    ///
    /// File-local: that file is left untouched, other files proceed.
    #[error("cannot parse {path}: {message}")]
    ParseFailure { path: String, message: String },

    /// A source file could not be written back.
    ///
    /// File-local: surfaced per file, does not abort the batch.
    #[error("cannot write {path}: {message}")]
    WriteFailure { path: String, message: String },

    /// Invalid arguments from the caller.
    #[error("invalid arguments: {message}")]
    InvalidArguments { message: String },
}

impl WeldError {
    /// Create an observation-file error.
    pub fn observation_file(path: impl Into<String>, message: impl ToString) -> Self {
        WeldError::ObservationFile {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a malformed-observation error.
    pub fn malformed_observation(index: usize, message: impl ToString) -> Self {
        WeldError::MalformedObservation {
            index,
            message: message.to_string(),
        }
    }

    /// Create a parse-failure error.
    pub fn parse_failure(path: impl Into<String>, message: impl ToString) -> Self {
        WeldError::ParseFailure {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a write-failure error.
    pub fn write_failure(path: impl Into<String>, message: impl ToString) -> Self {
        WeldError::WriteFailure {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create an invalid-arguments error.
    pub fn invalid_args(message: impl Into<String>) -> Self {
        WeldError::InvalidArguments {
            message: message.into(),
        }
    }

    /// The exit status this error maps to when it terminates the run.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            WeldError::ObservationFile { .. } | WeldError::InvalidArguments { .. } => {
                ExitStatus::InvalidInput
            }
            WeldError::MalformedObservation { .. }
            | WeldError::ParseFailure { .. }
            | WeldError::WriteFailure { .. } => ExitStatus::FileFailures,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
