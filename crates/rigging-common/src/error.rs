//! Unified error types for the Rigging workspace.
//!
//! Graph-level errors (`Cycle`, `UnresolvedReference`, `InvalidResource`)
//! are fatal and abort before any operation runs. Operation-level errors
//! are recorded against a single resource and never abort independent
//! branches of a run.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum RiggingError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The stack source text could not be tokenized or parsed.
    #[error("syntax error: {message}")]
    Parse {
        /// Description of the syntax error.
        message: String,
    },

    /// A resource declaration does not match its kind's schema.
    #[error("invalid resource \"{resource}\": {message}")]
    InvalidResource {
        /// Logical name of the offending resource.
        resource: String,
        /// What is wrong with it.
        message: String,
    },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected: {}", .cycle.join(" -> "))]
    Cycle {
        /// Resource names along the cycle, first name repeated at the end.
        cycle: Vec<String>,
    },

    /// A resource or output references a name that is not declared.
    #[error("\"{referrer}\" references undeclared {kind} \"{name}\"")]
    UnresolvedReference {
        /// Resource or output holding the reference.
        referrer: String,
        /// What was referenced (`resource` or `parameter`).
        kind: &'static str,
        /// The missing name.
        name: String,
    },

    /// A create, update, or delete operation failed for one resource.
    #[error("{operation} of \"{resource}\" failed: {message}")]
    OperationFailed {
        /// Resource whose operation failed.
        resource: String,
        /// Operation that was attempted.
        operation: crate::types::Operation,
        /// Failure description.
        message: String,
    },

    /// Structured output of an external action could not be decoded.
    #[error("failed to parse output of \"{resource}\": {message}; raw output: {raw}")]
    ParseOutput {
        /// Resource whose output was being decoded.
        resource: String,
        /// Decoder error message.
        message: String,
        /// The raw output, or a redaction marker when it is secret.
        raw: String,
    },

    /// An output could not be computed because a dependency did not succeed.
    #[error("output \"{output}\" withheld: dependency \"{resource}\" did not complete")]
    DependencyFailed {
        /// Name of the withheld output.
        output: String,
        /// Resource that failed, was skipped, or was never started.
        resource: String,
    },

    /// At least one resource failed while others succeeded.
    #[error("run finished with failures: {succeeded} succeeded, {failed} failed, {skipped} skipped")]
    PartialFailure {
        /// Number of resources that completed.
        succeeded: usize,
        /// Number of resources whose operation failed.
        failed: usize,
        /// Number of resources skipped or cancelled.
        skipped: usize,
    },

    /// An external command exited unsuccessfully.
    #[error("command `{program}` exited with code {exit_code}: {stderr}")]
    Command {
        /// Program that was run.
        program: String,
        /// Exit code (-1 when terminated by a signal).
        exit_code: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// An HTTP request failed or returned an unexpected status.
    #[error("HTTP error{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Http {
        /// Response status, if a response was received.
        status: Option<u16>,
        /// Failure description.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// The run was cancelled before the operation started.
    #[error("cancelled")]
    Cancelled,
}

impl RiggingError {
    /// Returns whether retrying the failed operation may succeed.
    ///
    /// Only network, process, and filesystem failures are transient;
    /// decoding and validation failures are deterministic.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => match status {
                Some(code) => *code >= 500 || *code == 429,
                None => true,
            },
            Self::Command { .. } | Self::Io { .. } => true,
            _ => false,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, RiggingError>;
