//! Error types for nftables-exporter.
//!
//! Errors fall into a few categories that the polling loop and the process
//! entry point treat differently:
//!
//! - execution failures ([`ExporterError::CommandSpawn`],
//!   [`ExporterError::CommandFailed`]) terminate the collector and are logged
//!   with the failed command line
//! - protocol failures ([`ExporterError::UnsupportedSchema`]) are fatal and
//!   never retried
//! - transport and checksum failures while provisioning the geo database
//!   are retryable (see [`ExporterError::is_retryable`])

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for exporter operations.
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Errors that can occur while collecting or exposing nftables state.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// The query command could not be started.
    #[error("Failed to execute command '{command}': {source}")]
    CommandSpawn {
        /// The command line that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The query command returned a non-zero exit code.
    #[error("Command failed: '{command}' (exit code {exit_code}): {output}")]
    CommandFailed {
        /// The command line that failed.
        command: String,
        /// The exit code, -1 when terminated by a signal.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// The query output is not valid JSON or a record lacks required fields.
    #[error("Failed to decode {context}: {source}")]
    Decode {
        /// What was being decoded.
        context: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The query output does not start with a metainfo envelope.
    #[error("nftables JSON output does not start with a metainfo entry")]
    MissingMetainfo,

    /// The query output declares a schema version other than the supported one.
    #[error("nftables json schema v{version} is not supported")]
    UnsupportedSchema {
        /// The declared `json_schema_version`.
        version: u64,
    },

    /// A counter-style series has neither an object name nor a comment.
    #[error("Metric {metric}: object in {family}/{table} has neither a name nor a comment")]
    MissingIdentity {
        /// The metric being written.
        metric: String,
        /// Family of the offending object.
        family: String,
        /// Table of the offending object.
        table: String,
    },

    /// An object lacks an attribute the metric declares as a label.
    #[error("Metric {metric}: missing value for label '{label}'")]
    MissingLabel {
        /// The metric being written.
        metric: String,
        /// The label without a value.
        label: &'static str,
    },

    /// Metric registration or encoding failed.
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP transport error while downloading the geo database.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A downloaded file does not match its published checksum.
    #[error("Checksum verification failed for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The verified file.
        path: PathBuf,
        /// The published checksum.
        expected: String,
        /// The checksum of the file on disk.
        actual: String,
    },

    /// Geo database could not be located or opened.
    #[error("GeoIP database error: {0}")]
    GeoIp(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ExporterError {
    /// Creates a decode error for the given context.
    pub fn decode(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            context: context.into(),
            source,
        }
    }

    /// Returns true if the query command could not run or exited non-zero.
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            ExporterError::CommandSpawn { .. } | ExporterError::CommandFailed { .. }
        )
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExporterError::Http(_) | ExporterError::ChecksumMismatch { .. }
        )
    }

    /// Returns the failed command line for execution failures.
    pub fn command(&self) -> Option<&str> {
        match self {
            ExporterError::CommandSpawn { command, .. }
            | ExporterError::CommandFailed { command, .. } => Some(command),
            _ => None,
        }
    }
}
