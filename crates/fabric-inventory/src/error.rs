//! Error types for device inventory queries.
//!
//! All errors implement `std::error::Error` via `thiserror`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for inventory operations.
pub type InventoryResult<T> = Result<T, InventoryError>;

/// Errors that can occur while building a device inventory.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The vendor query utility could not be spawned.
    #[error("Failed to execute '{command}': {source}")]
    QueryExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The vendor query utility returned a non-zero exit code.
    #[error("Query command failed: '{command}' (exit code {exit_code}): {output}")]
    QueryFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Output of the query utility could not be understood.
    #[error("Malformed device record at line {line}: {message}")]
    Parse {
        /// 1-based line number in the query output.
        line: usize,
        /// Error message.
        message: String,
    },

    /// Reading a sysfs attribute or inventory file failed.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// The path being read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A static inventory file could not be decoded.
    #[error("Invalid inventory file {path}: {source}")]
    InvalidFile {
        /// The inventory file.
        path: PathBuf,
        /// The decoding error.
        #[source]
        source: serde_json::Error,
    },

    /// Two devices claim the same bus id.
    #[error("Duplicate bus id '{bus_id}' in inventory")]
    DuplicateBusId {
        /// The duplicated bus id.
        bus_id: String,
    },
}

impl InventoryError {
    /// Creates a parse error.
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Creates a read error for `path`.
    pub fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }
}
