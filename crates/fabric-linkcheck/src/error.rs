//! Error types for link verification.
//!
//! Two families live here:
//!
//! - [`LinkcheckError`]: failures that abort a whole run (fatal input,
//!   configuration) or an I/O adapter call.
//! - [`SkipReason`]: recoverable per-link conditions. A skipped link is
//!   counted in the run summary and never reaches the worker pool.
//!
//! Per-request benchmark failures (launch failure, timeout, execution error)
//! are not errors at this level; they are recorded in the request's
//! `TestResult`.

use serde::Serialize;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use fabric_inventory::InventoryError;

/// Result type alias for link verification operations.
pub type LinkcheckResult<T> = Result<T, LinkcheckError>;

/// Errors that abort a run or an adapter operation.
#[derive(Debug, Error)]
pub enum LinkcheckError {
    /// The connectivity descriptor could not be read.
    #[error("Cannot read connectivity descriptor {path}: {source}")]
    DescriptorRead {
        /// Descriptor path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The inventory returned no devices at all.
    #[error("Device inventory '{inventory}' returned no devices")]
    EmptyInventory {
        /// Name of the inventory source.
        inventory: String,
    },

    /// The inventory could not be queried.
    #[error("Device inventory query failed: {0}")]
    Inventory(#[from] InventoryError),

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// The configuration file could not be parsed or written.
    #[error("Configuration file {path}: {message}")]
    ConfigFile {
        /// Configuration file path.
        path: PathBuf,
        /// Parser or serializer message.
        message: String,
    },

    /// Reading or writing a report or log file failed.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// JSON encoding failed.
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl LinkcheckError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an IO error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if this error is a fatal input error: the run must stop
    /// before any request is queued.
    pub fn is_fatal_input(&self) -> bool {
        matches!(
            self,
            LinkcheckError::DescriptorRead { .. }
                | LinkcheckError::EmptyInventory { .. }
                | LinkcheckError::Inventory(_)
        )
    }
}

/// One end of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkSide {
    /// The server end.
    Source,
    /// The client end.
    Destination,
}

impl fmt::Display for LinkSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkSide::Source => write!(f, "source"),
            LinkSide::Destination => write!(f, "destination"),
        }
    }
}

/// Which ports of a link were found inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InactiveSide {
    /// Only the source port.
    Source,
    /// Only the destination port.
    Destination,
    /// Both ports.
    Both,
}

impl InactiveSide {
    /// Combines the activity of both ends; `None` when both are active.
    pub fn from_activity(source_active: bool, dest_active: bool) -> Option<Self> {
        match (source_active, dest_active) {
            (true, true) => None,
            (false, true) => Some(InactiveSide::Source),
            (true, false) => Some(InactiveSide::Destination),
            (false, false) => Some(InactiveSide::Both),
        }
    }
}

impl fmt::Display for InactiveSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InactiveSide::Source => write!(f, "source port"),
            InactiveSide::Destination => write!(f, "destination port"),
            InactiveSide::Both => write!(f, "source and destination ports"),
        }
    }
}

/// Why a link was not tested.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// Source and destination are the same module.
    #[error("Cannot connect module {module_id} to itself")]
    SelfLoopLink {
        /// The module on both ends.
        module_id: u32,
    },

    /// A module id has no physical device.
    #[error("No device found for {side} module {module_id}")]
    UnresolvedDevice {
        /// Which end failed to resolve.
        side: LinkSide,
        /// The module id that was looked up.
        module_id: u32,
    },

    /// One or both ports are not active.
    #[error("Inactive {side}")]
    InactivePort {
        /// Which ports were inactive.
        side: InactiveSide,
    },

    /// The request was queued but never started because the run was aborted.
    #[error("Run aborted before the test started")]
    Incomplete,
}
