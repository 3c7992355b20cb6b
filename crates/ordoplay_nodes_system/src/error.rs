// SPDX-License-Identifier: MIT OR Apache-2.0
//! Errors raised by the node system host.

use ordoplay_nodes_core::{ExecutionError, GraphError};
use thiserror::Error;

/// Errors from loading, editing or running a node system
#[derive(Debug, Error)]
pub enum SystemError {
    /// Graph construction or snapshot failure
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Compile or execution failure
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// File access failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file could not be parsed
    #[error("Invalid config: {0}")]
    ConfigParse(#[from] ron::error::SpannedError),

    /// The config could not be written
    #[error("Failed to serialize config: {0}")]
    ConfigWrite(#[from] ron::Error),

    /// The config was written by a newer version
    #[error("Config version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version found in the file
        found: u32,
        /// Newest supported version
        supported: u32,
    },

    /// A log filter directive could not be parsed
    #[error("Invalid log filter '{filter}': {message}")]
    LogFilter {
        /// The offending directive
        filter: String,
        /// Parser message
        message: String,
    },
}

/// Result type for node system operations
pub type Result<T> = std::result::Result<T, SystemError>;
