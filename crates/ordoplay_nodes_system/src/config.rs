// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node system configuration, stored as RON.
//!
//! ```ron
//! NodeSystemConfig(
//!     version: 1,
//!     log_filter: "ordoplay_nodes_core=info",
//!     snapshot_indent: Some(4),
//!     auto_compile: true,
//!     release_dead_values: false,
//!     startup_snapshot: None,
//! )
//! ```

use crate::error::{Result, SystemError};
use ordoplay_nodes_core::ExecutorOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current config format version
pub const CONFIG_FORMAT_VERSION: u32 = 1;

/// Default config file name
pub const CONFIG_FILE_NAME: &str = "nodes.ron";

/// Settings for a [`NodeSystem`](crate::NodeSystem)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSystemConfig {
    /// Config format version
    pub version: u32,
    /// `tracing` filter directives, comma separated
    pub log_filter: String,
    /// JSON indent width for snapshots, `None` for compact output
    pub snapshot_indent: Option<usize>,
    /// Compile before executing whenever the tree changed
    pub auto_compile: bool,
    /// Drop consumed slot values after each execution
    pub release_dead_values: bool,
    /// Snapshot loaded when the system starts
    pub startup_snapshot: Option<PathBuf>,
}

impl Default for NodeSystemConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_FORMAT_VERSION,
            log_filter: "ordoplay_nodes_core=info,ordoplay_nodes_system=info".to_string(),
            snapshot_indent: Some(4),
            auto_compile: true,
            release_dead_values: false,
            startup_snapshot: None,
        }
    }
}

impl NodeSystemConfig {
    /// Load a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_ron(&content)?;
        tracing::debug!("Loaded node system config from {}", path.display());
        Ok(config)
    }

    /// Parse a config from RON text
    pub fn from_ron(content: &str) -> Result<Self> {
        let config: NodeSystemConfig = ron::from_str(content)?;

        if config.version > CONFIG_FORMAT_VERSION {
            return Err(SystemError::UnsupportedVersion {
                found: config.version,
                supported: CONFIG_FORMAT_VERSION,
            });
        }

        Ok(config)
    }

    /// Save the config to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_ron()?)?;
        Ok(())
    }

    /// Render the config as pretty RON
    pub fn to_ron(&self) -> Result<String> {
        let config = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Executor options carried by this config
    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            release_dead_values: self.release_dead_values,
        }
    }

    /// Config file path inside a directory
    pub fn config_file_path(dir: &Path) -> PathBuf {
        dir.join(CONFIG_FILE_NAME)
    }
}
