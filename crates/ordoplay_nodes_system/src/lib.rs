// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node system host for `OrdoPlay`.
//!
//! This crate wires the node graph core into something an application can
//! hold on to:
//! - [`NodeSystem`] owning a tree and its executor
//! - RON configuration ([`NodeSystemConfig`])
//! - `tracing` setup
//! - The basic node pack
//!
//! ## Architecture
//!
//! ```text
//! NodeSystemConfig ──► NodeSystem ──► NodeTree ◄── NodeTreeDescriptor
//!                          │                          (basic_nodes)
//!                          └──► EagerExecutor
//! ```
//!
//! A typical host:
//!
//! ```no_run
//! use ordoplay_nodes_system::{basic_nodes, init_logging, NodeSystem, NodeSystemConfig};
//! use std::path::Path;
//!
//! let config = NodeSystemConfig::load(Path::new("nodes.ron"))?;
//! init_logging(&config.log_filter)?;
//! let mut system = NodeSystem::from_config(basic_nodes::create_basic_descriptor()?, config)?;
//! let report = system.execute()?;
//! println!("{} nodes executed", report.executed.len());
//! # Ok::<(), ordoplay_nodes_system::SystemError>(())
//! ```

pub mod basic_nodes;
pub mod config;
pub mod error;
pub mod logging;
pub mod system;

pub use config::{NodeSystemConfig, CONFIG_FORMAT_VERSION};
pub use error::{Result, SystemError};
pub use logging::init_logging;
pub use system::{NodeSystem, SharedNodeSystem};
