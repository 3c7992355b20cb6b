// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed node graph core for `OrdoPlay`.
//!
//! This crate provides the data model and runtime behind procedural node
//! graphs:
//! - A value type registry with pairwise conversions
//! - Node types declared through ordered socket declarations
//! - A mutable [`NodeTree`] with link validation, variadic socket groups and
//!   automatic conversion nodes
//! - Node groups that fold a selection into a nested sub-tree
//! - JSON snapshots
//! - An [`EagerExecutor`] that schedules only what is needed
//!
//! ## Architecture
//!
//! A [`NodeTreeDescriptor`] is built once at startup and shared behind an
//! `Arc`. Trees instantiate nodes from it and keep their topology cache
//! current after every edit. The executor compiles a tree into a plan,
//! runs it, and keeps named storage between runs.

pub mod declaration;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod group;
pub mod link;
pub mod node;
pub mod params;
mod serialize;
pub mod socket;
pub mod storage;
pub mod topology;
pub mod tree;
pub mod types;
pub mod value;

pub use declaration::{AnyValue, NodeDeclaration, NodeDeclarationBuilder, SocketDeclaration};
pub use descriptor::NodeTreeDescriptor;
pub use error::{ExecutionError, GraphError, NodeExecError, Result};
pub use executor::{EagerExecutor, ExecutionReport, ExecutionSlot, ExecutorOptions, ExecutorState};
pub use group::{register_group_nodes, GROUP_INPUTS, GROUP_OUTPUTS, NODE_GROUP, NODE_GROUP_IN, NODE_GROUP_OUT};
pub use link::{Link, LinkId, LinkRoute};
pub use node::{Node, NodeId, NodeTypeInfo};
pub use params::ExeParams;
pub use socket::{Socket, SocketDirection, SocketId};
pub use storage::{register_storage_nodes, NamedStorage, STORAGE_IN, STORAGE_OUT};
pub use topology::ToposortDirection;
pub use tree::NodeTree;
pub use types::{SocketType, TypeRegistry};
pub use value::{SocketValue, TypeError, Value};
