// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error types for the node system.

use crate::link::LinkId;
use crate::node::NodeId;
use crate::socket::{SocketDirection, SocketId};
use crate::value::TypeError;
use thiserror::Error;

/// Structural errors raised by catalog and graph mutations
#[derive(Debug, Error)]
pub enum GraphError {
    /// No node type registered under this name
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// A declaration references a type that is not in the type registry
    #[error("Node type {node_type} uses unregistered socket type {type_name}")]
    UnregisteredType {
        /// Node type being registered
        node_type: String,
        /// Offending type name
        type_name: String,
    },

    /// Two sockets of the same direction share an identifier
    #[error("Duplicate socket identifier found in {direction:?}s: {identifier}")]
    DuplicateSocketIdentifier {
        /// Repeated identifier
        identifier: String,
        /// Direction of the clashing sockets
        direction: SocketDirection,
    },

    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Socket not found
    #[error("Socket not found: {0}")]
    SocketNotFound(SocketId),

    /// The node has no socket group with this identifier
    #[error("Node {node} has no socket group {group}")]
    UnknownSocketGroup {
        /// Target node
        node: NodeId,
        /// Requested group identifier
        group: String,
    },

    /// Link not found
    #[error("Link not found: {0}")]
    LinkNotFound(LinkId),

    /// The two sockets cannot form a link at all
    #[error("Invalid link: {0}")]
    InvalidLink(&'static str),

    /// The selection cannot be turned into a node group
    #[error("Invalid group: {0}")]
    InvalidGroup(&'static str),

    /// The input endpoint already has a link
    #[error("Socket already linked: {0}")]
    InputAlreadyLinked(SocketId),

    /// No direct link or registered conversion between the socket types
    #[error("Cannot convert between types {from} and {to}")]
    IncompatibleTypes {
        /// Output socket type
        from: String,
        /// Input socket type
        to: String,
    },

    /// A socket value does not match the socket type
    #[error("Socket {socket} rejects value: {source}")]
    ValueTypeMismatch {
        /// Target socket
        socket: SocketId,
        /// Type mismatch detail
        source: TypeError,
    },

    /// Snapshot JSON could not be parsed or produced
    #[error("Snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot is structurally invalid
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),
}

/// Executor errors, either fatal for a pass or recorded per node
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    /// The tree contains a cycle, nothing was scheduled
    #[error("Graph contains a cycle")]
    CycleDetected,

    /// `execute` called before a successful `compile`
    #[error("No compiled execution plan")]
    NotCompiled,

    /// The tree was mutated after the plan was compiled
    #[error("Execution plan is stale, recompile the tree")]
    StalePlan,

    /// The socket has no slot in the compiled plan
    #[error("Socket {0} is not part of the compiled plan")]
    SocketNotScheduled(SocketId),

    /// An input had neither a forwarded value nor a default
    #[error("Node {node} is missing an input value")]
    MissingInput {
        /// Skipped node
        node: NodeId,
    },

    /// The node computation returned an error
    #[error("Node {node} failed: {message}")]
    ComputationFailed {
        /// Failed node
        node: NodeId,
        /// Message produced by the computation
        message: String,
    },

    /// A `storage_out` node references a key nothing has stored yet
    #[error("No cache can be found with name {key} (yet).")]
    StorageKeyNotFound {
        /// Reading node
        node: NodeId,
        /// Storage key
        key: String,
    },
}

impl ExecutionError {
    /// Node the error was recorded for, if any
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::MissingInput { node }
            | Self::ComputationFailed { node, .. }
            | Self::StorageKeyNotFound { node, .. } => Some(*node),
            Self::CycleDetected | Self::NotCompiled | Self::StalePlan | Self::SocketNotScheduled(_) => None,
        }
    }
}

/// Error returned from a node computation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct NodeExecError(pub String);

impl From<&str> for NodeExecError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for NodeExecError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<TypeError> for NodeExecError {
    fn from(err: TypeError) -> Self {
        Self(err.to_string())
    }
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;
