// SPDX-License-Identifier: MIT OR Apache-2.0
//! Socket definitions.

use crate::link::LinkId;
use crate::node::NodeId;
use crate::types::SocketType;
use crate::value::{SocketValue, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a socket, drawn from the tree-wide ID counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SocketId(pub u32);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocketDirection {
    /// Receives values
    Input,
    /// Produces values
    Output,
}

impl SocketDirection {
    /// The other direction
    pub fn opposite(self) -> Self {
        match self {
            Self::Input => Self::Output,
            Self::Output => Self::Input,
        }
    }
}

/// A socket instance owned by a node
#[derive(Debug, Clone)]
pub struct Socket {
    pub(crate) id: SocketId,
    pub(crate) node: NodeId,
    pub(crate) identifier: String,
    pub(crate) ui_name: String,
    pub(crate) direction: SocketDirection,
    pub(crate) socket_type: SocketType,
    pub(crate) group: Option<String>,
    pub(crate) placeholder: bool,
    pub(crate) value: Option<Value>,
    pub(crate) min: Option<Value>,
    pub(crate) max: Option<Value>,
    pub(crate) linked_links: Vec<LinkId>,
    pub(crate) linked_sockets: Vec<SocketId>,
}

impl Socket {
    pub(crate) fn new(
        id: SocketId,
        node: NodeId,
        identifier: impl Into<String>,
        ui_name: impl Into<String>,
        direction: SocketDirection,
        socket_type: SocketType,
    ) -> Self {
        Self {
            id,
            node,
            identifier: identifier.into(),
            ui_name: ui_name.into(),
            direction,
            socket_type,
            group: None,
            placeholder: false,
            value: None,
            min: None,
            max: None,
            linked_links: Vec::new(),
            linked_sockets: Vec::new(),
        }
    }

    /// Socket ID
    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Owning node
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Identifier, unique among the node's sockets of the same direction
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Display name
    pub fn ui_name(&self) -> &str {
        &self.ui_name
    }

    /// Direction
    pub fn direction(&self) -> SocketDirection {
        self.direction
    }

    /// Socket type
    pub fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    /// Identifier of the group this socket belongs to
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Whether this is the untyped placeholder of a socket group
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// Stored default value
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Typed copy of the stored default value
    pub fn value_as<T: SocketValue>(&self) -> Option<T> {
        self.value.as_ref().and_then(|value| value.get::<T>().ok())
    }

    /// Soft minimum
    pub fn min(&self) -> Option<&Value> {
        self.min.as_ref()
    }

    /// Soft maximum
    pub fn max(&self) -> Option<&Value> {
        self.max.as_ref()
    }

    /// Links attached to this socket, from the topology cache
    pub fn directly_linked_links(&self) -> &[LinkId] {
        &self.linked_links
    }

    /// Sockets on the other end of attached links, from the topology cache
    pub fn directly_linked_sockets(&self) -> &[SocketId] {
        &self.linked_sockets
    }

    /// Whether any link is attached
    pub fn is_linked(&self) -> bool {
        !self.linked_links.is_empty()
    }
}
