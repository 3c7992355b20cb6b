// SPDX-License-Identifier: MIT OR Apache-2.0
//! Links between sockets.

use crate::node::NodeId;
use crate::socket::SocketId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a link, drawn from the tree-wide ID counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub u32);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a link in a conversion chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRoute {
    /// Plain link between two user sockets
    Direct,
    /// Source side of a conversion: user output to the conversion node input
    ConversionHead {
        /// The matching tail link
        next: LinkId,
        /// The invisible conversion node
        conversion_node: NodeId,
    },
    /// Target side of a conversion: conversion node output to user input
    ConversionTail {
        /// The matching head link
        head: LinkId,
    },
}

/// A directed link from an output socket to an input socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub(crate) id: LinkId,
    pub(crate) from_node: NodeId,
    pub(crate) from_socket: SocketId,
    pub(crate) to_node: NodeId,
    pub(crate) to_socket: SocketId,
    pub(crate) route: LinkRoute,
}

impl Link {
    /// Link ID
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Producing node
    pub fn from_node(&self) -> NodeId {
        self.from_node
    }

    /// Output socket
    pub fn from_socket(&self) -> SocketId {
        self.from_socket
    }

    /// Consuming node
    pub fn to_node(&self) -> NodeId {
        self.to_node
    }

    /// Input socket
    pub fn to_socket(&self) -> SocketId {
        self.to_socket
    }

    /// Conversion chain position
    pub fn route(&self) -> LinkRoute {
        self.route
    }

    /// Whether this link is shown to the user (conversion tails are not)
    pub fn is_visible(&self) -> bool {
        !matches!(self.route, LinkRoute::ConversionTail { .. })
    }

    /// Check if this link involves a specific node
    pub fn involves_node(&self, node: NodeId) -> bool {
        self.from_node == node || self.to_node == node
    }

    /// Check if this link involves a specific socket
    pub fn involves_socket(&self, socket: SocketId) -> bool {
        self.from_socket == socket || self.to_socket == socket
    }
}
