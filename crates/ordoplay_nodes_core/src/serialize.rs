// SPDX-License-Identifier: MIT OR Apache-2.0
//! JSON snapshots of a node tree.
//!
//! A snapshot has three maps keyed by stringified ID: `nodes_info`,
//! `links_info` and `sockets_info`. Conversion nodes and group placeholders
//! are left out; a conversion chain is written as one link from the user
//! output to the user input and rebuilt on load.

use crate::error::{GraphError, Result};
use crate::link::{LinkId, LinkRoute};
use crate::node::{Node, NodeId};
use crate::socket::{Socket, SocketDirection, SocketId};
use crate::tree::NodeTree;
use crate::types::SocketType;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct TreeSnapshot {
    #[serde(default)]
    nodes_info: BTreeMap<u32, NodeInfo>,
    #[serde(default)]
    links_info: BTreeMap<u32, LinkInfo>,
    #[serde(default)]
    sockets_info: BTreeMap<u32, SocketInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeInfo {
    #[serde(rename = "ID")]
    id: u32,
    id_name: String,
    #[serde(default)]
    inputs: BTreeMap<usize, u32>,
    #[serde(default)]
    outputs: BTreeMap<usize, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub_tree: Option<Box<TreeSnapshot>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LinkInfo {
    #[serde(rename = "ID")]
    id: u32,
    #[serde(rename = "StartPinID")]
    start_pin_id: u32,
    #[serde(rename = "EndPinID")]
    end_pin_id: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct SocketInfo {
    #[serde(rename = "ID")]
    id: u32,
    id_name: String,
    identifier: String,
    ui_name: String,
    in_out: SocketDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    socket_group_identifier: Option<String>,
}

fn value_to_json(value: &Value) -> Option<serde_json::Value> {
    match value {
        Value::Bool(v) => Some((*v).into()),
        Value::Int(v) => Some((*v).into()),
        Value::Float(v) => Some((*v).into()),
        Value::Double(v) => Some((*v).into()),
        Value::String(v) => Some(v.clone().into()),
        _ => None,
    }
}

fn value_from_json(socket_type: SocketType, json: &serde_json::Value) -> Option<Value> {
    match socket_type.name() {
        "bool" => json.as_bool().map(Value::Bool),
        "int" => json.as_i64().and_then(|v| i32::try_from(v).ok()).map(Value::Int),
        "float" => json.as_f64().map(|v| Value::Float(v as f32)),
        "double" => json.as_f64().map(Value::Double),
        "string" => json.as_str().map(Value::from),
        _ => None,
    }
}

impl NodeTree {
    /// Write a snapshot of the visible graph. `indent` pretty-prints with
    /// that many spaces, `None` writes compact JSON.
    pub fn serialize(&self, indent: Option<usize>) -> Result<String> {
        let snapshot = self.snapshot_of(&|_| true);
        let json = match indent {
            None => serde_json::to_string(&snapshot)?,
            Some(width) => {
                let indent = vec![b' '; width];
                let mut buffer = Vec::new();
                let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent);
                let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
                snapshot.serialize(&mut serializer)?;
                String::from_utf8_lossy(&buffer).into_owned()
            }
        };
        Ok(json)
    }

    /// Snapshot of the visible nodes accepted by `keep` and the links among them
    pub(crate) fn snapshot_of(&self, keep: &dyn Fn(NodeId) -> bool) -> TreeSnapshot {
        let mut snapshot = TreeSnapshot::default();

        for node in self.nodes.values().filter(|node| !node.is_invisible() && keep(node.id)) {
            let mut info = NodeInfo {
                id: node.id.0,
                id_name: node.id_name().to_string(),
                inputs: BTreeMap::new(),
                outputs: BTreeMap::new(),
                sub_tree: node
                    .sub_tree
                    .as_deref()
                    .map(|body| Box::new(body.snapshot_of(&|_| true))),
            };
            for (direction, sockets) in [
                (SocketDirection::Input, &node.inputs),
                (SocketDirection::Output, &node.outputs),
            ] {
                let persisted = sockets
                    .iter()
                    .filter_map(|id| self.sockets.get(id))
                    .filter(|socket| !socket.placeholder);
                for (index, socket) in persisted.enumerate() {
                    match direction {
                        SocketDirection::Input => info.inputs.insert(index, socket.id.0),
                        SocketDirection::Output => info.outputs.insert(index, socket.id.0),
                    };
                    snapshot.sockets_info.insert(socket.id.0, socket_info(socket));
                }
            }
            snapshot.nodes_info.insert(node.id.0, info);
        }

        for link in self.links.values() {
            let end = match link.route {
                LinkRoute::Direct => link.to_socket,
                LinkRoute::ConversionHead { next, .. } => match self.links.get(&next) {
                    Some(tail) => tail.to_socket,
                    None => continue,
                },
                LinkRoute::ConversionTail { .. } => continue,
            };
            let end_node = self.sockets.get(&end).map(|socket| socket.node);
            if !keep(link.from_node) || !end_node.is_some_and(keep) {
                continue;
            }
            snapshot.links_info.insert(
                link.id.0,
                LinkInfo {
                    id: link.id.0,
                    start_pin_id: link.from_socket.0,
                    end_pin_id: end.0,
                },
            );
        }
        snapshot
    }

    /// Replace the tree contents with a snapshot.
    ///
    /// The snapshot is parsed and checked for dangling socket references
    /// before the tree is touched. Nodes of unknown types and links that no
    /// longer validate are skipped with a warning.
    pub fn deserialize(&mut self, json: &str) -> Result<()> {
        let snapshot: TreeSnapshot = serde_json::from_str(json)?;
        snapshot.validate()?;
        self.load_snapshot(&snapshot);
        Ok(())
    }

    /// Replace the tree contents with an already validated snapshot
    pub(crate) fn load_snapshot(&mut self, snapshot: &TreeSnapshot) {
        self.clear();

        for id in snapshot
            .nodes_info
            .values()
            .map(|n| n.id)
            .chain(snapshot.sockets_info.values().map(|s| s.id))
            .chain(snapshot.links_info.values().map(|l| l.id))
        {
            self.ids.reserve(id);
        }

        for info in snapshot.nodes_info.values() {
            let node_id = NodeId(info.id);
            let Some(type_info) = self.descriptor.get_node_type(&info.id_name).cloned() else {
                tracing::warn!("Skipping node {} of unknown type {}", node_id, info.id_name);
                continue;
            };
            if self.nodes.contains_key(&node_id) {
                tracing::warn!("Skipping duplicate node {}", node_id);
                continue;
            }

            let mut node = Node::new(node_id, type_info);
            for (direction, ids) in [
                (SocketDirection::Input, &info.inputs),
                (SocketDirection::Output, &info.outputs),
            ] {
                for raw in ids.values() {
                    let socket_id = SocketId(*raw);
                    let Some(socket_info) = snapshot.sockets_info.get(raw) else {
                        continue;
                    };
                    if socket_info.in_out != direction || self.sockets.contains_key(&socket_id) {
                        tracing::warn!("Skipping inconsistent socket {}", socket_id);
                        continue;
                    }
                    let socket_type = self.descriptor.types().resolve(&socket_info.id_name).unwrap_or_else(|| {
                        tracing::warn!("Socket {} has unregistered type {}", socket_id, socket_info.id_name);
                        SocketType::Any
                    });
                    let mut socket = Socket::new(
                        socket_id,
                        node_id,
                        &socket_info.identifier,
                        &socket_info.ui_name,
                        direction,
                        socket_type,
                    );
                    socket.group.clone_from(&socket_info.socket_group_identifier);
                    if let Some(value) = socket_info
                        .value
                        .as_ref()
                        .and_then(|json| value_from_json(socket_type, json))
                    {
                        socket.value = Some(value);
                    }
                    self.sockets.insert(socket_id, socket);
                    match direction {
                        SocketDirection::Input => node.inputs.push(socket_id),
                        SocketDirection::Output => node.outputs.push(socket_id),
                    }
                }
            }
            if let Some(body) = &info.sub_tree {
                let mut sub_tree = NodeTree::new(Arc::clone(&self.descriptor));
                sub_tree.load_snapshot(body);
                node.sub_tree = Some(Box::new(sub_tree));
            }
            self.nodes.insert(node_id, node);
            self.reconcile_node(node_id);
            self.ensure_group_body(node_id);
        }

        for info in snapshot.links_info.values() {
            let restored = self.add_link_with_id(
                SocketId(info.start_pin_id),
                SocketId(info.end_pin_id),
                Some(LinkId(info.id)),
            );
            if let Err(err) = restored {
                tracing::warn!("Skipping link {}: {}", info.id, err);
            }
        }

        self.set_dirty(true);
        self.ensure_topology_cache();
        tracing::info!(
            "Loaded tree with {} nodes and {} links",
            self.node_count(),
            self.link_count()
        );
    }
}

impl TreeSnapshot {
    /// Reject snapshots whose maps disagree with the entries they hold
    fn validate(&self) -> Result<()> {
        let keyed = self
            .nodes_info
            .iter()
            .map(|(key, n)| (*key, n.id))
            .chain(self.links_info.iter().map(|(key, l)| (*key, l.id)))
            .chain(self.sockets_info.iter().map(|(key, s)| (*key, s.id)));
        for (key, id) in keyed {
            if key != id {
                return Err(GraphError::MalformedSnapshot(format!(
                    "entry {key} carries ID {id}"
                )));
            }
        }
        for node in self.nodes_info.values() {
            let mut referenced = node.inputs.values().chain(node.outputs.values());
            if let Some(missing) = referenced.find(|id| !self.sockets_info.contains_key(*id)) {
                return Err(GraphError::MalformedSnapshot(format!(
                    "node {} references missing socket {}",
                    node.id, missing
                )));
            }
            if let Some(body) = &node.sub_tree {
                body.validate()?;
            }
        }
        Ok(())
    }
}

fn socket_info(socket: &Socket) -> SocketInfo {
    SocketInfo {
        id: socket.id.0,
        id_name: socket.socket_type.name().to_string(),
        identifier: socket.identifier.clone(),
        ui_name: socket.ui_name.clone(),
        in_out: socket.direction,
        value: socket.value.as_ref().and_then(value_to_json),
        socket_group_identifier: socket.group.clone(),
    }
}
