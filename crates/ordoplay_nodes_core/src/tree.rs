// SPDX-License-Identifier: MIT OR Apache-2.0
//! The mutable node tree.
//!
//! A [`NodeTree`] owns nodes, sockets and links in tree-ordered maps. Every
//! entity draws its ID from one counter, so IDs are unique across kinds and
//! never reused while the tree lives. Each mutation marks the tree dirty and
//! refreshes the topology cache before returning.

use crate::declaration::{DeclarationItem, SocketDeclaration, SocketGroupDeclaration};
use crate::descriptor::NodeTreeDescriptor;
use crate::error::{GraphError, Result};
use crate::link::{Link, LinkId, LinkRoute};
use crate::node::{Node, NodeId, NodeTypeInfo};
use crate::socket::{Socket, SocketDirection, SocketId};
use crate::types::SocketType;
use crate::value::{TypeError, Value};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;

/// Allocator for the shared node/socket/link ID space
#[derive(Debug, Clone)]
pub(crate) struct IdAllocator {
    used: HashSet<u32>,
    current: u32,
}

impl IdAllocator {
    fn new() -> Self {
        Self {
            used: HashSet::new(),
            current: 1,
        }
    }

    /// Next free ID, skipping reserved ones
    pub(crate) fn next(&mut self) -> u32 {
        while self.used.contains(&self.current) {
            self.current += 1;
        }
        let id = self.current;
        self.used.insert(id);
        self.current += 1;
        id
    }

    /// Mark an ID as taken
    pub(crate) fn reserve(&mut self, id: u32) {
        self.used.insert(id);
    }
}

/// A planned link, validated before anything is mutated
struct LinkPlan {
    from: SocketId,
    to: SocketId,
    from_placeholder: bool,
    to_placeholder: bool,
    conversion: Option<Arc<NodeTypeInfo>>,
}

/// A typed node graph
#[derive(Debug)]
pub struct NodeTree {
    pub(crate) descriptor: Arc<NodeTreeDescriptor>,
    pub(crate) nodes: IndexMap<NodeId, Node>,
    pub(crate) sockets: IndexMap<SocketId, Socket>,
    pub(crate) links: IndexMap<LinkId, Link>,
    pub(crate) ids: IdAllocator,
    pub(crate) input_sockets: Vec<SocketId>,
    pub(crate) output_sockets: Vec<SocketId>,
    pub(crate) toposort_left_to_right: Vec<NodeId>,
    pub(crate) toposort_right_to_left: Vec<NodeId>,
    pub(crate) has_cycle: bool,
    dirty: bool,
}

impl NodeTree {
    /// Create a new empty tree over a catalog
    pub fn new(descriptor: Arc<NodeTreeDescriptor>) -> Self {
        Self {
            descriptor,
            nodes: IndexMap::new(),
            sockets: IndexMap::new(),
            links: IndexMap::new(),
            ids: IdAllocator::new(),
            input_sockets: Vec::new(),
            output_sockets: Vec::new(),
            toposort_left_to_right: Vec::new(),
            toposort_right_to_left: Vec::new(),
            has_cycle: false,
            dirty: true,
        }
    }

    /// The catalog this tree instantiates from
    pub fn descriptor(&self) -> &Arc<NodeTreeDescriptor> {
        &self.descriptor
    }

    /// Whether the tree changed since the last compile
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Set the dirty flag
    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    /// Get a node by ID
    pub fn find_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Get a socket by ID
    pub fn find_socket(&self, id: SocketId) -> Option<&Socket> {
        self.sockets.get(&id)
    }

    /// Get a link by ID
    pub fn find_link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// All nodes in insertion order, conversion nodes included
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All sockets in insertion order
    pub fn sockets(&self) -> impl Iterator<Item = &Socket> {
        self.sockets.values()
    }

    /// All links in insertion order, conversion tails included
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of sockets
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Number of links
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Find a node's socket by identifier and direction
    pub fn node_socket(&self, node: NodeId, identifier: &str, direction: SocketDirection) -> Option<SocketId> {
        let node = self.nodes.get(&node)?;
        let sockets = match direction {
            SocketDirection::Input => &node.inputs,
            SocketDirection::Output => &node.outputs,
        };
        sockets
            .iter()
            .copied()
            .find(|id| self.sockets.get(id).is_some_and(|s| s.identifier == identifier))
    }

    /// Find a node's input socket by identifier
    pub fn input_socket(&self, node: NodeId, identifier: &str) -> Option<SocketId> {
        self.node_socket(node, identifier, SocketDirection::Input)
    }

    /// Find a node's output socket by identifier
    pub fn output_socket(&self, node: NodeId, identifier: &str) -> Option<SocketId> {
        self.node_socket(node, identifier, SocketDirection::Output)
    }

    /// Whether any link is attached to the socket
    pub fn is_socket_linked(&self, socket: SocketId) -> bool {
        self.links.values().any(|link| link.involves_socket(socket))
    }

    /// Instantiate a node of a registered type
    pub fn add_node(&mut self, id_name: &str) -> Result<NodeId> {
        let type_info = self
            .descriptor
            .get_node_type(id_name)
            .cloned()
            .ok_or_else(|| GraphError::UnknownNodeType(id_name.to_string()))?;
        let id = NodeId(self.ids.next());
        self.insert_node(id, type_info);
        tracing::debug!("Added node {} ({})", id, id_name);
        self.touch();
        Ok(id)
    }

    /// Delete a node with its sockets and links. Unknown IDs are a no-op.
    pub fn delete_node(&mut self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        if node.is_invisible() {
            let head = self.links.values().find_map(|link| match link.route {
                LinkRoute::ConversionHead { conversion_node, .. } if conversion_node == id => Some(link.id),
                _ => None,
            });
            if let Some(head) = head {
                self.remove_link_chain(head, false);
            }
        }
        self.remove_node_raw(id);
        tracing::debug!("Deleted node {}", id);
        self.touch();
        true
    }

    /// Check whether [`NodeTree::add_link`] would succeed
    pub fn can_create_link(&self, a: SocketId, b: SocketId) -> bool {
        self.plan_link(a, b).is_ok()
    }

    /// Link two sockets in either order.
    ///
    /// Placeholders on either side are materialized into typed group sockets.
    /// Mismatched types go through an invisible conversion node, in which case
    /// the returned ID is the head link of the chain. On error the tree is
    /// left unchanged.
    pub fn add_link(&mut self, a: SocketId, b: SocketId) -> Result<LinkId> {
        self.add_link_with_id(a, b, None)
    }

    pub(crate) fn add_link_with_id(&mut self, a: SocketId, b: SocketId, id: Option<LinkId>) -> Result<LinkId> {
        let plan = self.plan_link(a, b)?;
        let mut from = plan.from;
        let mut to = plan.to;
        if plan.from_placeholder {
            from = self.materialize_placeholder(from, to)?;
        }
        if plan.to_placeholder {
            to = self.materialize_placeholder(to, from)?;
        }

        let link_id = id.unwrap_or_else(|| LinkId(self.ids.next()));
        match plan.conversion {
            None => self.insert_link(link_id, from, to, LinkRoute::Direct),
            Some(type_info) => {
                let conversion_node = NodeId(self.ids.next());
                self.insert_node(conversion_node, type_info);
                let middle = self
                    .nodes
                    .get(&conversion_node)
                    .and_then(|node| Some((*node.inputs.first()?, *node.outputs.first()?)));
                let Some((middle_in, middle_out)) = middle else {
                    self.remove_node_raw(conversion_node);
                    return Err(GraphError::InvalidLink("conversion node has no sockets"));
                };
                let tail = LinkId(self.ids.next());
                self.insert_link(
                    link_id,
                    from,
                    middle_in,
                    LinkRoute::ConversionHead {
                        next: tail,
                        conversion_node,
                    },
                );
                self.insert_link(tail, middle_out, to, LinkRoute::ConversionTail { head: link_id });
            }
        }
        tracing::debug!("Linked socket {} to socket {} as link {}", from, to, link_id);
        self.touch();
        Ok(link_id)
    }

    /// Delete a link, or a whole conversion chain when given either of its
    /// links. Group sockets left without links are removed.
    pub fn delete_link(&mut self, id: LinkId) -> Result<()> {
        if !self.remove_link_chain(id, true) {
            return Err(GraphError::LinkNotFound(id));
        }
        tracing::debug!("Deleted link {}", id);
        self.touch();
        Ok(())
    }

    /// Delete every link attached to a socket. Returns how many user-visible
    /// links were removed.
    pub fn delete_socket_links(&mut self, socket: SocketId) -> usize {
        let attached: Vec<LinkId> = self
            .links
            .values()
            .filter(|link| link.involves_socket(socket))
            .map(Link::id)
            .collect();
        let removed = attached
            .into_iter()
            .filter(|id| self.remove_link_chain(*id, true))
            .count();
        if removed > 0 {
            tracing::debug!("Deleted {} link(s) of socket {}", removed, socket);
            self.touch();
        }
        removed
    }

    /// Set a socket's stored value, clamped into its soft range
    pub fn set_socket_value(&mut self, socket: SocketId, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let target = self
            .sockets
            .get_mut(&socket)
            .ok_or(GraphError::SocketNotFound(socket))?;
        if !target.socket_type.accepts(&value) {
            return Err(GraphError::ValueTypeMismatch {
                socket,
                source: TypeError::expected(target.socket_type.name(), value.type_name()),
            });
        }
        target.value = Some(value.clamped(target.min.as_ref(), target.max.as_ref()));
        self.dirty = true;
        Ok(())
    }

    /// A socket's stored value
    pub fn socket_value(&self, socket: SocketId) -> Option<&Value> {
        self.sockets.get(&socket).and_then(|s| s.value.as_ref())
    }

    /// Add a typed socket to a node's group, just before the placeholder
    pub fn group_add_socket(
        &mut self,
        node: NodeId,
        group: &str,
        socket_type: SocketType,
        identifier: &str,
        ui_name: &str,
    ) -> Result<SocketId> {
        let id = self.group_insert_socket(node, group, socket_type, identifier, ui_name)?;
        self.touch();
        Ok(id)
    }

    /// Remove a materialized group socket and its links
    pub fn group_remove_socket(&mut self, socket: SocketId) -> Result<()> {
        let target = self.sockets.get(&socket).ok_or(GraphError::SocketNotFound(socket))?;
        if target.group.is_none() || target.placeholder {
            return Err(GraphError::InvalidLink("socket is not a removable group socket"));
        }
        self.delete_socket(socket);
        self.touch();
        Ok(())
    }

    /// Rebuild a node's sockets from its current declaration
    pub fn refresh_node(&mut self, id: NodeId) -> Result<()> {
        if !self.nodes.contains_key(&id) {
            return Err(GraphError::NodeNotFound(id));
        }
        self.reconcile_node(id);
        self.touch();
        Ok(())
    }

    /// Swap in an updated catalog and reconcile every node against it.
    ///
    /// Nodes whose type vanished are deleted.
    pub fn reload_descriptor(&mut self, descriptor: Arc<NodeTreeDescriptor>) {
        self.descriptor = descriptor;
        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        for id in ids {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            match self.descriptor.get_node_type(node.id_name()).cloned() {
                Some(type_info) => {
                    if let Some(node) = self.nodes.get_mut(&id) {
                        node.type_info = type_info;
                    }
                    self.reconcile_node(id);
                    if let Some(body) = self.nodes.get_mut(&id).and_then(|node| node.sub_tree.as_deref_mut()) {
                        body.reload_descriptor(Arc::clone(&self.descriptor));
                    }
                }
                None => {
                    tracing::warn!("Node type {} is gone, deleting node {}", node.id_name(), id);
                    self.delete_node(id);
                }
            }
        }
        self.touch();
    }

    /// Remove every node, socket and link. IDs keep counting up.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.sockets.clear();
        self.links.clear();
        self.touch();
    }

    /// Deep copy through a snapshot round trip
    pub fn try_clone(&self) -> Result<Self> {
        let mut tree = Self::new(Arc::clone(&self.descriptor));
        tree.deserialize(&self.serialize(None)?)?;
        Ok(tree)
    }

    /// Mark dirty and refresh the topology cache
    fn touch(&mut self) {
        self.dirty = true;
        self.ensure_topology_cache();
    }

    /// Upstream producers of a node's inputs, from the topology cache
    pub(crate) fn upstream_nodes(&self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        node.inputs
            .iter()
            .filter_map(|socket| self.sockets.get(socket))
            .flat_map(|socket| socket.linked_sockets.iter())
            .filter_map(|linked| self.sockets.get(linked).map(|s| s.node))
            .collect()
    }

    pub(crate) fn insert_node(&mut self, id: NodeId, type_info: Arc<NodeTypeInfo>) {
        self.nodes.insert(id, Node::new(id, type_info));
        self.reconcile_node(id);
        self.ensure_group_body(id);
    }

    fn insert_link(&mut self, id: LinkId, from: SocketId, to: SocketId, route: LinkRoute) {
        let from_node = self.sockets.get(&from).map_or(NodeId(0), |s| s.node);
        let to_node = self.sockets.get(&to).map_or(NodeId(0), |s| s.node);
        self.links.insert(
            id,
            Link {
                id,
                from_node,
                from_socket: from,
                to_node,
                to_socket: to,
                route,
            },
        );
    }

    fn plan_link(&self, a: SocketId, b: SocketId) -> Result<LinkPlan> {
        let first = self.sockets.get(&a).ok_or(GraphError::SocketNotFound(a))?;
        let second = self.sockets.get(&b).ok_or(GraphError::SocketNotFound(b))?;
        if a == b {
            return Err(GraphError::InvalidLink("cannot link a socket to itself"));
        }
        if first.direction == second.direction {
            return Err(GraphError::InvalidLink("sockets have the same direction"));
        }
        if first.node == second.node {
            return Err(GraphError::InvalidLink("sockets belong to the same node"));
        }
        if first.placeholder && second.placeholder {
            return Err(GraphError::InvalidLink("cannot link two placeholders"));
        }
        let (output, input) = match first.direction {
            SocketDirection::Output => (first, second),
            SocketDirection::Input => (second, first),
        };
        if !input.placeholder && self.links.values().any(|link| link.to_socket == input.id) {
            return Err(GraphError::InputAlreadyLinked(input.id));
        }

        let from_type = if output.placeholder { input.socket_type } else { output.socket_type };
        let to_type = if input.placeholder { output.socket_type } else { input.socket_type };
        let conversion = if from_type == to_type || from_type.is_any() || to_type.is_any() {
            None
        } else {
            let name = NodeTreeDescriptor::conversion_node_name(from_type, to_type);
            let type_info = self
                .descriptor
                .can_convert(from_type, to_type)
                .then(|| self.descriptor.get_node_type(&name).cloned())
                .flatten()
                .ok_or_else(|| GraphError::IncompatibleTypes {
                    from: from_type.to_string(),
                    to: to_type.to_string(),
                })?;
            Some(type_info)
        };

        Ok(LinkPlan {
            from: output.id,
            to: input.id,
            from_placeholder: output.placeholder,
            to_placeholder: input.placeholder,
            conversion,
        })
    }

    /// Create a typed group socket mirroring the socket on the other end
    fn materialize_placeholder(&mut self, placeholder: SocketId, other: SocketId) -> Result<SocketId> {
        let target = self
            .sockets
            .get(&placeholder)
            .ok_or(GraphError::SocketNotFound(placeholder))?;
        let (node, group) = (target.node, target.group.clone().unwrap_or_default());
        let other = self.sockets.get(&other).ok_or(GraphError::SocketNotFound(other))?;
        let socket_type = other.socket_type;
        let base_identifier = other.identifier.clone();
        let ui_name = other.ui_name.clone();
        let identifier = format!("{}{}", base_identifier, self.ids.next());
        self.group_insert_socket(node, &group, socket_type, &identifier, &ui_name)
    }

    fn group_insert_socket(
        &mut self,
        node: NodeId,
        group: &str,
        socket_type: SocketType,
        identifier: &str,
        ui_name: &str,
    ) -> Result<SocketId> {
        let target = self.nodes.get(&node).ok_or(GraphError::NodeNotFound(node))?;
        let placeholder = target
            .sockets()
            .find(|id| {
                self.sockets
                    .get(id)
                    .is_some_and(|s| s.placeholder && s.group.as_deref() == Some(group))
            })
            .and_then(|id| self.sockets.get(&id))
            .ok_or_else(|| GraphError::UnknownSocketGroup {
                node,
                group: group.to_string(),
            })?;
        let (placeholder, direction) = (placeholder.id, placeholder.direction);
        let siblings = match direction {
            SocketDirection::Input => &target.inputs,
            SocketDirection::Output => &target.outputs,
        };
        if siblings
            .iter()
            .any(|id| self.sockets.get(id).is_some_and(|s| s.identifier == identifier))
        {
            return Err(GraphError::DuplicateSocketIdentifier {
                identifier: identifier.to_string(),
                direction,
            });
        }

        let id = SocketId(self.ids.next());
        let mut socket = Socket::new(id, node, identifier, ui_name, direction, socket_type);
        socket.group = Some(group.to_string());
        self.sockets.insert(id, socket);
        if let Some(target) = self.nodes.get_mut(&node) {
            let siblings = match direction {
                SocketDirection::Input => &mut target.inputs,
                SocketDirection::Output => &mut target.outputs,
            };
            let at = siblings
                .iter()
                .position(|s| *s == placeholder)
                .unwrap_or(siblings.len());
            siblings.insert(at, id);
        }
        Ok(id)
    }

    /// Match a node's sockets against its declaration.
    ///
    /// Sockets with matching identifier, direction and type are kept with
    /// their values and links. Group members are kept and every group ends
    /// with exactly one placeholder. Anything unmatched is deleted.
    pub(crate) fn reconcile_node(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let type_info = Arc::clone(&node.type_info);
        let old_inputs = node.inputs.clone();
        let old_outputs = node.outputs.clone();
        let mut new_inputs = Vec::with_capacity(old_inputs.len());
        let mut new_outputs = Vec::with_capacity(old_outputs.len());

        for item in type_info.declaration().items() {
            let (old, new) = match item.direction() {
                SocketDirection::Input => (&old_inputs, &mut new_inputs),
                SocketDirection::Output => (&old_outputs, &mut new_outputs),
            };
            match item {
                DeclarationItem::Socket(decl) => {
                    let reused = old.iter().copied().find(|socket| {
                        !new.contains(socket) && self.sockets.get(socket).is_some_and(|s| decl.matches(s))
                    });
                    let socket = match reused {
                        Some(socket) => {
                            if let Some(existing) = self.sockets.get_mut(&socket) {
                                existing.ui_name.clone_from(&decl.ui_name);
                                decl.update_default_value(existing);
                            }
                            socket
                        }
                        None => self.build_socket(id, decl),
                    };
                    new.push(socket);
                }
                DeclarationItem::Group(group) => {
                    let mut placeholder = None;
                    for socket in old {
                        let Some(existing) = self.sockets.get(socket) else {
                            continue;
                        };
                        if existing.group.as_deref() != Some(group.identifier.as_str()) {
                            continue;
                        }
                        if !existing.placeholder {
                            new.push(*socket);
                        } else if placeholder.is_none() {
                            placeholder = Some(*socket);
                        }
                    }
                    let placeholder = match placeholder {
                        Some(socket) => socket,
                        None => self.build_placeholder(id, group),
                    };
                    new.push(placeholder);
                }
            }
        }

        let stale: Vec<SocketId> = old_inputs
            .iter()
            .chain(&old_outputs)
            .copied()
            .filter(|socket| !new_inputs.contains(socket) && !new_outputs.contains(socket))
            .collect();
        if let Some(node) = self.nodes.get_mut(&id) {
            node.inputs = new_inputs;
            node.outputs = new_outputs;
        }
        for socket in stale {
            self.delete_socket(socket);
        }
    }

    fn build_socket(&mut self, node: NodeId, decl: &SocketDeclaration) -> SocketId {
        let id = SocketId(self.ids.next());
        let mut socket = Socket::new(id, node, &decl.identifier, &decl.ui_name, decl.direction, decl.socket_type);
        decl.update_default_value(&mut socket);
        self.sockets.insert(id, socket);
        id
    }

    fn build_placeholder(&mut self, node: NodeId, group: &SocketGroupDeclaration) -> SocketId {
        let id = SocketId(self.ids.next());
        let mut socket = Socket::new(id, node, &group.identifier, "", group.direction, SocketType::Any);
        socket.group = Some(group.identifier.clone());
        socket.placeholder = true;
        self.sockets.insert(id, socket);
        id
    }

    /// Remove a socket, its links and its entry in the owning node
    fn delete_socket(&mut self, id: SocketId) {
        let attached: Vec<LinkId> = self
            .links
            .values()
            .filter(|link| link.involves_socket(id))
            .map(|link| link.id)
            .collect();
        for link in attached {
            self.remove_link_chain(link, false);
        }
        if let Some(socket) = self.sockets.shift_remove(&id) {
            if let Some(node) = self.nodes.get_mut(&socket.node) {
                node.inputs.retain(|s| *s != id);
                node.outputs.retain(|s| *s != id);
            }
        }
    }

    fn remove_node_raw(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let sockets: Vec<SocketId> = node.sockets().collect();
        for socket in sockets {
            self.delete_socket(socket);
        }
        self.nodes.shift_remove(&id);
    }

    /// Remove a link; conversion chains go as a unit with their middle node
    fn remove_link_chain(&mut self, id: LinkId, release_group_sockets: bool) -> bool {
        let Some(link) = self.links.get(&id) else {
            return false;
        };
        let head = match link.route {
            LinkRoute::ConversionTail { head } => head,
            LinkRoute::Direct | LinkRoute::ConversionHead { .. } => id,
        };
        let Some(head_link) = self.links.get(&head).cloned() else {
            self.links.shift_remove(&id);
            return true;
        };

        let mut endpoints = vec![head_link.from_socket];
        let mut conversion = None;
        match head_link.route {
            LinkRoute::ConversionHead { next, conversion_node } => {
                if let Some(tail) = self.links.shift_remove(&next) {
                    endpoints.push(tail.to_socket);
                }
                conversion = Some(conversion_node);
            }
            LinkRoute::Direct | LinkRoute::ConversionTail { .. } => endpoints.push(head_link.to_socket),
        }
        self.links.shift_remove(&head);
        if let Some(node) = conversion {
            self.remove_node_raw(node);
        }
        if release_group_sockets {
            for socket in endpoints {
                self.release_group_socket(socket);
            }
        }
        true
    }

    /// Remove a group socket once its last link is gone
    fn release_group_socket(&mut self, id: SocketId) {
        let removable = self
            .sockets
            .get(&id)
            .is_some_and(|s| s.group.is_some() && !s.placeholder);
        if removable && !self.is_socket_linked(id) {
            self.delete_socket(id);
        }
    }
}
