// SPDX-License-Identifier: MIT OR Apache-2.0
//! Topology cache: flat socket lists, adjacency and topological orders.

use crate::node::NodeId;
use crate::socket::{SocketDirection, SocketId};
use crate::tree::NodeTree;
use std::collections::HashMap;

/// Direction of a topological traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToposortDirection {
    /// Producers before consumers
    LeftToRight,
    /// Consumers before producers
    RightToLeft,
}

#[derive(Debug, Clone, Copy, Default)]
struct ToposortNodeState {
    is_done: bool,
    is_in_stack: bool,
}

/// Explicit DFS stack frame
struct Item {
    node: NodeId,
    socket_index: usize,
    link_index: usize,
}

impl Item {
    fn new(node: NodeId) -> Self {
        Self {
            node,
            socket_index: 0,
            link_index: 0,
        }
    }
}

impl NodeTree {
    /// Recompute the cache from the current nodes, sockets and links
    pub fn ensure_topology_cache(&mut self) {
        self.update_socket_vectors();
        self.update_directly_linked_links_and_sockets();
        let (left_to_right, cycle_left) = self.toposort(ToposortDirection::LeftToRight);
        let (right_to_left, cycle_right) = self.toposort(ToposortDirection::RightToLeft);
        self.toposort_left_to_right = left_to_right;
        self.toposort_right_to_left = right_to_left;
        self.has_cycle = cycle_left || cycle_right;
    }

    /// Producers-first node order
    pub fn toposort_left_to_right(&self) -> &[NodeId] {
        &self.toposort_left_to_right
    }

    /// Consumers-first node order
    pub fn toposort_right_to_left(&self) -> &[NodeId] {
        &self.toposort_right_to_left
    }

    /// Whether the links form a cycle
    pub fn has_cycle(&self) -> bool {
        self.has_cycle
    }

    /// All input sockets in tree order
    pub fn input_sockets(&self) -> &[SocketId] {
        &self.input_sockets
    }

    /// All output sockets in tree order
    pub fn output_sockets(&self) -> &[SocketId] {
        &self.output_sockets
    }

    fn update_socket_vectors(&mut self) {
        self.input_sockets.clear();
        self.output_sockets.clear();
        for socket in self.sockets.values() {
            match socket.direction {
                SocketDirection::Input => self.input_sockets.push(socket.id),
                SocketDirection::Output => self.output_sockets.push(socket.id),
            }
        }
    }

    fn update_directly_linked_links_and_sockets(&mut self) {
        for socket in self.sockets.values_mut() {
            socket.linked_links.clear();
            socket.linked_sockets.clear();
        }
        for node in self.nodes.values_mut() {
            node.has_linked_inputs = false;
            node.has_linked_outputs = false;
        }
        for link in self.links.values() {
            if let Some(from) = self.sockets.get_mut(&link.from_socket) {
                from.linked_links.push(link.id);
                from.linked_sockets.push(link.to_socket);
            }
            if let Some(to) = self.sockets.get_mut(&link.to_socket) {
                to.linked_links.push(link.id);
                to.linked_sockets.push(link.from_socket);
            }
            if let Some(node) = self.nodes.get_mut(&link.from_node) {
                node.has_linked_outputs = true;
            }
            if let Some(node) = self.nodes.get_mut(&link.to_node) {
                node.has_linked_inputs = true;
            }
        }
    }

    /// Sort nodes, returning the order and whether a cycle was found.
    ///
    /// Nodes caught in a cycle are still appended once the seeded walks are
    /// exhausted, so the order always covers every node.
    pub(crate) fn toposort(&self, direction: ToposortDirection) -> (Vec<NodeId>, bool) {
        let mut states: HashMap<NodeId, ToposortNodeState> = HashMap::with_capacity(self.nodes.len());
        let mut sorted = Vec::with_capacity(self.nodes.len());
        let mut cycle = false;

        for (id, node) in &self.nodes {
            if states.get(id).is_some_and(|state| state.is_done) {
                continue;
            }
            let is_start = match direction {
                ToposortDirection::LeftToRight => !node.has_linked_outputs,
                ToposortDirection::RightToLeft => !node.has_linked_inputs,
            };
            if is_start {
                self.toposort_from_start_node(direction, *id, &mut states, &mut sorted, &mut cycle);
            }
        }

        if sorted.len() < self.nodes.len() {
            cycle = true;
            for id in self.nodes.keys() {
                if states.get(id).is_some_and(|state| state.is_done) {
                    continue;
                }
                self.toposort_from_start_node(direction, *id, &mut states, &mut sorted, &mut cycle);
            }
        }

        (sorted, cycle)
    }

    fn toposort_from_start_node(
        &self,
        direction: ToposortDirection,
        start: NodeId,
        states: &mut HashMap<NodeId, ToposortNodeState>,
        sorted: &mut Vec<NodeId>,
        cycle: &mut bool,
    ) {
        let mut stack = vec![Item::new(start)];
        states.entry(start).or_default().is_in_stack = true;

        while let Some(item) = stack.last_mut() {
            let node_id = item.node;
            let Some(node) = self.nodes.get(&node_id) else {
                stack.pop();
                continue;
            };
            let sockets = match direction {
                ToposortDirection::LeftToRight => &node.inputs,
                ToposortDirection::RightToLeft => &node.outputs,
            };

            let mut pushed = None;
            while let Some(socket) = sockets.get(item.socket_index) {
                let linked = self
                    .sockets
                    .get(socket)
                    .map_or(&[][..], |s| s.linked_sockets.as_slice());
                let Some(linked_socket) = linked.get(item.link_index) else {
                    item.socket_index += 1;
                    item.link_index = 0;
                    continue;
                };
                let Some(linked_node) = self.sockets.get(linked_socket).map(|s| s.node) else {
                    item.link_index += 1;
                    continue;
                };
                let state = states.entry(linked_node).or_default();
                if state.is_done {
                    item.link_index += 1;
                    continue;
                }
                if state.is_in_stack {
                    *cycle = true;
                } else {
                    state.is_in_stack = true;
                    pushed = Some(linked_node);
                }
                break;
            }

            match pushed {
                Some(next) => stack.push(Item::new(next)),
                None => {
                    let state = states.entry(node_id).or_default();
                    state.is_done = true;
                    state.is_in_stack = false;
                    sorted.push(node_id);
                    stack.pop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::NodeTreeDescriptor;
    use crate::node::NodeTypeInfo;
    use std::sync::Arc;

    fn descriptor() -> Arc<NodeTreeDescriptor> {
        let mut descriptor = NodeTreeDescriptor::new();
        descriptor
            .register_node(NodeTypeInfo::new("pass").with_declare(|b| {
                b.add_input::<i32>("a");
                b.add_input::<i32>("b");
                b.add_output::<i32>("out");
            }))
            .unwrap();
        Arc::new(descriptor)
    }

    fn link(tree: &mut NodeTree, from: NodeId, to: NodeId, input: &str) {
        let out = tree.output_socket(from, "out").unwrap();
        let input = tree.input_socket(to, input).unwrap();
        tree.add_link(out, input).unwrap();
    }

    fn position(order: &[NodeId], node: NodeId) -> usize {
        order.iter().position(|n| *n == node).unwrap()
    }

    #[test]
    fn test_diamond_order() {
        let mut tree = NodeTree::new(descriptor());
        let source = tree.add_node("pass").unwrap();
        let left = tree.add_node("pass").unwrap();
        let right = tree.add_node("pass").unwrap();
        let sink = tree.add_node("pass").unwrap();
        link(&mut tree, source, left, "a");
        link(&mut tree, source, right, "a");
        link(&mut tree, left, sink, "a");
        link(&mut tree, right, sink, "b");

        assert!(!tree.has_cycle());
        let order = tree.toposort_left_to_right();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], source);
        assert_eq!(order[3], sink);

        let reverse = tree.toposort_right_to_left();
        assert_eq!(reverse.len(), 4);
        assert_eq!(reverse[0], sink);
        assert_eq!(reverse[3], source);
    }

    #[test]
    fn test_every_link_respects_order() {
        let mut tree = NodeTree::new(descriptor());
        let nodes: Vec<NodeId> = (0..6).map(|_| tree.add_node("pass").unwrap()).collect();
        link(&mut tree, nodes[3], nodes[1], "a");
        link(&mut tree, nodes[1], nodes[0], "a");
        link(&mut tree, nodes[5], nodes[0], "b");
        link(&mut tree, nodes[2], nodes[4], "a");

        let order = tree.toposort_left_to_right().to_vec();
        assert_eq!(order.len(), nodes.len());
        for link in tree.links() {
            assert!(position(&order, link.from_node()) < position(&order, link.to_node()));
        }
    }

    #[test]
    fn test_cycle_detected_and_all_nodes_listed() {
        let mut tree = NodeTree::new(descriptor());
        let a = tree.add_node("pass").unwrap();
        let b = tree.add_node("pass").unwrap();
        let c = tree.add_node("pass").unwrap();
        link(&mut tree, a, b, "a");
        link(&mut tree, b, a, "a");
        link(&mut tree, b, c, "a");
        assert!(tree.has_cycle());
        assert_eq!(tree.toposort_left_to_right().len(), 3);
        assert_eq!(tree.toposort_right_to_left().len(), 3);

        // A pure loop has no start nodes at all
        let mut tree = NodeTree::new(descriptor());
        let a = tree.add_node("pass").unwrap();
        let b = tree.add_node("pass").unwrap();
        link(&mut tree, a, b, "a");
        link(&mut tree, b, a, "a");
        assert!(tree.has_cycle());
        assert_eq!(tree.toposort_left_to_right().len(), 2);
    }

    #[test]
    fn test_adjacency_cache() {
        let mut tree = NodeTree::new(descriptor());
        let a = tree.add_node("pass").unwrap();
        let b = tree.add_node("pass").unwrap();
        link(&mut tree, a, b, "b");

        let out = tree.output_socket(a, "out").unwrap();
        let input = tree.input_socket(b, "b").unwrap();
        assert_eq!(tree.find_socket(out).unwrap().directly_linked_sockets(), &[input]);
        assert_eq!(tree.find_socket(input).unwrap().directly_linked_sockets(), &[out]);
        assert!(tree.find_node(a).unwrap().has_linked_outputs());
        assert!(!tree.find_node(a).unwrap().has_linked_inputs());
        assert!(tree.find_node(b).unwrap().has_linked_inputs());
        assert_eq!(tree.input_sockets().len(), 4);
        assert_eq!(tree.output_sockets().len(), 2);
    }
}
