// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node groups.
//!
//! A `node_group` node owns a sub-tree. Its `Inputs` sockets pair up by
//! identifier with the `Outputs` sockets of the sub-tree's `node_group_in`
//! node, and its `Outputs` sockets with the `Inputs` sockets of the
//! sub-tree's `node_group_out` node.

use crate::descriptor::NodeTreeDescriptor;
use crate::error::{GraphError, Result};
use crate::link::LinkRoute;
use crate::node::{NodeId, NodeTypeInfo};
use crate::socket::{Socket, SocketId};
use crate::tree::NodeTree;
use crate::types::SocketType;
use std::collections::HashSet;
use std::sync::Arc;

/// Type name of the group node
pub const NODE_GROUP: &str = "node_group";
/// Type name of the node feeding group inputs into the sub-tree
pub const NODE_GROUP_IN: &str = "node_group_in";
/// Type name of the node collecting group outputs from the sub-tree
pub const NODE_GROUP_OUT: &str = "node_group_out";
/// Identifier of the input socket group on group nodes
pub const GROUP_INPUTS: &str = "Inputs";
/// Identifier of the output socket group on group nodes
pub const GROUP_OUTPUTS: &str = "Outputs";

/// Register the `node_group` / `node_group_in` / `node_group_out` node types
pub fn register_group_nodes(descriptor: &mut NodeTreeDescriptor) -> Result<()> {
    descriptor
        .register_node(
            NodeTypeInfo::new(NODE_GROUP)
                .with_ui_name("Group")
                .with_declare(|b| {
                    b.add_input_group(GROUP_INPUTS);
                    b.add_output_group(GROUP_OUTPUTS);
                }),
        )?
        .register_node(
            NodeTypeInfo::new(NODE_GROUP_IN)
                .with_ui_name("Group In")
                .with_declare(|b| {
                    b.add_output_group(GROUP_OUTPUTS);
                }),
        )?
        .register_node(
            NodeTypeInfo::new(NODE_GROUP_OUT)
                .with_ui_name("Group Out")
                .with_declare(|b| {
                    b.add_input_group(GROUP_INPUTS);
                }),
        )?;
    Ok(())
}

/// One grouped socket with links leaving the selection
struct Boundary {
    inside: SocketId,
    socket_type: SocketType,
    identifier: String,
    ui_name: String,
    outside: Vec<SocketId>,
}

fn push_boundary(boundaries: &mut Vec<Boundary>, inside: &Socket, outside: SocketId) {
    match boundaries.iter_mut().find(|b| b.inside == inside.id) {
        Some(boundary) => boundary.outside.push(outside),
        None => boundaries.push(Boundary {
            inside: inside.id,
            socket_type: inside.socket_type,
            identifier: inside.identifier.clone(),
            ui_name: inside.ui_name.clone(),
            outside: vec![outside],
        }),
    }
}

fn unique_identifier(taken: &mut HashSet<String>, base: &str) -> String {
    let mut identifier = base.to_string();
    let mut suffix = 1;
    while !taken.insert(identifier.clone()) {
        identifier = format!("{base}{suffix}");
        suffix += 1;
    }
    identifier
}

impl NodeTree {
    /// The sub-tree of a group node
    pub fn group_body(&self, group: NodeId) -> Option<&NodeTree> {
        self.nodes.get(&group)?.sub_tree.as_deref()
    }

    /// The sub-tree of a group node, for editing
    pub fn group_body_mut(&mut self, group: NodeId) -> Option<&mut NodeTree> {
        self.nodes.get_mut(&group)?.sub_tree.as_deref_mut()
    }

    /// Move `nodes` into a new group node and return it.
    ///
    /// Links among the selected nodes move into the group's sub-tree. Each
    /// link crossing the selection is split in two: outside, it ends on a new
    /// socket of the group node; inside, it starts from the matching socket
    /// of the sub-tree's boundary node.
    pub fn group_up(&mut self, nodes: &[NodeId]) -> Result<NodeId> {
        if nodes.is_empty() {
            return Err(GraphError::InvalidGroup("no nodes selected"));
        }
        for id in nodes {
            let node = self.nodes.get(id).ok_or(GraphError::NodeNotFound(*id))?;
            if node.is_invisible() {
                return Err(GraphError::InvalidGroup("conversion nodes cannot be grouped"));
            }
        }
        for id_name in [NODE_GROUP, NODE_GROUP_IN, NODE_GROUP_OUT] {
            if self.descriptor.get_node_type(id_name).is_none() {
                return Err(GraphError::UnknownNodeType(id_name.to_string()));
            }
        }
        let selected: HashSet<NodeId> = nodes.iter().copied().collect();

        let mut upstream = Vec::new();
        let mut downstream = Vec::new();
        for link in self.links.values() {
            let end = match link.route {
                LinkRoute::Direct => link.to_socket,
                LinkRoute::ConversionHead { next, .. } => match self.links.get(&next) {
                    Some(tail) => tail.to_socket,
                    None => continue,
                },
                LinkRoute::ConversionTail { .. } => continue,
            };
            let (Some(start), Some(end)) = (self.sockets.get(&link.from_socket), self.sockets.get(&end)) else {
                continue;
            };
            match (selected.contains(&start.node), selected.contains(&end.node)) {
                (false, true) => push_boundary(&mut upstream, end, start.id),
                (true, false) => push_boundary(&mut downstream, start, end.id),
                _ => {}
            }
        }

        let mut body = NodeTree::new(Arc::clone(&self.descriptor));
        body.load_snapshot(&self.snapshot_of(&|id| selected.contains(&id)));
        let group_in = body.add_node(NODE_GROUP_IN)?;
        let group_out = body.add_node(NODE_GROUP_OUT)?;

        for id in &selected {
            self.delete_node(*id);
        }
        let group = self.add_node(NODE_GROUP)?;

        let mut input_names = HashSet::from([GROUP_INPUTS.to_string()]);
        for boundary in &upstream {
            let identifier = unique_identifier(&mut input_names, &boundary.identifier);
            let outer = self.group_add_socket(
                group,
                GROUP_INPUTS,
                boundary.socket_type,
                &identifier,
                &boundary.ui_name,
            )?;
            let inner = body.group_add_socket(
                group_in,
                GROUP_OUTPUTS,
                boundary.socket_type,
                &identifier,
                &boundary.ui_name,
            )?;
            for outside in &boundary.outside {
                self.add_link(*outside, outer)?;
            }
            body.add_link(inner, boundary.inside)?;
        }

        let mut output_names = HashSet::from([GROUP_OUTPUTS.to_string()]);
        for boundary in &downstream {
            let identifier = unique_identifier(&mut output_names, &boundary.identifier);
            let outer = self.group_add_socket(
                group,
                GROUP_OUTPUTS,
                boundary.socket_type,
                &identifier,
                &boundary.ui_name,
            )?;
            let inner = body.group_add_socket(
                group_out,
                GROUP_INPUTS,
                boundary.socket_type,
                &identifier,
                &boundary.ui_name,
            )?;
            for outside in &boundary.outside {
                self.add_link(outer, *outside)?;
            }
            body.add_link(boundary.inside, inner)?;
        }

        if let Some(node) = self.nodes.get_mut(&group) {
            node.sub_tree = Some(Box::new(body));
        }
        self.set_dirty(true);
        tracing::info!(
            "Grouped {} nodes into node {} ({} inputs, {} outputs)",
            selected.len(),
            group,
            upstream.len(),
            downstream.len()
        );
        Ok(group)
    }

    /// Give a group node without a sub-tree an empty one
    pub(crate) fn ensure_group_body(&mut self, id: NodeId) {
        let needs_body = self
            .nodes
            .get(&id)
            .is_some_and(|node| node.id_name() == NODE_GROUP && node.sub_tree.is_none());
        if !needs_body {
            return;
        }
        let mut body = NodeTree::new(Arc::clone(&self.descriptor));
        for id_name in [NODE_GROUP_IN, NODE_GROUP_OUT] {
            if let Err(err) = body.add_node(id_name) {
                tracing::warn!("Group node {} has no {}: {}", id, id_name, err);
            }
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.sub_tree = Some(Box::new(body));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::SocketDirection;

    fn descriptor() -> Arc<NodeTreeDescriptor> {
        let mut descriptor = NodeTreeDescriptor::new();
        descriptor
            .register_node(NodeTypeInfo::new("source").with_declare(|b| {
                b.add_output::<i32>("out");
            }))
            .unwrap()
            .register_node(NodeTypeInfo::new("double").with_declare(|b| {
                b.add_input::<i32>("value");
                b.add_output::<i32>("out");
            }))
            .unwrap()
            .register_node(NodeTypeInfo::new("float_sink").with_declare(|b| {
                b.add_input::<f32>("value");
            }))
            .unwrap()
            .register_conversion::<i32, f32, _>(|from, to| {
                *to = *from as f32;
                true
            })
            .unwrap();
        register_group_nodes(&mut descriptor).unwrap();
        Arc::new(descriptor)
    }

    fn connect(tree: &mut NodeTree, from: NodeId, to: NodeId, input: &str) {
        let out = tree.output_socket(from, "out").unwrap();
        let input = tree.input_socket(to, input).unwrap();
        tree.add_link(out, input).unwrap();
    }

    fn group_sockets(tree: &NodeTree, node: NodeId, direction: SocketDirection) -> Vec<String> {
        let node = tree.find_node(node).unwrap();
        let sockets = match direction {
            SocketDirection::Input => node.inputs(),
            SocketDirection::Output => node.outputs(),
        };
        sockets
            .iter()
            .filter_map(|id| tree.find_socket(*id))
            .filter(|socket| !socket.is_placeholder())
            .map(|socket| socket.identifier().to_string())
            .collect()
    }

    #[test]
    fn test_new_group_has_boundary_nodes() {
        let mut tree = NodeTree::new(descriptor());
        let group = tree.add_node(NODE_GROUP).unwrap();
        let body = tree.group_body(group).unwrap();
        let names: Vec<&str> = body.nodes().map(|node| node.id_name()).collect();
        assert_eq!(names, vec![NODE_GROUP_IN, NODE_GROUP_OUT]);
    }

    #[test]
    fn test_group_up_reroutes_boundary_links() {
        let mut tree = NodeTree::new(descriptor());
        let source = tree.add_node("source").unwrap();
        let first = tree.add_node("double").unwrap();
        let second = tree.add_node("double").unwrap();
        let sink = tree.add_node("float_sink").unwrap();
        connect(&mut tree, source, first, "value");
        connect(&mut tree, first, second, "value");
        // int -> float goes through a conversion node
        connect(&mut tree, second, sink, "value");

        let group = tree.group_up(&[first, second]).unwrap();

        assert!(tree.find_node(first).is_none());
        assert!(tree.find_node(second).is_none());
        let visible: Vec<&str> = tree
            .nodes()
            .filter(|node| !node.is_invisible())
            .map(|node| node.id_name())
            .collect();
        assert_eq!(visible, vec!["source", "float_sink", NODE_GROUP]);
        assert_eq!(group_sockets(&tree, group, SocketDirection::Input), vec!["value"]);
        assert_eq!(group_sockets(&tree, group, SocketDirection::Output), vec!["out"]);

        // The conversion is rebuilt between the group and the sink
        let group_out = tree.output_socket(group, "out").unwrap();
        let sink_in = tree.input_socket(sink, "value").unwrap();
        assert_eq!(tree.find_socket(group_out).unwrap().socket_type(), SocketType::of::<i32>());
        assert!(tree.is_socket_linked(sink_in));
        assert_eq!(tree.nodes().filter(|node| node.is_invisible()).count(), 1);
        let group_in = tree.input_socket(group, "value").unwrap();
        let source_out = tree.output_socket(source, "out").unwrap();
        assert_eq!(tree.find_socket(group_in).unwrap().directly_linked_sockets(), &[source_out]);

        // Inside: group_in -> first -> second -> group_out
        let body = tree.group_body(group).unwrap();
        assert_eq!(body.node_count(), 4);
        assert_eq!(body.link_count(), 3);
        assert!(!body.has_cycle());
        let order: Vec<&str> = body
            .toposort_left_to_right()
            .iter()
            .filter_map(|id| body.find_node(*id))
            .map(|node| node.id_name())
            .collect();
        assert_eq!(order, vec![NODE_GROUP_IN, "double", "double", NODE_GROUP_OUT]);
    }

    #[test]
    fn test_shared_output_gets_one_group_socket() {
        let mut tree = NodeTree::new(descriptor());
        let source = tree.add_node("source").unwrap();
        let a = tree.add_node("double").unwrap();
        let b = tree.add_node("double").unwrap();
        let c = tree.add_node("double").unwrap();
        connect(&mut tree, source, a, "value");
        connect(&mut tree, source, b, "value");
        connect(&mut tree, a, c, "value");

        let group = tree.group_up(&[source]).unwrap();
        assert_eq!(group_sockets(&tree, group, SocketDirection::Output), vec!["out"]);
        let out = tree.output_socket(group, "out").unwrap();
        assert_eq!(tree.find_socket(out).unwrap().directly_linked_sockets().len(), 2);

        // Two boundary inputs with the same identifier stay distinct
        let group = tree.group_up(&[a, b]).unwrap();
        assert_eq!(
            group_sockets(&tree, group, SocketDirection::Input),
            vec!["value", "value1"]
        );
    }

    #[test]
    fn test_group_up_rejects_bad_selection() {
        let mut tree = NodeTree::new(descriptor());
        assert!(matches!(tree.group_up(&[]), Err(GraphError::InvalidGroup(_))));
        assert!(matches!(
            tree.group_up(&[NodeId(99)]),
            Err(GraphError::NodeNotFound(NodeId(99)))
        ));

        let source = tree.add_node("source").unwrap();
        let sink = tree.add_node("float_sink").unwrap();
        connect(&mut tree, source, sink, "value");
        let conversion = tree.nodes().find(|node| node.is_invisible()).unwrap().id();
        let nodes = tree.node_count();
        assert!(matches!(tree.group_up(&[conversion]), Err(GraphError::InvalidGroup(_))));
        assert_eq!(tree.node_count(), nodes);
    }

    #[test]
    fn test_group_survives_snapshot() {
        let mut tree = NodeTree::new(descriptor());
        let source = tree.add_node("source").unwrap();
        let inner = tree.add_node("double").unwrap();
        let sink = tree.add_node("float_sink").unwrap();
        connect(&mut tree, source, inner, "value");
        connect(&mut tree, inner, sink, "value");
        let group = tree.group_up(&[inner]).unwrap();

        let json = tree.serialize(Some(2)).unwrap();
        let mut restored = NodeTree::new(descriptor());
        restored.deserialize(&json).unwrap();
        assert_eq!(restored.serialize(Some(2)).unwrap(), json);

        let body = restored.group_body(group).unwrap();
        assert_eq!(body.node_count(), 3);
        assert_eq!(body.link_count(), 2);
    }
}
