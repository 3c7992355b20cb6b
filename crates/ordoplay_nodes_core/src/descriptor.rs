// SPDX-License-Identifier: MIT OR Apache-2.0
//! Catalog of node types, value types and conversions shared by trees.

use crate::error::{GraphError, NodeExecError, Result};
use crate::node::NodeTypeInfo;
use crate::types::{SocketType, TypeRegistry};
use crate::value::SocketValue;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Registry of node types available to a tree
#[derive(Clone)]
pub struct NodeTreeDescriptor {
    types: TypeRegistry,
    node_types: IndexMap<String, Arc<NodeTypeInfo>>,
    conversion_nodes: HashSet<String>,
}

impl NodeTreeDescriptor {
    /// Create a new catalog with the primitive value types registered
    pub fn new() -> Self {
        Self::with_types(TypeRegistry::with_primitives())
    }

    /// Create a new catalog over an existing type registry
    pub fn with_types(types: TypeRegistry) -> Self {
        Self {
            types,
            node_types: IndexMap::new(),
            conversion_nodes: HashSet::new(),
        }
    }

    /// The value type registry
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Register a value type
    pub fn register_type<T: SocketValue>(&mut self) -> &mut Self {
        self.types.register_type::<T>();
        self
    }

    /// Register a node type, replacing any previous type with the same name
    pub fn register_node(&mut self, mut info: NodeTypeInfo) -> Result<&mut Self> {
        info.build_declaration()?;
        validate_types(&self.types, &info)?;
        tracing::debug!("Registered node type {}", info.id_name);
        self.node_types.insert(info.id_name.clone(), Arc::new(info));
        Ok(self)
    }

    /// Register a conversion from `A` to `B` together with its invisible node type
    pub fn register_conversion<A, B, F>(&mut self, convert: F) -> Result<&mut Self>
    where
        A: SocketValue,
        B: SocketValue,
        F: Fn(&A, &mut B) -> bool + Send + Sync + 'static,
    {
        let from = SocketType::of::<A>();
        let to = SocketType::of::<B>();
        self.types.register_conversion::<A, B, F>(convert);
        let converter = self
            .types
            .conversion(from, to)
            .ok_or_else(|| GraphError::IncompatibleTypes {
                from: from.to_string(),
                to: to.to_string(),
            })?;

        let name = Self::conversion_node_name(from, to);
        let info = NodeTypeInfo::new(name.clone())
            .with_ui_name("invisible")
            .invisible()
            .with_declare(|b| {
                b.add_input::<A>("input");
                b.add_output::<B>("output");
            })
            .with_execute(move |params| {
                let output = converter(params.input_value("input")?)
                    .ok_or_else(|| NodeExecError(format!("Conversion from {from} to {to} failed")))?;
                params.set_output_value("output", output)
            });
        self.register_node(info)?;
        self.conversion_nodes.insert(name);
        Ok(self)
    }

    /// Look up a node type by name, including invisible ones
    pub fn get_node_type(&self, id_name: &str) -> Option<&Arc<NodeTypeInfo>> {
        self.node_types.get(id_name)
    }

    /// Visible node types in registration order
    pub fn node_types(&self) -> impl Iterator<Item = &Arc<NodeTypeInfo>> {
        self.node_types.values().filter(|info| !info.invisible)
    }

    /// Name of the conversion node type for an ordered type pair
    pub fn conversion_node_name(from: SocketType, to: SocketType) -> String {
        format!("conv_{}_to_{}", from.name(), to.name())
    }

    /// Whether a link from `from` to `to` can be made, directly or through a conversion
    pub fn can_convert(&self, from: SocketType, to: SocketType) -> bool {
        if from == to || from.is_any() || to.is_any() {
            return true;
        }
        self.conversion_nodes
            .contains(&Self::conversion_node_name(from, to))
    }

    /// Re-run a node type's declare callback. Trees pick up the change on
    /// [`NodeTree::reload_descriptor`](crate::NodeTree::reload_descriptor).
    pub fn redeclare(&mut self, id_name: &str) -> Result<()> {
        let info = self
            .node_types
            .get_mut(id_name)
            .ok_or_else(|| GraphError::UnknownNodeType(id_name.to_string()))?;
        let mut updated = (**info).clone();
        updated.build_declaration()?;
        validate_types(&self.types, &updated)?;
        *info = Arc::new(updated);
        Ok(())
    }
}

fn validate_types(types: &TypeRegistry, info: &NodeTypeInfo) -> Result<()> {
    let declaration = info.declaration();
    for socket in declaration.inputs().chain(declaration.outputs()) {
        if !types.is_registered(socket.socket_type) {
            return Err(GraphError::UnregisteredType {
                node_type: info.id_name.clone(),
                type_name: socket.socket_type.to_string(),
            });
        }
    }
    Ok(())
}

impl Default for NodeTreeDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeTreeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeTreeDescriptor")
            .field("types", &self.types)
            .field("node_types", &self.node_types.keys().collect::<Vec<_>>())
            .finish()
    }
}
