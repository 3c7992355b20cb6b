// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node types and node instances.

use crate::declaration::{build_declaration, NodeDeclaration, NodeDeclarationBuilder};
use crate::error::{NodeExecError, Result};
use crate::params::ExeParams;
use crate::socket::SocketId;
use crate::tree::NodeTree;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Unique identifier for a node, drawn from the tree-wide ID counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback listing a node type's sockets
pub type DeclareFn = Arc<dyn Fn(&mut NodeDeclarationBuilder) + Send + Sync>;

/// Node computation
pub type ExecFn = Arc<dyn Fn(&mut ExeParams<'_>) -> std::result::Result<(), NodeExecError> + Send + Sync>;

/// Node type definition
#[derive(Clone)]
pub struct NodeTypeInfo {
    /// Unique type identifier
    pub id_name: String,
    /// Display name
    pub ui_name: String,
    /// Always scheduled, even when nothing downstream needs it
    pub always_required: bool,
    /// Hidden from catalogs and snapshots
    pub invisible: bool,
    declare: Option<DeclareFn>,
    execute: Option<ExecFn>,
    declaration: NodeDeclaration,
}

impl NodeTypeInfo {
    /// Create a new node type with no sockets
    pub fn new(id_name: impl Into<String>) -> Self {
        let id_name = id_name.into();
        Self {
            ui_name: id_name.clone(),
            id_name,
            always_required: false,
            invisible: false,
            declare: None,
            execute: None,
            declaration: NodeDeclaration::default(),
        }
    }

    /// Set the display name
    pub fn with_ui_name(mut self, ui_name: impl Into<String>) -> Self {
        self.ui_name = ui_name.into();
        self
    }

    /// Set the declare callback
    pub fn with_declare<F>(mut self, declare: F) -> Self
    where
        F: Fn(&mut NodeDeclarationBuilder) + Send + Sync + 'static,
    {
        self.declare = Some(Arc::new(declare));
        self
    }

    /// Set the computation
    pub fn with_execute<F>(mut self, execute: F) -> Self
    where
        F: Fn(&mut ExeParams<'_>) -> std::result::Result<(), NodeExecError> + Send + Sync + 'static,
    {
        self.execute = Some(Arc::new(execute));
        self
    }

    /// Mark as always required
    pub fn always_required(mut self) -> Self {
        self.always_required = true;
        self
    }

    /// Mark as invisible
    pub fn invisible(mut self) -> Self {
        self.invisible = true;
        self
    }

    /// The built socket declaration
    pub fn declaration(&self) -> &NodeDeclaration {
        &self.declaration
    }

    /// The computation, if any
    pub fn execute_fn(&self) -> Option<&ExecFn> {
        self.execute.as_ref()
    }

    /// Re-run the declare callback
    pub(crate) fn build_declaration(&mut self) -> Result<()> {
        self.declaration = match &self.declare {
            Some(declare) => build_declaration(declare.as_ref())?,
            None => NodeDeclaration::default(),
        };
        Ok(())
    }
}

impl fmt::Debug for NodeTypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeTypeInfo")
            .field("id_name", &self.id_name)
            .field("ui_name", &self.ui_name)
            .field("always_required", &self.always_required)
            .field("invisible", &self.invisible)
            .field("declaration", &self.declaration)
            .field("has_execute", &self.execute.is_some())
            .finish()
    }
}

/// A node instance in a tree
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) type_info: Arc<NodeTypeInfo>,
    /// Display name (can be customized)
    pub ui_name: String,
    pub(crate) inputs: Vec<SocketId>,
    pub(crate) outputs: Vec<SocketId>,
    pub(crate) required: bool,
    pub(crate) missing_input: bool,
    pub(crate) execution_failed: Option<String>,
    pub(crate) has_linked_inputs: bool,
    pub(crate) has_linked_outputs: bool,
    pub(crate) storage: Option<Box<dyn Any + Send>>,
    pub(crate) sub_tree: Option<Box<NodeTree>>,
}

impl Node {
    /// Create a new node from a type definition. Sockets are added by the tree.
    pub(crate) fn new(id: NodeId, type_info: Arc<NodeTypeInfo>) -> Self {
        Self {
            id,
            ui_name: type_info.ui_name.clone(),
            storage: type_info.declaration().create_storage(),
            type_info,
            inputs: Vec::new(),
            outputs: Vec::new(),
            required: false,
            missing_input: false,
            execution_failed: None,
            has_linked_inputs: false,
            has_linked_outputs: false,
            sub_tree: None,
        }
    }

    /// Node ID
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Type definition
    pub fn type_info(&self) -> &Arc<NodeTypeInfo> {
        &self.type_info
    }

    /// Type identifier
    pub fn id_name(&self) -> &str {
        &self.type_info.id_name
    }

    /// Whether the node is hidden (conversion nodes)
    pub fn is_invisible(&self) -> bool {
        self.type_info.invisible
    }

    /// Input sockets in declaration order
    pub fn inputs(&self) -> &[SocketId] {
        &self.inputs
    }

    /// Output sockets in declaration order
    pub fn outputs(&self) -> &[SocketId] {
        &self.outputs
    }

    /// Get all sockets
    pub fn sockets(&self) -> impl Iterator<Item = SocketId> + '_ {
        self.inputs.iter().chain(self.outputs.iter()).copied()
    }

    /// Scheduled by the last compile
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Skipped during the last execution for lack of an input
    pub fn is_missing_input(&self) -> bool {
        self.missing_input
    }

    /// Failure message from the last execution
    pub fn execution_failed(&self) -> Option<&str> {
        self.execution_failed.as_deref()
    }

    /// Whether any input is linked, from the topology cache
    pub fn has_linked_inputs(&self) -> bool {
        self.has_linked_inputs
    }

    /// Whether any output is linked, from the topology cache
    pub fn has_linked_outputs(&self) -> bool {
        self.has_linked_outputs
    }

    /// Sub-tree owned by a group node
    pub fn sub_tree(&self) -> Option<&NodeTree> {
        self.sub_tree.as_deref()
    }

    /// Borrow the node's scratch storage
    pub fn storage<T: Any>(&self) -> Option<&T> {
        self.storage.as_deref().and_then(|storage| storage.downcast_ref::<T>())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("id_name", &self.type_info.id_name)
            .field("ui_name", &self.ui_name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("required", &self.required)
            .field("missing_input", &self.missing_input)
            .field("execution_failed", &self.execution_failed)
            .field("has_sub_tree", &self.sub_tree.is_some())
            .finish_non_exhaustive()
    }
}
