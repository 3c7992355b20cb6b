// SPDX-License-Identifier: MIT OR Apache-2.0
//! The node system: one descriptor, one tree and one executor.

use crate::config::NodeSystemConfig;
use crate::error::Result;
use ordoplay_nodes_core::{EagerExecutor, ExecutionReport, ExecutorState, NodeId, NodeTree, NodeTreeDescriptor};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// A node system behind a lock, for hosts that share it across threads
pub type SharedNodeSystem = Arc<Mutex<NodeSystem>>;

/// Owns a tree and the executor that runs it
#[derive(Debug)]
pub struct NodeSystem {
    config: NodeSystemConfig,
    tree: NodeTree,
    executor: EagerExecutor,
}

impl NodeSystem {
    /// Create a new node system with the default config
    pub fn new(descriptor: Arc<NodeTreeDescriptor>) -> Self {
        Self::with_config(descriptor, NodeSystemConfig::default())
    }

    /// Create a new node system without loading the startup snapshot
    pub fn with_config(descriptor: Arc<NodeTreeDescriptor>, config: NodeSystemConfig) -> Self {
        let executor = EagerExecutor::with_options(config.executor_options());
        Self {
            config,
            tree: NodeTree::new(descriptor),
            executor,
        }
    }

    /// Create a new node system and load its startup snapshot, if any
    pub fn from_config(descriptor: Arc<NodeTreeDescriptor>, config: NodeSystemConfig) -> Result<Self> {
        let startup = config.startup_snapshot.clone();
        let mut system = Self::with_config(descriptor, config);
        if let Some(path) = startup {
            system.load_snapshot(&path)?;
        }
        Ok(system)
    }

    /// Active config
    pub fn config(&self) -> &NodeSystemConfig {
        &self.config
    }

    /// Replace the config; executor options apply from the next execution
    pub fn set_config(&mut self, config: NodeSystemConfig) {
        self.executor.set_options(config.executor_options());
        self.config = config;
    }

    /// Node type catalog of the tree
    pub fn descriptor(&self) -> &Arc<NodeTreeDescriptor> {
        self.tree.descriptor()
    }

    /// The graph
    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    /// The graph, for editing
    pub fn tree_mut(&mut self) -> &mut NodeTree {
        &mut self.tree
    }

    /// The executor
    pub fn executor(&self) -> &EagerExecutor {
        &self.executor
    }

    /// The executor, for pushing values or reading storage
    pub fn executor_mut(&mut self) -> &mut EagerExecutor {
        &mut self.executor
    }

    /// Whether the next execution needs a compile first
    pub fn needs_compile(&self) -> bool {
        self.tree.is_dirty() || self.executor.state() == ExecutorState::Uncompiled
    }

    /// Compile the plan for always-required nodes
    pub fn compile(&mut self) -> Result<()> {
        self.executor.compile(&mut self.tree)?;
        Ok(())
    }

    /// Compile the plan for always-required nodes and `requested`
    pub fn compile_requested(&mut self, requested: &[NodeId]) -> Result<()> {
        self.executor.compile_requested(&mut self.tree, requested)?;
        Ok(())
    }

    /// Execute the tree, compiling first when it changed and `auto_compile` is set
    pub fn execute(&mut self) -> Result<ExecutionReport> {
        if self.config.auto_compile && self.needs_compile() {
            self.compile()?;
        }
        let report = self.executor.execute(&mut self.tree)?;
        if !report.is_success() {
            tracing::warn!("{} node(s) failed during execution", report.failures.len());
        }
        Ok(report)
    }

    /// Swap the node type catalog, reconciling every node
    pub fn reload_descriptor(&mut self, descriptor: Arc<NodeTreeDescriptor>) {
        self.tree.reload_descriptor(descriptor);
    }

    /// Render the tree as JSON using the configured indent
    pub fn snapshot(&self) -> Result<String> {
        Ok(self.tree.serialize(self.config.snapshot_indent)?)
    }

    /// Write the tree to a JSON file
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.snapshot()?)?;
        tracing::info!("Saved node tree to {}", path.display());
        Ok(())
    }

    /// Replace the tree with a JSON file's content
    pub fn load_snapshot(&mut self, path: &Path) -> Result<()> {
        let json = std::fs::read_to_string(path)?;
        self.tree.deserialize(&json)?;
        tracing::info!(
            "Loaded node tree from {} ({} nodes, {} links)",
            path.display(),
            self.tree.node_count(),
            self.tree.link_count()
        );
        Ok(())
    }

    /// Drop every node; the next execution compiles again
    pub fn clear(&mut self) {
        self.tree.clear();
    }

    /// Wrap into a shared handle
    pub fn into_shared(self) -> SharedNodeSystem {
        Arc::new(Mutex::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic_nodes::{create_basic_descriptor, CapturedValue, ADD, INT_VALUE, OUTPUT};
    use crate::error::SystemError;
    use ordoplay_nodes_core::{ExecutionError, Value};

    fn build(system: &mut NodeSystem) -> NodeId {
        let tree = system.tree_mut();
        let value = tree.add_node(INT_VALUE).unwrap();
        let add = tree.add_node(ADD).unwrap();
        let output = tree.add_node(OUTPUT).unwrap();
        let value_in = tree.input_socket(value, "value").unwrap();
        tree.set_socket_value(value_in, 5).unwrap();
        let b = tree.input_socket(add, "b").unwrap();
        tree.set_socket_value(b, 3).unwrap();
        let value_out = tree.output_socket(value, "value").unwrap();
        let a = tree.input_socket(add, "a").unwrap();
        tree.add_link(value_out, a).unwrap();
        let sum = tree.output_socket(add, "value").unwrap();
        let captured = tree.input_socket(output, "value").unwrap();
        tree.add_link(sum, captured).unwrap();
        output
    }

    fn captured(system: &NodeSystem, output: NodeId) -> CapturedValue {
        system
            .tree()
            .find_node(output)
            .and_then(|node| node.storage::<CapturedValue>())
            .cloned()
            .unwrap_or_default()
    }

    #[test]
    fn test_auto_compile() {
        let mut system = NodeSystem::new(create_basic_descriptor().unwrap());
        let output = build(&mut system);
        assert!(system.needs_compile());

        let report = system.execute().unwrap();
        assert!(report.is_success());
        assert!(!system.needs_compile());
        assert_eq!(captured(&system, output).value, Some(Value::Int(8)));

        system.execute().unwrap();
        assert_eq!(captured(&system, output).executions, 2);
    }

    #[test]
    fn test_manual_compile() {
        let config = NodeSystemConfig {
            auto_compile: false,
            ..Default::default()
        };
        let mut system = NodeSystem::with_config(create_basic_descriptor().unwrap(), config);
        build(&mut system);
        assert!(matches!(
            system.execute(),
            Err(SystemError::Execution(ExecutionError::NotCompiled))
        ));

        system.compile().unwrap();
        system.execute().unwrap();

        system.tree_mut().add_node(INT_VALUE).unwrap();
        assert!(matches!(
            system.execute(),
            Err(SystemError::Execution(ExecutionError::StalePlan))
        ));
    }

    #[test]
    fn test_shared_handle() {
        let mut system = NodeSystem::new(create_basic_descriptor().unwrap());
        let output = build(&mut system);
        let shared = system.into_shared();

        let worker = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || shared.lock().execute().map(|report| report.executed.len()))
        };
        assert_eq!(worker.join().unwrap().unwrap(), 3);
        assert_eq!(captured(&shared.lock(), output).value, Some(Value::Int(8)));
    }

    #[test]
    fn test_snapshot_uses_indent() {
        let mut system = NodeSystem::new(create_basic_descriptor().unwrap());
        build(&mut system);
        assert!(system.snapshot().unwrap().contains("\n    \""));

        system.set_config(NodeSystemConfig {
            snapshot_indent: None,
            ..Default::default()
        });
        assert!(!system.snapshot().unwrap().contains('\n'));
    }
}
