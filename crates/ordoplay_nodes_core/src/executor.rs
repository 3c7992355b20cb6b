// SPDX-License-Identifier: MIT OR Apache-2.0
//! Eager executor.
//!
//! `compile` marks the nodes needed to produce always-required (or
//! requested) nodes and allocates one value slot per socket of each of them.
//! `execute` runs the scheduled nodes in topological order, moving output
//! values into downstream input slots as it goes. Group nodes run their
//! sub-tree through a nested executor kept per group node.

use crate::error::ExecutionError;
use crate::group::{NODE_GROUP, NODE_GROUP_IN, NODE_GROUP_OUT};
use crate::node::{Node, NodeId};
use crate::params::ExeParams;
use crate::socket::{Socket, SocketId};
use crate::storage::{
    NamedStorage, DEFAULT_STORAGE_NAME, STORAGE_IN, STORAGE_NAME_SOCKET, STORAGE_OUT, STORAGE_VALUE_SOCKET,
};
use crate::tree::NodeTree;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

type ExecResult<T> = std::result::Result<T, ExecutionError>;

/// Executor tuning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorOptions {
    /// Drop slot values nothing reads anymore at the end of each execution
    pub release_dead_values: bool,
}

/// Executor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// No plan
    Uncompiled,
    /// Plan ready, slots fresh
    Compiled,
    /// Plan ready, slots hold the last execution's values
    Executed,
}

/// Runtime value holder for one socket
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionSlot {
    value: Option<Value>,
    is_forwarded: bool,
    is_last_used: bool,
    keep_alive: bool,
}

impl ExecutionSlot {
    fn new(value: Option<Value>) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    /// Current value
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Whether an upstream value was delivered into this input
    pub fn is_forwarded(&self) -> bool {
        self.is_forwarded
    }

    /// Whether this slot is the last holder of its value
    pub fn is_last_used(&self) -> bool {
        self.is_last_used
    }

    /// Whether the value must survive the release pass
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotRef {
    Input(usize),
    Output(usize),
}

/// Outcome of one execution pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    /// Nodes that ran successfully, in execution order
    pub executed: Vec<NodeId>,
    /// Per-node failures, in execution order
    pub failures: Vec<ExecutionError>,
}

impl ExecutionReport {
    /// Whether every scheduled node ran
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// The failure recorded for a node
    pub fn failure(&self, node: NodeId) -> Option<&ExecutionError> {
        self.failures.iter().find(|err| err.node() == Some(node))
    }
}

/// Compiles a tree into a plan and runs it
#[derive(Debug)]
pub struct EagerExecutor {
    options: ExecutorOptions,
    state: ExecutorState,
    nodes_to_execute: Vec<NodeId>,
    required_count: usize,
    input_slots: Vec<ExecutionSlot>,
    output_slots: Vec<ExecutionSlot>,
    fresh_input_slots: Vec<ExecutionSlot>,
    fresh_output_slots: Vec<ExecutionSlot>,
    slot_index: HashMap<SocketId, SlotRef>,
    storage: NamedStorage,
    group_executors: HashMap<NodeId, EagerExecutor>,
}

impl EagerExecutor {
    /// Create a new executor with default options
    pub fn new() -> Self {
        Self::with_options(ExecutorOptions::default())
    }

    /// Create a new executor
    pub fn with_options(options: ExecutorOptions) -> Self {
        Self {
            options,
            state: ExecutorState::Uncompiled,
            nodes_to_execute: Vec::new(),
            required_count: 0,
            input_slots: Vec::new(),
            output_slots: Vec::new(),
            fresh_input_slots: Vec::new(),
            fresh_output_slots: Vec::new(),
            slot_index: HashMap::new(),
            storage: NamedStorage::new(),
            group_executors: HashMap::new(),
        }
    }

    /// Current options
    pub fn options(&self) -> ExecutorOptions {
        self.options
    }

    /// Replace the options
    pub fn set_options(&mut self, options: ExecutorOptions) {
        self.options = options;
    }

    /// Lifecycle state
    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// Scheduled nodes in execution order
    pub fn scheduled_nodes(&self) -> &[NodeId] {
        &self.nodes_to_execute[..self.required_count]
    }

    /// Every node of the last compile, scheduled ones first
    pub fn execution_order(&self) -> &[NodeId] {
        &self.nodes_to_execute
    }

    /// Values kept across executions
    pub fn named_storage(&self) -> &NamedStorage {
        &self.storage
    }

    /// Mutable access to the values kept across executions
    pub fn named_storage_mut(&mut self) -> &mut NamedStorage {
        &mut self.storage
    }

    /// Compile the nodes needed by always-required nodes
    pub fn compile(&mut self, tree: &mut NodeTree) -> ExecResult<()> {
        self.compile_requested(tree, &[])
    }

    /// Compile the nodes needed by always-required nodes and by `requested`
    pub fn compile_requested(&mut self, tree: &mut NodeTree, requested: &[NodeId]) -> ExecResult<()> {
        tree.ensure_topology_cache();
        self.reset_plan();
        if tree.has_cycle() {
            tracing::warn!("Refusing to compile: graph contains a cycle");
            return Err(ExecutionError::CycleDetected);
        }

        let order = tree.toposort_left_to_right().to_vec();
        for id in &order {
            if let Some(node) = tree.node_mut(*id) {
                node.required = node.type_info.always_required || requested.contains(id);
            }
        }
        for id in order.iter().rev() {
            if !tree.find_node(*id).is_some_and(Node::is_required) {
                continue;
            }
            for upstream in tree.upstream_nodes(*id) {
                if let Some(node) = tree.node_mut(upstream) {
                    node.required = true;
                }
            }
        }

        let (mut scheduled, skipped): (Vec<NodeId>, Vec<NodeId>) = order
            .into_iter()
            .partition(|id| tree.find_node(*id).is_some_and(Node::is_required));
        self.required_count = scheduled.len();
        scheduled.extend(skipped);
        self.nodes_to_execute = scheduled;

        self.prepare_memory(tree);
        self.refresh_storage(tree);
        let groups = self.nodes_with_type(tree, NODE_GROUP);
        self.group_executors.retain(|id, _| groups.contains(id));
        self.state = ExecutorState::Compiled;
        tree.set_dirty(false);
        tracing::info!(
            "Compiled {} of {} nodes",
            self.required_count,
            self.nodes_to_execute.len()
        );
        Ok(())
    }

    /// Run the compiled plan once
    pub fn execute(&mut self, tree: &mut NodeTree) -> ExecResult<ExecutionReport> {
        if self.state == ExecutorState::Uncompiled {
            return Err(ExecutionError::NotCompiled);
        }
        if tree.is_dirty() {
            tracing::warn!("Tree changed since the last compile");
            return Err(ExecutionError::StalePlan);
        }
        if self.state == ExecutorState::Executed {
            self.reset_slots();
        }

        let plan = self.scheduled_nodes().to_vec();
        for id in &plan {
            if let Some(node) = tree.node_mut(*id) {
                node.missing_input = false;
                node.execution_failed = None;
            }
        }

        let mut report = ExecutionReport::default();
        for id in plan {
            let id_name = tree.find_node(id).map(|node| node.id_name().to_string());
            let result = match id_name.as_deref() {
                Some(STORAGE_OUT) => self.fill_storage_to_node(tree, id),
                Some(NODE_GROUP) => self.execute_group(tree, id),
                _ => self.execute_node(tree, id),
            };
            match result {
                Ok(()) => {
                    self.forward_output_to_input(tree, id);
                    report.executed.push(id);
                }
                Err(err) => {
                    tracing::debug!("Node {} did not run: {}", id, err);
                    report.failures.push(err);
                }
            }
        }

        self.try_storage(tree);
        if self.options.release_dead_values {
            self.release_dead_values();
        }
        self.state = ExecutorState::Executed;
        tracing::debug!(
            "Executed {} nodes, {} failures",
            report.executed.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Write a value into a scheduled socket's slot before executing.
    /// Inputs written this way count as forwarded.
    pub fn sync_value_into(&mut self, socket: SocketId, value: Value) -> ExecResult<()> {
        match self.state {
            ExecutorState::Uncompiled => return Err(ExecutionError::NotCompiled),
            ExecutorState::Executed => {
                self.reset_slots();
                self.state = ExecutorState::Compiled;
            }
            ExecutorState::Compiled => {}
        }
        match self.slot_index.get(&socket).copied() {
            Some(SlotRef::Input(index)) => {
                if let Some(slot) = self.input_slots.get_mut(index) {
                    slot.value = Some(value);
                    slot.is_forwarded = true;
                }
                Ok(())
            }
            Some(SlotRef::Output(index)) => {
                if let Some(slot) = self.output_slots.get_mut(index) {
                    slot.value = Some(value);
                }
                Ok(())
            }
            None => Err(ExecutionError::SocketNotScheduled(socket)),
        }
    }

    /// Copy a value out of a scheduled socket's slot
    pub fn sync_value_out_of(&self, socket: SocketId) -> Option<Value> {
        self.slot(socket).and_then(|slot| slot.value.clone())
    }

    /// Inspect a scheduled socket's slot
    pub fn slot(&self, socket: SocketId) -> Option<&ExecutionSlot> {
        match self.slot_index.get(&socket)? {
            SlotRef::Input(index) => self.input_slots.get(*index),
            SlotRef::Output(index) => self.output_slots.get(*index),
        }
    }

    fn reset_plan(&mut self) {
        self.state = ExecutorState::Uncompiled;
        self.nodes_to_execute.clear();
        self.required_count = 0;
        self.input_slots.clear();
        self.output_slots.clear();
        self.fresh_input_slots.clear();
        self.fresh_output_slots.clear();
        self.slot_index.clear();
    }

    fn reset_slots(&mut self) {
        self.input_slots.clone_from(&self.fresh_input_slots);
        self.output_slots.clone_from(&self.fresh_output_slots);
    }

    fn prepare_memory(&mut self, tree: &NodeTree) {
        let types = tree.descriptor().types();
        for id in &self.nodes_to_execute[..self.required_count] {
            let Some(node) = tree.find_node(*id) else {
                continue;
            };
            for socket in node.inputs() {
                let socket_type = tree.find_socket(*socket).map(Socket::socket_type).unwrap_or_default();
                self.slot_index.insert(*socket, SlotRef::Input(self.input_slots.len()));
                self.input_slots.push(ExecutionSlot::new(types.construct(socket_type)));
            }
            for socket in node.outputs() {
                let socket_type = tree.find_socket(*socket).map(Socket::socket_type).unwrap_or_default();
                self.slot_index.insert(*socket, SlotRef::Output(self.output_slots.len()));
                self.output_slots.push(ExecutionSlot::new(types.construct(socket_type)));
            }
        }
        self.fresh_input_slots.clone_from(&self.input_slots);
        self.fresh_output_slots.clone_from(&self.output_slots);
    }

    /// Seed keys written by scheduled `storage_in` nodes and evict the rest
    fn refresh_storage(&mut self, tree: &NodeTree) {
        let types = tree.descriptor().types();
        let mut refreshed = HashSet::new();
        for id in self.nodes_with_type(tree, STORAGE_IN) {
            let key = self.storage_key(tree, id);
            let upstream_type = tree
                .input_socket(id, STORAGE_VALUE_SOCKET)
                .and_then(|socket| tree.find_socket(socket))
                .and_then(|socket| socket.directly_linked_sockets().first().copied())
                .and_then(|upstream| tree.find_socket(upstream))
                .map(Socket::socket_type);
            if let Some(socket_type) = upstream_type {
                if !self.storage.contains(&key) {
                    if let Some(value) = types.construct(socket_type) {
                        self.storage.insert(key.clone(), value);
                    }
                }
            }
            refreshed.insert(key);
        }
        self.storage.retain_keys(&refreshed);
    }

    fn nodes_with_type(&self, tree: &NodeTree, id_name: &str) -> Vec<NodeId> {
        self.scheduled_nodes()
            .iter()
            .copied()
            .filter(|id| tree.find_node(*id).is_some_and(|node| node.id_name() == id_name))
            .collect()
    }

    /// Storage key of a storage node: the stored `Name` value, else the default.
    ///
    /// Values arriving on a linked `Name` input are ignored so that compile
    /// and execute resolve the same key.
    fn storage_key(&self, tree: &NodeTree, node: NodeId) -> String {
        tree.input_socket(node, STORAGE_NAME_SOCKET)
            .and_then(|socket| tree.socket_value(socket))
            .and_then(|value| value.get::<String>().ok())
            .unwrap_or_else(|| DEFAULT_STORAGE_NAME.to_string())
    }

    /// Non-placeholder inputs and outputs of a node
    fn concrete_sockets(tree: &NodeTree, id: NodeId) -> ExecResult<(Vec<SocketId>, Vec<SocketId>)> {
        let Some(node) = tree.find_node(id) else {
            return Err(ExecutionError::StalePlan);
        };
        let is_concrete = |socket: &SocketId| tree.find_socket(*socket).is_some_and(|s| !s.placeholder);
        let input_ids = node.inputs().iter().copied().filter(is_concrete).collect();
        let output_ids = node.outputs().iter().copied().filter(is_concrete).collect();
        Ok((input_ids, output_ids))
    }

    /// Fill input slots nothing was forwarded into from the sockets' own values
    fn gather_inputs(&mut self, tree: &mut NodeTree, id: NodeId, input_ids: &[SocketId]) -> ExecResult<()> {
        let mut missing = false;
        for socket in input_ids {
            let Some(SlotRef::Input(index)) = self.slot_index.get(socket).copied() else {
                missing = true;
                continue;
            };
            let Some(slot) = self.input_slots.get_mut(index) else {
                missing = true;
                continue;
            };
            if slot.is_forwarded {
                continue;
            }
            match tree.find_socket(*socket) {
                Some(s) if !s.is_linked() && s.value.is_some() => slot.value.clone_from(&s.value),
                _ => missing = true,
            }
        }
        if missing {
            if let Some(node) = tree.node_mut(id) {
                node.missing_input = true;
            }
            return Err(ExecutionError::MissingInput { node: id });
        }
        Ok(())
    }

    fn execute_node(&mut self, tree: &mut NodeTree, id: NodeId) -> ExecResult<()> {
        let (input_ids, output_ids) = Self::concrete_sockets(tree, id)?;
        self.gather_inputs(tree, id, &input_ids)?;

        let mut storage = tree.node_mut(id).and_then(|node| node.storage.take());
        let (result, inputs, outputs) = {
            let Some(node) = tree.find_node(id) else {
                return Err(ExecutionError::StalePlan);
            };
            let execute = node.type_info().execute_fn().cloned();
            let mut params = ExeParams::new(id, storage.as_mut());
            for socket in &input_ids {
                let Some(s) = tree.find_socket(*socket) else {
                    continue;
                };
                let value = match self.slot_index.get(socket) {
                    Some(SlotRef::Input(index)) => self.input_slots.get_mut(*index).and_then(|slot| slot.value.take()),
                    _ => None,
                };
                params.push_input(&s.identifier, s.socket_type, value);
            }
            for socket in &output_ids {
                if let Some(s) = tree.find_socket(*socket) {
                    params.push_output(&s.identifier, s.socket_type);
                }
            }
            let result = match &execute {
                Some(execute) => execute(&mut params),
                None => Ok(()),
            };
            let (inputs, outputs) = params.into_values();
            (result, inputs, outputs)
        };

        for (socket, value) in input_ids.iter().zip(inputs) {
            if let Some(SlotRef::Input(index)) = self.slot_index.get(socket).copied() {
                if let Some(slot) = self.input_slots.get_mut(index) {
                    slot.value = value;
                }
            }
        }
        for (socket, value) in output_ids.iter().zip(outputs) {
            if value.is_none() {
                continue;
            }
            if let Some(SlotRef::Output(index)) = self.slot_index.get(socket).copied() {
                if let Some(slot) = self.output_slots.get_mut(index) {
                    slot.value = value;
                }
            }
        }

        let Some(node) = tree.node_mut(id) else {
            return Err(ExecutionError::StalePlan);
        };
        node.storage = storage;
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!("Node {} ({}) failed: {}", id, node.id_name(), err);
                node.execution_failed = Some(err.0.clone());
                Err(ExecutionError::ComputationFailed {
                    node: id,
                    message: err.0,
                })
            }
        }
    }

    /// Run a group node's sub-tree with the group's inputs and copy what
    /// reaches its `node_group_out` node into the group's outputs
    fn execute_group(&mut self, tree: &mut NodeTree, id: NodeId) -> ExecResult<()> {
        let (input_ids, output_ids) = Self::concrete_sockets(tree, id)?;
        self.gather_inputs(tree, id, &input_ids)?;

        let body = tree.node_mut(id).and_then(|node| node.sub_tree.take());
        let result = match body {
            Some(mut body) => {
                let mut nested = self.group_executors.remove(&id).unwrap_or_default();
                let result = self.run_group_body(tree, &mut body, &mut nested, &input_ids, &output_ids);
                self.group_executors.insert(id, nested);
                if let Some(node) = tree.node_mut(id) {
                    node.sub_tree = Some(body);
                }
                result
            }
            None => Err("Group has no body".to_string()),
        };

        result.map_err(|message| {
            tracing::warn!("Group {} failed: {}", id, message);
            if let Some(node) = tree.node_mut(id) {
                node.execution_failed = Some(message.clone());
            }
            ExecutionError::ComputationFailed { node: id, message }
        })
    }

    fn run_group_body(
        &mut self,
        tree: &NodeTree,
        body: &mut NodeTree,
        nested: &mut EagerExecutor,
        input_ids: &[SocketId],
        output_ids: &[SocketId],
    ) -> std::result::Result<(), String> {
        let find = |id_name: &str| body.nodes().find(|node| node.id_name() == id_name).map(Node::id);
        let (Some(group_in), Some(group_out)) = (find(NODE_GROUP_IN), find(NODE_GROUP_OUT)) else {
            return Err("Group body lacks its boundary nodes".to_string());
        };
        if body.is_dirty() || nested.state() == ExecutorState::Uncompiled {
            nested
                .compile_requested(body, &[group_in, group_out])
                .map_err(|err| err.to_string())?;
        }

        for socket in input_ids {
            let Some(identifier) = tree.find_socket(*socket).map(|s| s.identifier.clone()) else {
                continue;
            };
            let value = match self.slot_index.get(socket) {
                Some(SlotRef::Input(index)) => self.input_slots.get_mut(*index).and_then(|slot| slot.value.take()),
                _ => None,
            };
            let (Some(inner), Some(value)) = (body.output_socket(group_in, &identifier), value) else {
                continue;
            };
            nested.sync_value_into(inner, value).map_err(|err| err.to_string())?;
        }

        let report = nested.execute(body).map_err(|err| err.to_string())?;
        if let Some(err) = report.failures.first() {
            return Err(format!("Node inside group failed: {err}"));
        }

        for socket in output_ids {
            let Some(identifier) = tree.find_socket(*socket).map(|s| s.identifier.clone()) else {
                continue;
            };
            let value = body
                .input_socket(group_out, &identifier)
                .and_then(|inner| nested.sync_value_out_of(inner));
            if let (Some(SlotRef::Output(index)), Some(value)) = (self.slot_index.get(socket).copied(), value) {
                if let Some(slot) = self.output_slots.get_mut(index) {
                    slot.value = Some(value);
                }
            }
        }
        Ok(())
    }

    /// Move each output value into the input slots of its scheduled consumers.
    ///
    /// The value is cloned into every consumer but the last required one,
    /// which receives it by move.
    fn forward_output_to_input(&mut self, tree: &mut NodeTree, id: NodeId) {
        let Some(node) = tree.find_node(id) else {
            return;
        };
        for output in node.outputs().to_vec() {
            let Some(SlotRef::Output(out_index)) = self.slot_index.get(&output).copied() else {
                continue;
            };
            let targets: Vec<SocketId> = tree
                .find_socket(output)
                .map(|s| s.directly_linked_sockets().to_vec())
                .unwrap_or_default();
            let consumer = |socket: &SocketId| tree.find_socket(*socket).and_then(|s| tree.find_node(s.node));
            let keep_alive = targets
                .iter()
                .any(|t| consumer(t).is_some_and(|n| n.id_name() == STORAGE_IN));
            let scheduled: Vec<(SocketId, usize)> = targets
                .iter()
                .filter_map(|t| match self.slot_index.get(t) {
                    Some(SlotRef::Input(index)) => Some((*t, *index)),
                    _ => None,
                })
                .collect();
            let mover = scheduled
                .iter()
                .rposition(|(t, _)| consumer(t).is_some_and(Node::is_required));

            if keep_alive {
                for (_, index) in &scheduled {
                    if let Some(slot) = self.input_slots.get_mut(*index) {
                        slot.keep_alive = true;
                    }
                }
            }
            let last_holder = match mover.and_then(|k| scheduled.get(k)) {
                Some((_, index)) => self.input_slots.get_mut(*index),
                None => self.output_slots.get_mut(out_index),
            };
            if let Some(slot) = last_holder {
                slot.is_last_used = true;
            }

            let Some(value) = self.output_slots.get_mut(out_index).and_then(|slot| slot.value.take()) else {
                continue;
            };
            let mut pending = Some(value);
            for (k, (target, index)) in scheduled.iter().enumerate() {
                if Some(k) == mover {
                    continue;
                }
                if let Some(value) = &pending {
                    self.deliver(tree, *target, *index, value.clone());
                }
            }
            if let Some(&(target, index)) = mover.and_then(|k| scheduled.get(k)) {
                if let Some(value) = pending.take() {
                    self.deliver(tree, target, index, value);
                }
            }
            if let Some(value) = pending {
                if let Some(slot) = self.output_slots.get_mut(out_index) {
                    slot.value = Some(value);
                }
            }
        }
    }

    fn deliver(&mut self, tree: &mut NodeTree, target: SocketId, index: usize, value: Value) {
        let Some(socket) = tree.find_socket(target) else {
            return;
        };
        let accepted = socket.socket_type.accepts(&value);
        let consumer = socket.node;
        let Some(slot) = self.input_slots.get_mut(index) else {
            return;
        };
        if accepted {
            slot.value = Some(value);
            slot.is_forwarded = true;
        } else {
            slot.is_forwarded = false;
            if let Some(node) = tree.node_mut(consumer) {
                tracing::warn!("Type mismatch on input {} of node {}", target, consumer);
                node.execution_failed = Some("Type mismatch input".to_string());
            }
        }
    }

    /// Fill a `storage_out` node's output from named storage
    fn fill_storage_to_node(&mut self, tree: &mut NodeTree, id: NodeId) -> ExecResult<()> {
        let key = self.storage_key(tree, id);
        let Some(output) = tree.output_socket(id, STORAGE_VALUE_SOCKET) else {
            return Ok(());
        };
        let Some(stored) = self.storage.get(&key).cloned() else {
            let message = format!("No cache can be found with name {key} (yet).");
            if let Some(node) = tree.node_mut(id) {
                node.execution_failed = Some(message);
            }
            return Err(ExecutionError::StorageKeyNotFound { node: id, key });
        };

        let mismatch = tree
            .find_socket(output)
            .into_iter()
            .flat_map(|s| s.directly_linked_sockets().iter())
            .filter_map(|target| tree.find_socket(*target))
            .any(|target| !target.socket_type.accepts(&stored));
        if mismatch {
            let message = "Type Mismatch, filling default value.".to_string();
            if let Some(node) = tree.node_mut(id) {
                node.execution_failed = Some(message.clone());
            }
            return Err(ExecutionError::ComputationFailed { node: id, message });
        }

        if let Some(SlotRef::Output(index)) = self.slot_index.get(&output).copied() {
            if let Some(slot) = self.output_slots.get_mut(index) {
                slot.value = Some(stored);
            }
        }
        Ok(())
    }

    /// Record what reached each scheduled `storage_in` node
    fn try_storage(&mut self, tree: &NodeTree) {
        for id in self.nodes_with_type(tree, STORAGE_IN) {
            let key = self.storage_key(tree, id);
            let value = tree
                .input_socket(id, STORAGE_VALUE_SOCKET)
                .and_then(|socket| self.slot(socket))
                .and_then(|slot| slot.value.clone());
            if let Some(value) = value {
                self.storage.insert(key, value);
            }
        }
    }

    /// Drop values whose last holder is done with them
    fn release_dead_values(&mut self) {
        let mut released = 0usize;
        for slot in self.input_slots.iter_mut().chain(self.output_slots.iter_mut()) {
            if slot.is_last_used && !slot.keep_alive && slot.value.take().is_some() {
                released += 1;
            }
        }
        tracing::trace!("Released {} dead slot values", released);
    }
}

impl Default for EagerExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::NodeTreeDescriptor;
    use crate::group::register_group_nodes;
    use crate::node::NodeTypeInfo;
    use crate::storage::register_storage_nodes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn descriptor(counter: Arc<AtomicUsize>) -> Arc<NodeTreeDescriptor> {
        let mut descriptor = NodeTreeDescriptor::new();
        descriptor
            .register_node(
                NodeTypeInfo::new("const")
                    .with_declare(|b| {
                        b.add_input::<i32>("value").default_val(1);
                        b.add_output::<i32>("out");
                    })
                    .with_execute(|p| {
                        let value: i32 = p.get_input("value")?;
                        p.set_output("out", value)
                    }),
            )
            .unwrap()
            .register_node(
                NodeTypeInfo::new("text")
                    .with_declare(|b| {
                        b.add_input::<String>("value").default_val("dyn".to_string());
                        b.add_output::<String>("out");
                    })
                    .with_execute(|p| {
                        let value: String = p.get_input("value")?;
                        p.set_output("out", value)
                    }),
            )
            .unwrap()
            .register_node(
                NodeTypeInfo::new("add")
                    .with_declare(|b| {
                        b.add_input::<i32>("a");
                        b.add_input::<i32>("b");
                        b.add_output::<i32>("out");
                    })
                    .with_execute(|p| {
                        let sum = p.get_input::<i32>("a")? + p.get_input::<i32>("b")?;
                        p.set_output("out", sum)
                    }),
            )
            .unwrap()
            .register_node(
                NodeTypeInfo::new("sink")
                    .always_required()
                    .with_declare(|b| {
                        b.add_input::<i32>("value");
                        b.storage::<Vec<i32>>();
                    })
                    .with_execute(|p| {
                        let value: i32 = p.take_input("value")?;
                        if let Some(seen) = p.storage::<Vec<i32>>() {
                            seen.push(value);
                        }
                        Ok(())
                    }),
            )
            .unwrap()
            .register_node(
                NodeTypeInfo::new("float_sink")
                    .always_required()
                    .with_declare(|b| {
                        b.add_input::<f32>("value");
                    }),
            )
            .unwrap()
            .register_node(
                NodeTypeInfo::new("fail")
                    .with_declare(|b| {
                        b.add_output::<i32>("out");
                    })
                    .with_execute(|_| Err("boom".into())),
            )
            .unwrap()
            .register_node(
                NodeTypeInfo::new("counted")
                    .with_declare(|b| {
                        b.add_output::<i32>("out");
                    })
                    .with_execute(move |p| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        p.set_output("out", 7)
                    }),
            )
            .unwrap()
            .register_conversion::<i32, f32, _>(|from, to| {
                *to = *from as f32;
                true
            })
            .unwrap();
        register_storage_nodes(&mut descriptor).unwrap();
        register_group_nodes(&mut descriptor).unwrap();
        Arc::new(descriptor)
    }

    fn setup() -> (NodeTree, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        (NodeTree::new(descriptor(Arc::clone(&counter))), counter)
    }

    fn connect(tree: &mut NodeTree, from: NodeId, output: &str, to: NodeId, input: &str) {
        let out = tree.output_socket(from, output).unwrap();
        let input = tree.input_socket(to, input).unwrap();
        tree.add_link(out, input).unwrap();
    }

    fn sink_values(tree: &NodeTree, sink: NodeId) -> Vec<i32> {
        tree.find_node(sink).unwrap().storage::<Vec<i32>>().cloned().unwrap_or_default()
    }

    #[test]
    fn test_add_chain() {
        let (mut tree, _) = setup();
        let a = tree.add_node("const").unwrap();
        let b = tree.add_node("const").unwrap();
        let add = tree.add_node("add").unwrap();
        let sink = tree.add_node("sink").unwrap();
        tree.set_socket_value(tree.input_socket(a, "value").unwrap(), 2).unwrap();
        tree.set_socket_value(tree.input_socket(b, "value").unwrap(), 3).unwrap();
        connect(&mut tree, a, "out", add, "a");
        connect(&mut tree, b, "out", add, "b");
        connect(&mut tree, add, "out", sink, "value");

        let mut executor = EagerExecutor::new();
        executor.compile(&mut tree).unwrap();
        assert_eq!(executor.scheduled_nodes().len(), 4);
        assert_eq!(executor.scheduled_nodes().last(), Some(&sink));

        let report = executor.execute(&mut tree).unwrap();
        assert!(report.is_success());
        assert_eq!(sink_values(&tree, sink), vec![5]);

        // Node storage persists, slots are refreshed
        executor.execute(&mut tree).unwrap();
        assert_eq!(sink_values(&tree, sink), vec![5, 5]);
        let add_out = tree.output_socket(add, "out").unwrap();
        assert_eq!(executor.state(), ExecutorState::Executed);
        // The single consumer took the value by move
        assert_eq!(executor.sync_value_out_of(add_out), None);
        let sink_in = tree.input_socket(sink, "value").unwrap();
        assert!(executor.slot(sink_in).unwrap().is_last_used());
    }

    #[test]
    fn test_unneeded_nodes_are_pruned() {
        let (mut tree, counter) = setup();
        let counted = tree.add_node("counted").unwrap();
        let sink = tree.add_node("sink").unwrap();

        let mut executor = EagerExecutor::new();
        executor.compile(&mut tree).unwrap();
        assert!(!tree.find_node(counted).unwrap().is_required());
        assert_eq!(executor.execution_order().len(), 2);
        executor.execute(&mut tree).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        connect(&mut tree, counted, "out", sink, "value");
        executor.compile(&mut tree).unwrap();
        executor.execute(&mut tree).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        // First run used the unlinked default
        assert_eq!(sink_values(&tree, sink), vec![0, 7]);

        // Requested nodes are scheduled even without a required consumer
        let lonely = tree.add_node("counted").unwrap();
        executor.compile_requested(&mut tree, &[lonely]).unwrap();
        executor.execute(&mut tree).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_default_used_when_unlinked() {
        let (mut tree, _) = setup();
        let sink = tree.add_node("sink").unwrap();
        tree.set_socket_value(tree.input_socket(sink, "value").unwrap(), 9).unwrap();

        let mut executor = EagerExecutor::new();
        executor.compile(&mut tree).unwrap();
        executor.execute(&mut tree).unwrap();
        assert_eq!(sink_values(&tree, sink), vec![9]);
    }

    #[test]
    fn test_failure_skips_downstream() {
        let (mut tree, _) = setup();
        let fail = tree.add_node("fail").unwrap();
        let sink = tree.add_node("sink").unwrap();
        connect(&mut tree, fail, "out", sink, "value");

        let mut executor = EagerExecutor::new();
        executor.compile(&mut tree).unwrap();
        let report = executor.execute(&mut tree).unwrap();

        assert_eq!(
            report.failure(fail),
            Some(&ExecutionError::ComputationFailed {
                node: fail,
                message: "boom".to_string()
            })
        );
        assert_eq!(report.failure(sink), Some(&ExecutionError::MissingInput { node: sink }));
        assert_eq!(tree.find_node(fail).unwrap().execution_failed(), Some("boom"));
        assert!(tree.find_node(sink).unwrap().is_missing_input());
        assert!(sink_values(&tree, sink).is_empty());
    }

    #[test]
    fn test_lifecycle_errors() {
        let (mut tree, _) = setup();
        let sink = tree.add_node("sink").unwrap();
        let mut executor = EagerExecutor::new();
        assert_eq!(executor.execute(&mut tree), Err(ExecutionError::NotCompiled));

        executor.compile(&mut tree).unwrap();
        assert!(!tree.is_dirty());
        tree.set_socket_value(tree.input_socket(sink, "value").unwrap(), 4).unwrap();
        assert_eq!(executor.execute(&mut tree), Err(ExecutionError::StalePlan));

        let unscheduled = tree.add_node("const").unwrap();
        executor.compile(&mut tree).unwrap();
        let socket = tree.output_socket(unscheduled, "out").unwrap();
        assert_eq!(
            executor.sync_value_into(socket, Value::Int(1)),
            Err(ExecutionError::SocketNotScheduled(socket))
        );
    }

    #[test]
    fn test_cycle_refuses_compile() {
        let (mut tree, _) = setup();
        let a = tree.add_node("add").unwrap();
        let b = tree.add_node("add").unwrap();
        let sink = tree.add_node("sink").unwrap();
        connect(&mut tree, a, "out", b, "a");
        connect(&mut tree, b, "out", a, "a");
        connect(&mut tree, b, "out", sink, "value");

        let mut executor = EagerExecutor::new();
        assert_eq!(executor.compile(&mut tree), Err(ExecutionError::CycleDetected));
        assert!(executor.scheduled_nodes().is_empty());
        assert_eq!(executor.state(), ExecutorState::Uncompiled);
    }

    #[test]
    fn test_sync_values() {
        let (mut tree, _) = setup();
        let add = tree.add_node("add").unwrap();
        let sink = tree.add_node("sink").unwrap();
        connect(&mut tree, add, "out", sink, "value");

        let mut executor = EagerExecutor::new();
        executor.compile(&mut tree).unwrap();
        let a = tree.input_socket(add, "a").unwrap();
        executor.sync_value_into(a, Value::Int(40)).unwrap();
        assert!(executor.slot(a).unwrap().is_forwarded());
        executor.execute(&mut tree).unwrap();
        // b falls back to its implicit default
        assert_eq!(sink_values(&tree, sink), vec![40]);

        // Synced values do not survive into the next run
        executor.execute(&mut tree).unwrap();
        assert_eq!(sink_values(&tree, sink), vec![40, 0]);
    }

    #[test]
    fn test_conversion_runs_in_plan() {
        let (mut tree, _) = setup();
        let source = tree.add_node("const").unwrap();
        let sink = tree.add_node("float_sink").unwrap();
        tree.set_socket_value(tree.input_socket(source, "value").unwrap(), 6).unwrap();
        connect(&mut tree, source, "out", sink, "value");

        let mut executor = EagerExecutor::new();
        executor.compile(&mut tree).unwrap();
        assert_eq!(executor.scheduled_nodes().len(), 3);
        let report = executor.execute(&mut tree).unwrap();
        assert!(report.is_success());
        let input = tree.input_socket(sink, "value").unwrap();
        assert_eq!(executor.sync_value_out_of(input), Some(Value::Float(6.0)));
    }

    #[test]
    fn test_named_storage_feedback() {
        let (mut tree, _) = setup();
        let reader = tree.add_node(STORAGE_OUT).unwrap();
        let add = tree.add_node("add").unwrap();
        let writer = tree.add_node(STORAGE_IN).unwrap();
        let one = tree.add_node("const").unwrap();
        connect(&mut tree, reader, STORAGE_VALUE_SOCKET, add, "a");
        connect(&mut tree, one, "out", add, "b");
        connect(&mut tree, add, "out", writer, STORAGE_VALUE_SOCKET);

        let mut executor = EagerExecutor::new();
        executor.compile(&mut tree).unwrap();
        // Seeded with the upstream type's default
        assert_eq!(executor.named_storage().get(DEFAULT_STORAGE_NAME), Some(&Value::Int(0)));

        for expected in 1..=3 {
            let report = executor.execute(&mut tree).unwrap();
            assert!(report.is_success());
            assert_eq!(
                executor.named_storage().get(DEFAULT_STORAGE_NAME),
                Some(&Value::Int(expected))
            );
        }
    }

    #[test]
    fn test_missing_storage_key() {
        let (mut tree, _) = setup();
        let reader = tree.add_node(STORAGE_OUT).unwrap();
        let sink = tree.add_node("sink").unwrap();
        tree.set_socket_value(tree.input_socket(reader, STORAGE_NAME_SOCKET).unwrap(), "cache")
            .unwrap();
        connect(&mut tree, reader, STORAGE_VALUE_SOCKET, sink, "value");

        let mut executor = EagerExecutor::new();
        executor.compile(&mut tree).unwrap();
        let report = executor.execute(&mut tree).unwrap();
        assert_eq!(
            report.failure(reader),
            Some(&ExecutionError::StorageKeyNotFound {
                node: reader,
                key: "cache".to_string()
            })
        );
        assert_eq!(
            tree.find_node(reader).unwrap().execution_failed(),
            Some("No cache can be found with name cache (yet).")
        );

        // Wrong type stored under the key
        executor.named_storage_mut().insert("cache", Value::from("text"));
        let report = executor.execute(&mut tree).unwrap();
        assert!(matches!(report.failure(reader), Some(ExecutionError::ComputationFailed { .. })));
    }

    #[test]
    fn test_release_dead_values() {
        let (mut tree, _) = setup();
        let source = tree.add_node("const").unwrap();
        let add = tree.add_node("add").unwrap();
        let sink = tree.add_node("sink").unwrap();
        connect(&mut tree, source, "out", add, "a");
        connect(&mut tree, add, "out", sink, "value");

        let mut executor = EagerExecutor::with_options(ExecutorOptions {
            release_dead_values: true,
        });
        executor.compile(&mut tree).unwrap();
        executor.execute(&mut tree).unwrap();
        let a = tree.input_socket(add, "a").unwrap();
        assert_eq!(executor.sync_value_out_of(a), None);
        assert_eq!(sink_values(&tree, sink), vec![1]);
    }

    #[test]
    fn test_release_unconsumed_outputs() {
        let (mut tree, _) = setup();
        let spare = tree.add_node("const").unwrap();
        let out = tree.output_socket(spare, "out").unwrap();

        let mut keeping = EagerExecutor::new();
        keeping.compile_requested(&mut tree, &[spare]).unwrap();
        keeping.execute(&mut tree).unwrap();
        assert!(keeping.slot(out).unwrap().is_last_used());
        assert_eq!(keeping.sync_value_out_of(out), Some(Value::Int(1)));

        let mut releasing = EagerExecutor::with_options(ExecutorOptions {
            release_dead_values: true,
        });
        releasing.compile_requested(&mut tree, &[spare]).unwrap();
        releasing.execute(&mut tree).unwrap();
        assert_eq!(releasing.sync_value_out_of(out), None);
    }

    #[test]
    fn test_fan_out_with_storage_consumer() {
        let (mut tree, _) = setup();
        let source = tree.add_node("const").unwrap();
        let add = tree.add_node("add").unwrap();
        let sink = tree.add_node("sink").unwrap();
        let writer = tree.add_node(STORAGE_IN).unwrap();
        connect(&mut tree, source, "out", add, "a");
        connect(&mut tree, source, "out", writer, STORAGE_VALUE_SOCKET);
        connect(&mut tree, add, "out", sink, "value");

        let mut executor = EagerExecutor::with_options(ExecutorOptions {
            release_dead_values: true,
        });
        executor.compile(&mut tree).unwrap();
        assert!(executor.execute(&mut tree).unwrap().is_success());

        // The donor gave its value away
        let out = tree.output_socket(source, "out").unwrap();
        assert_eq!(executor.sync_value_out_of(out), None);

        // Earlier consumer got a copy, the last required one took the value
        let a = executor.slot(tree.input_socket(add, "a").unwrap()).unwrap();
        assert_eq!(a.value(), Some(&Value::Int(1)));
        assert!(a.keep_alive());
        assert!(!a.is_last_used());
        let stored = executor.slot(tree.input_socket(writer, STORAGE_VALUE_SOCKET).unwrap()).unwrap();
        assert_eq!(stored.value(), Some(&Value::Int(1)));
        assert!(stored.keep_alive());
        assert!(stored.is_last_used());

        // Slots without a storage consumer are still released
        let sink_in = executor.slot(tree.input_socket(sink, "value").unwrap()).unwrap();
        assert!(!sink_in.keep_alive());
        assert_eq!(sink_in.value(), None);

        assert_eq!(executor.named_storage().get(DEFAULT_STORAGE_NAME), Some(&Value::Int(1)));
        assert_eq!(sink_values(&tree, sink), vec![1]);
    }

    #[test]
    fn test_linked_storage_name_keeps_key_across_compiles() {
        let (mut tree, _) = setup();
        let name = tree.add_node("text").unwrap();
        let source = tree.add_node("const").unwrap();
        let writer = tree.add_node(STORAGE_IN).unwrap();
        tree.set_socket_value(tree.input_socket(writer, STORAGE_NAME_SOCKET).unwrap(), "kept")
            .unwrap();
        connect(&mut tree, name, "out", writer, STORAGE_NAME_SOCKET);
        connect(&mut tree, source, "out", writer, STORAGE_VALUE_SOCKET);

        let mut executor = EagerExecutor::new();
        executor.compile(&mut tree).unwrap();
        assert!(executor.execute(&mut tree).unwrap().is_success());
        assert_eq!(executor.named_storage().keys().collect::<Vec<_>>(), vec!["kept"]);

        // Recompiling resolves the same key and keeps what execute wrote
        executor.compile(&mut tree).unwrap();
        assert_eq!(executor.named_storage().get("kept"), Some(&Value::Int(1)));
        assert!(!executor.named_storage().contains("dyn"));
        assert!(!executor.named_storage().contains(DEFAULT_STORAGE_NAME));
    }

    #[test]
    fn test_group_runs_sub_tree() {
        let (mut tree, _) = setup();
        let a = tree.add_node("const").unwrap();
        let b = tree.add_node("const").unwrap();
        let add = tree.add_node("add").unwrap();
        let sink = tree.add_node("sink").unwrap();
        tree.set_socket_value(tree.input_socket(a, "value").unwrap(), 2).unwrap();
        tree.set_socket_value(tree.input_socket(b, "value").unwrap(), 3).unwrap();
        connect(&mut tree, a, "out", add, "a");
        connect(&mut tree, b, "out", add, "b");
        connect(&mut tree, add, "out", sink, "value");
        let group = tree.group_up(&[add]).unwrap();

        let mut executor = EagerExecutor::new();
        executor.compile(&mut tree).unwrap();
        assert!(executor.scheduled_nodes().contains(&group));
        let report = executor.execute(&mut tree).unwrap();
        assert!(report.is_success(), "{:?}", report.failures);
        assert_eq!(sink_values(&tree, sink), vec![5]);

        // The nested plan is reused until the outer inputs change
        executor.execute(&mut tree).unwrap();
        tree.set_socket_value(tree.input_socket(a, "value").unwrap(), 4).unwrap();
        executor.compile(&mut tree).unwrap();
        executor.execute(&mut tree).unwrap();
        assert_eq!(sink_values(&tree, sink), vec![5, 5, 7]);
    }

    #[test]
    fn test_group_failure_is_reported_on_group() {
        let (mut tree, _) = setup();
        let fail = tree.add_node("fail").unwrap();
        let b = tree.add_node("const").unwrap();
        let add = tree.add_node("add").unwrap();
        let sink = tree.add_node("sink").unwrap();
        connect(&mut tree, fail, "out", add, "a");
        connect(&mut tree, b, "out", add, "b");
        connect(&mut tree, add, "out", sink, "value");
        let group = tree.group_up(&[fail, add]).unwrap();

        let mut executor = EagerExecutor::new();
        executor.compile(&mut tree).unwrap();
        let report = executor.execute(&mut tree).unwrap();
        assert!(matches!(
            report.failure(group),
            Some(ExecutionError::ComputationFailed { node, .. }) if *node == group
        ));
        assert!(tree.find_node(group).unwrap().execution_failed().is_some());
        assert!(matches!(report.failure(sink), Some(ExecutionError::MissingInput { .. })));
        assert!(sink_values(&tree, sink).is_empty());
        // The body goes back on the node after the run
        assert!(tree.group_body(group).is_some());
    }
}
