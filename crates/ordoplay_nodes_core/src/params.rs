// SPDX-License-Identifier: MIT OR Apache-2.0
//! Parameters handed to a node computation.

use crate::error::NodeExecError;
use crate::node::NodeId;
use crate::types::SocketType;
use crate::value::{SocketValue, TypeError, Value};
use std::any::Any;

struct ParamSlot<'a> {
    identifier: &'a str,
    socket_type: SocketType,
    value: Option<Value>,
}

/// Inputs, outputs and scratch storage of one node execution.
///
/// Input values are moved in from the executor's slots and moved back when
/// the computation returns, so `take_input` avoids cloning large buffers.
pub struct ExeParams<'a> {
    node: NodeId,
    inputs: Vec<ParamSlot<'a>>,
    outputs: Vec<ParamSlot<'a>>,
    storage: Option<&'a mut Box<dyn Any + Send>>,
}

impl<'a> ExeParams<'a> {
    pub(crate) fn new(node: NodeId, storage: Option<&'a mut Box<dyn Any + Send>>) -> Self {
        Self {
            node,
            inputs: Vec::new(),
            outputs: Vec::new(),
            storage,
        }
    }

    pub(crate) fn push_input(&mut self, identifier: &'a str, socket_type: SocketType, value: Option<Value>) {
        self.inputs.push(ParamSlot {
            identifier,
            socket_type,
            value,
        });
    }

    pub(crate) fn push_output(&mut self, identifier: &'a str, socket_type: SocketType) {
        self.outputs.push(ParamSlot {
            identifier,
            socket_type,
            value: None,
        });
    }

    /// Give the slot values back in socket order
    pub(crate) fn into_values(self) -> (Vec<Option<Value>>, Vec<Option<Value>>) {
        (
            self.inputs.into_iter().map(|slot| slot.value).collect(),
            self.outputs.into_iter().map(|slot| slot.value).collect(),
        )
    }

    /// ID of the executing node
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Borrow an input value
    pub fn input_value(&self, identifier: &str) -> Result<&Value, NodeExecError> {
        self.inputs
            .iter()
            .find(|slot| slot.identifier == identifier)
            .ok_or_else(|| NodeExecError(format!("Unknown input: {identifier}")))?
            .value
            .as_ref()
            .ok_or_else(|| NodeExecError(format!("Input {identifier} has no value")))
    }

    /// Typed copy of an input value
    pub fn get_input<T: SocketValue>(&self, identifier: &str) -> Result<T, NodeExecError> {
        Ok(T::from_value_ref(self.input_value(identifier)?)?.clone())
    }

    /// Move an input value out. Later reads of the same input fail.
    pub fn take_input<T: SocketValue>(&mut self, identifier: &str) -> Result<T, NodeExecError> {
        let value = self
            .inputs
            .iter_mut()
            .find(|slot| slot.identifier == identifier)
            .ok_or_else(|| NodeExecError(format!("Unknown input: {identifier}")))?
            .value
            .take()
            .ok_or_else(|| NodeExecError(format!("Input {identifier} has no value")))?;
        Ok(T::from_value(value)?)
    }

    /// Number of inputs
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Input identifiers in socket order
    pub fn input_identifiers(&self) -> impl Iterator<Item = &str> + '_ {
        self.inputs.iter().map(|slot| slot.identifier)
    }

    /// Output identifiers in socket order
    pub fn output_identifiers(&self) -> impl Iterator<Item = &str> + '_ {
        self.outputs.iter().map(|slot| slot.identifier)
    }

    /// Write a typed output value
    pub fn set_output<T: SocketValue>(&mut self, identifier: &str, value: T) -> Result<(), NodeExecError> {
        self.set_output_value(identifier, value.into_value())
    }

    /// Write an output value, checked against the socket type
    pub fn set_output_value(&mut self, identifier: &str, value: Value) -> Result<(), NodeExecError> {
        let slot = self
            .outputs
            .iter_mut()
            .find(|slot| slot.identifier == identifier)
            .ok_or_else(|| NodeExecError(format!("Unknown output: {identifier}")))?;
        if !slot.socket_type.accepts(&value) {
            return Err(TypeError::expected(slot.socket_type.name(), value.type_name()).into());
        }
        slot.value = Some(value);
        Ok(())
    }

    /// Mutable access to the node's scratch storage
    pub fn storage<T: Any>(&mut self) -> Option<&mut T> {
        self.storage.as_deref_mut().and_then(|storage| (**storage).downcast_mut::<T>())
    }
}
