// SPDX-License-Identifier: MIT OR Apache-2.0
//! Named storage carried across executions, and the node pair that uses it.
//!
//! A `storage_in` node records whatever reaches its `storage` input under
//! its `Name`. A `storage_out` node with the same name replays that value on
//! the next execution, which lets a graph feed results back into itself
//! without forming a cycle.

use crate::declaration::AnyValue;
use crate::descriptor::NodeTreeDescriptor;
use crate::error::Result;
use crate::node::NodeTypeInfo;
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::HashSet;

/// Type name of the storage writer node
pub const STORAGE_IN: &str = "storage_in";
/// Type name of the storage reader node
pub const STORAGE_OUT: &str = "storage_out";
/// Identifier of the key input on both storage nodes
pub const STORAGE_NAME_SOCKET: &str = "Name";
/// Identifier of the value socket on both storage nodes
pub const STORAGE_VALUE_SOCKET: &str = "storage";
/// Key used when the name input holds nothing
pub const DEFAULT_STORAGE_NAME: &str = "Storage";

/// Values keyed by storage name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedStorage {
    values: IndexMap<String, Value>,
}

impl NamedStorage {
    /// Create an empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a stored value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Store a value, replacing any previous one
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Remove a stored value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.shift_remove(key)
    }

    /// Whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Stored keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop every key not in `keep`
    pub(crate) fn retain_keys(&mut self, keep: &HashSet<String>) {
        self.values.retain(|key, _| keep.contains(key));
    }

    /// Remove everything
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Register the `storage_in` / `storage_out` node types
pub fn register_storage_nodes(descriptor: &mut NodeTreeDescriptor) -> Result<()> {
    descriptor.register_node(
        NodeTypeInfo::new(STORAGE_IN)
            .with_ui_name("Storage In")
            .always_required()
            .with_declare(|b| {
                b.add_input::<String>(STORAGE_NAME_SOCKET)
                    .default_val(DEFAULT_STORAGE_NAME.to_string());
                b.add_input::<AnyValue>(STORAGE_VALUE_SOCKET);
            }),
    )?;
    descriptor.register_node(
        NodeTypeInfo::new(STORAGE_OUT)
            .with_ui_name("Storage Out")
            .with_declare(|b| {
                b.add_input::<String>(STORAGE_NAME_SOCKET)
                    .default_val(DEFAULT_STORAGE_NAME.to_string());
                b.add_output::<AnyValue>(STORAGE_VALUE_SOCKET);
            }),
    )?;
    Ok(())
}
