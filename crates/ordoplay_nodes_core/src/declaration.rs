// SPDX-License-Identifier: MIT OR Apache-2.0
//! Static socket declarations built by node type declare callbacks.
//!
//! A declare callback receives a [`NodeDeclarationBuilder`] and lists the
//! node's sockets in order:
//!
//! ```ignore
//! info.with_declare(|b| {
//!     b.add_input::<f32>("Factor").min(0.0).max(1.0).default_val(0.5);
//!     b.add_input_group("Layers");
//!     b.add_output::<Vec<f32>>("Samples");
//!     b.storage::<SampleCache>();
//! })
//! ```

use crate::error::{GraphError, Result};
use crate::socket::{Socket, SocketDirection};
use crate::types::SocketType;
use crate::value::{RangedValue, SocketValue, Value};
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Declaration of a single socket
#[derive(Debug, Clone, PartialEq)]
pub struct SocketDeclaration {
    /// Identifier, unique among sockets of the same direction
    pub identifier: String,
    /// Display name
    pub ui_name: String,
    /// Input or output
    pub direction: SocketDirection,
    /// Socket type
    pub socket_type: SocketType,
    /// Default value applied to sockets without a value
    pub default_value: Option<Value>,
    /// Soft minimum
    pub min: Option<Value>,
    /// Soft maximum
    pub max: Option<Value>,
}

impl SocketDeclaration {
    /// Whether an existing socket can be reused for this declaration
    pub(crate) fn matches(&self, socket: &Socket) -> bool {
        socket.group.is_none()
            && !socket.placeholder
            && socket.identifier == self.identifier
            && socket.direction == self.direction
            && socket.socket_type == self.socket_type
    }

    /// Apply bounds, and the clamped default if the socket holds no value yet
    pub(crate) fn update_default_value(&self, socket: &mut Socket) {
        socket.min = self.min.clone();
        socket.max = self.max.clone();
        if socket.value.is_some() {
            return;
        }
        socket.value = self
            .default_value
            .clone()
            .map(|value| value.clamped(self.min.as_ref(), self.max.as_ref()));
    }
}

/// Declaration of a variadic socket group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketGroupDeclaration {
    /// Group identifier
    pub identifier: String,
    /// Direction of the group's sockets
    pub direction: SocketDirection,
}

/// One entry of a node declaration, in display order
#[derive(Debug, Clone, PartialEq)]
pub enum DeclarationItem {
    /// A fixed socket
    Socket(SocketDeclaration),
    /// A group of sockets materialized on demand
    Group(SocketGroupDeclaration),
}

impl DeclarationItem {
    /// Identifier of the socket or group
    pub fn identifier(&self) -> &str {
        match self {
            Self::Socket(socket) => &socket.identifier,
            Self::Group(group) => &group.identifier,
        }
    }

    /// Direction of the socket or group
    pub fn direction(&self) -> SocketDirection {
        match self {
            Self::Socket(socket) => socket.direction,
            Self::Group(group) => group.direction,
        }
    }
}

/// Factory for a node's persistent scratch storage
pub type StorageFactory = Arc<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

/// Ordered socket layout of a node type
#[derive(Clone, Default)]
pub struct NodeDeclaration {
    items: Vec<DeclarationItem>,
    storage: Option<StorageFactory>,
}

impl NodeDeclaration {
    /// All items in declaration order
    pub fn items(&self) -> &[DeclarationItem] {
        &self.items
    }

    /// Declared fixed sockets of one direction
    pub fn sockets(&self, direction: SocketDirection) -> impl Iterator<Item = &SocketDeclaration> {
        self.items.iter().filter_map(move |item| match item {
            DeclarationItem::Socket(socket) if socket.direction == direction => Some(socket),
            _ => None,
        })
    }

    /// Declared fixed input sockets
    pub fn inputs(&self) -> impl Iterator<Item = &SocketDeclaration> {
        self.sockets(SocketDirection::Input)
    }

    /// Declared fixed output sockets
    pub fn outputs(&self) -> impl Iterator<Item = &SocketDeclaration> {
        self.sockets(SocketDirection::Output)
    }

    /// Declared socket groups
    pub fn groups(&self) -> impl Iterator<Item = &SocketGroupDeclaration> {
        self.items.iter().filter_map(|item| match item {
            DeclarationItem::Group(group) => Some(group),
            DeclarationItem::Socket(_) => None,
        })
    }

    /// Whether nodes of this type carry scratch storage
    pub fn has_storage(&self) -> bool {
        self.storage.is_some()
    }

    /// Create a fresh scratch storage payload
    pub(crate) fn create_storage(&self) -> Option<Box<dyn Any + Send>> {
        self.storage.as_ref().map(|factory| factory())
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for item in &self.items {
            if !seen.insert((item.direction(), item.identifier())) {
                return Err(GraphError::DuplicateSocketIdentifier {
                    identifier: item.identifier().to_string(),
                    direction: item.direction(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for NodeDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDeclaration")
            .field("items", &self.items)
            .field("has_storage", &self.has_storage())
            .finish()
    }
}

/// Types usable in socket declarations
pub trait DeclaredType: 'static {
    /// Socket type of the declared socket
    fn socket_type() -> SocketType;
    /// Default given to sockets when the declaration sets none
    fn implicit_default() -> Option<Value>;
}

impl<T: SocketValue> DeclaredType for T {
    fn socket_type() -> SocketType {
        SocketType::of::<T>()
    }

    fn implicit_default() -> Option<Value> {
        T::HAS_DEFAULT.then(|| T::default().into_value())
    }
}

/// Marker for untyped sockets
#[derive(Debug, Clone, Copy)]
pub struct AnyValue;

impl DeclaredType for AnyValue {
    fn socket_type() -> SocketType {
        SocketType::Any
    }

    fn implicit_default() -> Option<Value> {
        None
    }
}

/// Builder passed to declare callbacks
#[derive(Debug, Default)]
pub struct NodeDeclarationBuilder {
    declaration: NodeDeclaration,
}

impl NodeDeclarationBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Validate and return the built declaration
    pub(crate) fn finish(self) -> Result<NodeDeclaration> {
        self.declaration.validate()?;
        Ok(self.declaration)
    }

    /// Declare an input socket. The name doubles as identifier.
    pub fn add_input<T: DeclaredType>(&mut self, name: &str) -> SocketDeclarationBuilder<'_, T> {
        self.add_socket(name, SocketDirection::Input)
    }

    /// Declare an output socket. The name doubles as identifier.
    pub fn add_output<T: DeclaredType>(&mut self, name: &str) -> SocketDeclarationBuilder<'_, T> {
        self.add_socket(name, SocketDirection::Output)
    }

    /// Declare a variadic input group
    pub fn add_input_group(&mut self, identifier: &str) {
        self.add_group(identifier, SocketDirection::Input);
    }

    /// Declare a variadic output group
    pub fn add_output_group(&mut self, identifier: &str) {
        self.add_group(identifier, SocketDirection::Output);
    }

    /// Declare the node's persistent scratch storage type
    pub fn storage<S: Default + Any + Send>(&mut self) {
        self.declaration.storage = Some(Arc::new(|| Box::new(S::default()) as Box<dyn Any + Send>));
    }

    fn add_socket<T: DeclaredType>(
        &mut self,
        name: &str,
        direction: SocketDirection,
    ) -> SocketDeclarationBuilder<'_, T> {
        let index = self.declaration.items.len();
        self.declaration.items.push(DeclarationItem::Socket(SocketDeclaration {
            identifier: name.to_string(),
            ui_name: name.to_string(),
            direction,
            socket_type: T::socket_type(),
            default_value: T::implicit_default(),
            min: None,
            max: None,
        }));
        SocketDeclarationBuilder {
            declaration: &mut self.declaration,
            index,
            _marker: PhantomData,
        }
    }

    fn add_group(&mut self, identifier: &str, direction: SocketDirection) {
        self.declaration
            .items
            .push(DeclarationItem::Group(SocketGroupDeclaration {
                identifier: identifier.to_string(),
                direction,
            }));
    }
}

/// Chained settings for one declared socket
pub struct SocketDeclarationBuilder<'a, T> {
    declaration: &'a mut NodeDeclaration,
    index: usize,
    _marker: PhantomData<T>,
}

impl<T> SocketDeclarationBuilder<'_, T> {
    fn update(self, apply: impl FnOnce(&mut SocketDeclaration)) -> Self {
        if let Some(DeclarationItem::Socket(decl)) = self.declaration.items.get_mut(self.index) {
            apply(decl);
        }
        self
    }

    /// Use a different identifier than the display name
    pub fn identifier(self, identifier: &str) -> Self {
        self.update(|decl| decl.identifier = identifier.to_string())
    }
}

impl<T: SocketValue> SocketDeclarationBuilder<'_, T> {
    /// Set the default value
    pub fn default_val(self, value: T) -> Self {
        self.update(|decl| decl.default_value = Some(value.into_value()))
    }
}

impl<T: RangedValue> SocketDeclarationBuilder<'_, T> {
    /// Set the soft minimum
    pub fn min(self, value: T) -> Self {
        self.update(|decl| decl.min = Some(value.into_value()))
    }

    /// Set the soft maximum
    pub fn max(self, value: T) -> Self {
        self.update(|decl| decl.max = Some(value.into_value()))
    }
}

/// Run a declare callback into a fresh declaration
pub(crate) fn build_declaration(declare: &dyn Fn(&mut NodeDeclarationBuilder)) -> Result<NodeDeclaration> {
    let mut builder = NodeDeclarationBuilder::new();
    declare(&mut builder);
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declaration_order_and_defaults() {
        let declaration = build_declaration(&|b| {
            b.add_input::<f32>("test_socket").min(0.0).max(1.0).default_val(0.0);
            b.add_input::<i32>("test_socket2").min(-15).max(3).default_val(1);
            b.add_input::<String>("string_socket").default_val("aaa".to_string());
            b.add_input::<Vec<f32>>("samples");
            b.add_output::<i32>("output");
        })
        .unwrap();

        let inputs: Vec<_> = declaration.inputs().map(|s| s.identifier.as_str()).collect();
        assert_eq!(inputs, ["test_socket", "test_socket2", "string_socket", "samples"]);
        assert_eq!(declaration.outputs().count(), 1);

        let string = declaration.inputs().nth(2).unwrap();
        assert_eq!(string.default_value, Some(Value::from("aaa")));
        // Buffers carry no implicit default
        let samples = declaration.inputs().nth(3).unwrap();
        assert_eq!(samples.default_value, None);
        // Primitive outputs get an implicit default
        let output = declaration.outputs().next().unwrap();
        assert_eq!(output.default_value, Some(Value::Int(0)));
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let result = build_declaration(&|b| {
            b.add_input::<i32>("test_socket");
            b.add_input::<i32>("test_socket");
        });
        assert!(matches!(
            result,
            Err(GraphError::DuplicateSocketIdentifier { direction: SocketDirection::Input, .. })
        ));

        // Same identifier in opposite directions is fine
        let result = build_declaration(&|b| {
            b.add_input::<i32>("value");
            b.add_output::<i32>("value");
        });
        assert!(result.is_ok());
    }

    #[test]
    fn test_custom_identifier_and_groups() {
        let declaration = build_declaration(&|b| {
            b.add_input::<AnyValue>("Storage").identifier("storage");
            b.add_input_group("Inputs");
            b.add_output_group("Outputs");
            b.storage::<Vec<u8>>();
        })
        .unwrap();

        let storage = declaration.inputs().next().unwrap();
        assert_eq!(storage.identifier, "storage");
        assert_eq!(storage.ui_name, "Storage");
        assert_eq!(storage.socket_type, SocketType::Any);
        assert_eq!(declaration.groups().count(), 2);
        assert!(declaration.has_storage());
        assert!(declaration.create_storage().is_some());
    }

    #[test]
    fn test_update_default_value_respects_existing() {
        let declaration = build_declaration(&|b| {
            b.add_input::<i32>("clamped").min(-15).max(3).default_val(10);
        })
        .unwrap();
        let decl = declaration.inputs().next().unwrap();

        let mut socket = Socket::new(
            crate::socket::SocketId(1),
            crate::node::NodeId(1),
            "clamped",
            "clamped",
            SocketDirection::Input,
            SocketType::of::<i32>(),
        );
        decl.update_default_value(&mut socket);
        assert_eq!(socket.value, Some(Value::Int(3)));

        socket.value = Some(Value::Int(-2));
        decl.update_default_value(&mut socket);
        assert_eq!(socket.value, Some(Value::Int(-2)));
    }
}
