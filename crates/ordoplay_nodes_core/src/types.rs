// SPDX-License-Identifier: MIT OR Apache-2.0
//! Socket type descriptors and the type registry.

use crate::value::{SocketValue, Value};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type of a socket, identified by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SocketType {
    /// Untyped socket (placeholders, storage nodes)
    #[default]
    Any,
    /// Socket carrying values of a registered type
    Typed(&'static str),
}

impl SocketType {
    /// Socket type for a Rust value type
    pub fn of<T: SocketValue>() -> Self {
        Self::Typed(T::TYPE_NAME)
    }

    /// Registered name, empty for [`SocketType::Any`]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Any => "",
            Self::Typed(name) => *name,
        }
    }

    /// Whether this is the untyped socket type
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Check whether a value may be stored in a socket of this type
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Typed(name) => value.type_name() == *name,
        }
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Typed(name) => write!(f, "{name}"),
        }
    }
}

/// Runtime descriptor of a registered value type
#[derive(Debug, Clone, Copy)]
pub struct TypeDescriptor {
    name: &'static str,
    construct: fn() -> Value,
}

fn construct_default<T: SocketValue>() -> Value {
    T::default().into_value()
}

impl TypeDescriptor {
    /// Descriptor for a Rust value type
    pub fn of<T: SocketValue>() -> Self {
        Self {
            name: T::TYPE_NAME,
            construct: construct_default::<T>,
        }
    }

    /// Type name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Socket type described by this descriptor
    pub fn socket_type(&self) -> SocketType {
        SocketType::Typed(self.name)
    }

    /// Default-construct a value of this type
    pub fn construct(&self) -> Value {
        (self.construct)()
    }

    /// Compare two values as values of this type
    pub fn values_equal(&self, a: &Value, b: &Value) -> bool {
        a.type_name() == self.name && b.type_name() == self.name && a == b
    }
}

/// Type-erased converter between two registered types
pub type ConversionFn = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Registry of socket value types and pairwise converters
#[derive(Clone, Default)]
pub struct TypeRegistry {
    types: IndexMap<&'static str, TypeDescriptor>,
    conversions: HashMap<(SocketType, SocketType), ConversionFn>,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the primitive types registered
    pub fn with_primitives() -> Self {
        let mut registry = Self::new();
        registry
            .register_type::<bool>()
            .register_type::<i32>()
            .register_type::<f32>()
            .register_type::<f64>()
            .register_type::<String>();
        registry
    }

    /// Register a type. Registering the same name again replaces the descriptor.
    pub fn register_type<T: SocketValue>(&mut self) -> &mut Self {
        self.types.insert(T::TYPE_NAME, TypeDescriptor::of::<T>());
        self
    }

    /// Look up a descriptor by type name
    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(name)
    }

    /// Resolve a type name to a socket type. The empty name is [`SocketType::Any`].
    pub fn resolve(&self, name: &str) -> Option<SocketType> {
        if name.is_empty() {
            return Some(SocketType::Any);
        }
        self.get(name).map(TypeDescriptor::socket_type)
    }

    /// Whether a socket type can be used in declarations
    pub fn is_registered(&self, socket_type: SocketType) -> bool {
        match socket_type {
            SocketType::Any => true,
            SocketType::Typed(name) => self.types.contains_key(name),
        }
    }

    /// Default-construct a value for a socket type, `None` for untyped sockets
    pub fn construct(&self, socket_type: SocketType) -> Option<Value> {
        match socket_type {
            SocketType::Any => None,
            SocketType::Typed(name) => self.get(name).map(TypeDescriptor::construct),
        }
    }

    /// Compare two values under a socket type
    pub fn values_equal(&self, socket_type: SocketType, a: &Value, b: &Value) -> bool {
        match socket_type {
            SocketType::Any => a == b,
            SocketType::Typed(name) => self
                .get(name)
                .is_some_and(|descriptor| descriptor.values_equal(a, b)),
        }
    }

    /// All registered descriptors in registration order
    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values()
    }

    /// Register a converter from `A` to `B`, replacing any previous one for the pair.
    ///
    /// The converter rewrites a default-constructed `B` in place and reports
    /// success; a `false` return makes the conversion fail.
    pub fn register_conversion<A, B, F>(&mut self, convert: F) -> &mut Self
    where
        A: SocketValue,
        B: SocketValue,
        F: Fn(&A, &mut B) -> bool + Send + Sync + 'static,
    {
        let erased: ConversionFn = Arc::new(move |value: &Value| {
            let from = A::from_value_ref(value).ok()?;
            let mut to = B::default();
            convert(from, &mut to).then(|| to.into_value())
        });
        self.conversions
            .insert((SocketType::of::<A>(), SocketType::of::<B>()), erased);
        self
    }

    /// Whether a converter exists for the ordered pair
    pub fn has_conversion(&self, from: SocketType, to: SocketType) -> bool {
        self.conversions.contains_key(&(from, to))
    }

    /// Get the converter for the ordered pair
    pub fn conversion(&self, from: SocketType, to: SocketType) -> Option<ConversionFn> {
        self.conversions.get(&(from, to)).cloned()
    }

    /// Convert a value between two types
    pub fn convert(&self, from: SocketType, to: SocketType, value: &Value) -> Option<Value> {
        self.conversions.get(&(from, to)).and_then(|convert| convert(value))
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .field("conversions", &self.conversions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = TypeRegistry::new();
        assert!(registry.resolve("int").is_none());

        registry.register_type::<i32>();
        assert_eq!(registry.resolve("int"), Some(SocketType::of::<i32>()));
        assert_eq!(registry.resolve(""), Some(SocketType::Any));
        assert!(registry.is_registered(SocketType::Any));
        assert!(!registry.is_registered(SocketType::of::<f32>()));

        // Re-registering replaces, it does not duplicate
        registry.register_type::<i32>();
        assert_eq!(registry.types().count(), 1);
    }

    #[test]
    fn test_construct_and_compare() {
        let registry = TypeRegistry::with_primitives();
        assert_eq!(registry.construct(SocketType::of::<i32>()), Some(Value::Int(0)));
        assert_eq!(
            registry.construct(SocketType::of::<String>()),
            Some(Value::String(String::new()))
        );
        assert_eq!(registry.construct(SocketType::Any), None);

        let int = SocketType::of::<i32>();
        assert!(registry.values_equal(int, &Value::Int(4), &Value::Int(4)));
        assert!(!registry.values_equal(int, &Value::Int(4), &Value::Int(5)));
        assert!(!registry.values_equal(int, &Value::Float(4.0), &Value::Float(4.0)));
    }

    #[test]
    fn test_conversion_roundtrip() {
        let mut registry = TypeRegistry::with_primitives();
        registry.register_conversion::<f32, i32, _>(|from, to| {
            *to = *from as i32;
            true
        });
        let float = SocketType::of::<f32>();
        let int = SocketType::of::<i32>();

        assert!(registry.has_conversion(float, int));
        assert!(!registry.has_conversion(int, float));
        assert_eq!(registry.convert(float, int, &Value::Float(2.7)), Some(Value::Int(2)));
        // Wrong input type yields nothing
        assert_eq!(registry.convert(float, int, &Value::Int(2)), None);
    }

    #[test]
    fn test_failing_converter() {
        let mut registry = TypeRegistry::with_primitives();
        registry.register_conversion::<String, i32, _>(|from, to| match from.parse() {
            Ok(v) => {
                *to = v;
                true
            }
            Err(_) => false,
        });
        let from = SocketType::of::<String>();
        let to = SocketType::of::<i32>();
        assert_eq!(registry.convert(from, to, &Value::from("12")), Some(Value::Int(12)));
        assert_eq!(registry.convert(from, to, &Value::from("twelve")), None);
    }
}
