// SPDX-License-Identifier: MIT OR Apache-2.0
//! Values that flow through sockets and execution slots.
//!
//! The set of payload types is closed: every type a host wants to move
//! through a graph gets a [`Value`] variant and a [`SocketValue`] impl.

use std::fmt;
use thiserror::Error;

/// A type-erased socket payload
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// 32-bit integer
    Int(i32),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// UTF-8 string
    String(String),
    /// 2D vector
    Float2([f32; 2]),
    /// 3D vector
    Float3([f32; 3]),
    /// 4D vector / color
    Float4([f32; 4]),
    /// Flat float buffer (positions, samples, pixels...)
    FloatBuffer(Vec<f32>),
    /// Flat integer buffer (indices, ids...)
    IntBuffer(Vec<i32>),
}

impl Value {
    /// Name of the socket type this value belongs to
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => <bool as SocketValue>::TYPE_NAME,
            Self::Int(_) => <i32 as SocketValue>::TYPE_NAME,
            Self::Float(_) => <f32 as SocketValue>::TYPE_NAME,
            Self::Double(_) => <f64 as SocketValue>::TYPE_NAME,
            Self::String(_) => <String as SocketValue>::TYPE_NAME,
            Self::Float2(_) => <[f32; 2] as SocketValue>::TYPE_NAME,
            Self::Float3(_) => <[f32; 3] as SocketValue>::TYPE_NAME,
            Self::Float4(_) => <[f32; 4] as SocketValue>::TYPE_NAME,
            Self::FloatBuffer(_) => <Vec<f32> as SocketValue>::TYPE_NAME,
            Self::IntBuffer(_) => <Vec<i32> as SocketValue>::TYPE_NAME,
        }
    }

    /// Whether this value is one of the primitive kinds stored in snapshots
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::Double(_) | Self::String(_)
        )
    }

    /// Extract a typed copy of this value
    pub fn get<T: SocketValue>(&self) -> Result<T, TypeError> {
        T::from_value_ref(self).cloned()
    }

    /// Clamp numeric values into the optional soft range.
    ///
    /// The upper bound is applied first, so an inverted range resolves to `min`.
    pub(crate) fn clamped(self, min: Option<&Value>, max: Option<&Value>) -> Value {
        match self {
            Self::Int(mut v) => {
                if let Some(Self::Int(hi)) = max {
                    v = v.min(*hi);
                }
                if let Some(Self::Int(lo)) = min {
                    v = v.max(*lo);
                }
                Self::Int(v)
            }
            Self::Float(mut v) => {
                if let Some(Self::Float(hi)) = max {
                    v = v.min(*hi);
                }
                if let Some(Self::Float(lo)) = min {
                    v = v.max(*lo);
                }
                Self::Float(v)
            }
            Self::Double(mut v) => {
                if let Some(Self::Double(hi)) = max {
                    v = v.min(*hi);
                }
                if let Some(Self::Double(lo)) = min {
                    v = v.max(*lo);
                }
                Self::Double(v)
            }
            other => other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Float2(v) => write!(f, "{v:?}"),
            Self::Float3(v) => write!(f, "{v:?}"),
            Self::Float4(v) => write!(f, "{v:?}"),
            Self::FloatBuffer(v) => write!(f, "float[{}]", v.len()),
            Self::IntBuffer(v) => write!(f, "int[{}]", v.len()),
        }
    }
}

/// Error when a value has the wrong type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("type error: expected {expected}, got {got}")]
pub struct TypeError {
    /// The type that was expected
    pub expected: &'static str,
    /// The type that was actually provided
    pub got: &'static str,
}

impl TypeError {
    /// Create a new type error
    pub fn expected(expected: &'static str, got: &'static str) -> Self {
        Self { expected, got }
    }
}

/// A Rust type that can travel through a socket
pub trait SocketValue: Clone + Default + PartialEq + Send + Sync + 'static {
    /// Registered type name, also used in snapshots
    const TYPE_NAME: &'static str;
    /// Whether sockets of this type get an implicit default value
    const HAS_DEFAULT: bool = false;

    /// Wrap into a [`Value`]
    fn into_value(self) -> Value;

    /// Unwrap an owned [`Value`]
    fn from_value(value: Value) -> Result<Self, TypeError>;

    /// Borrow the payload of a [`Value`]
    fn from_value_ref(value: &Value) -> Result<&Self, TypeError>;
}

/// Socket types that accept soft `min`/`max` bounds
pub trait RangedValue: SocketValue + PartialOrd {}

macro_rules! socket_value {
    ($ty:ty, $variant:ident, $name:literal, $has_default:literal) => {
        impl SocketValue for $ty {
            const TYPE_NAME: &'static str = $name;
            const HAS_DEFAULT: bool = $has_default;

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: Value) -> Result<Self, TypeError> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(TypeError::expected($name, other.type_name())),
                }
            }

            fn from_value_ref(value: &Value) -> Result<&Self, TypeError> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(TypeError::expected($name, other.type_name())),
                }
            }
        }

        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }
    };
}

socket_value!(bool, Bool, "bool", true);
socket_value!(i32, Int, "int", true);
socket_value!(f32, Float, "float", true);
socket_value!(f64, Double, "double", true);
socket_value!(String, String, "string", true);
socket_value!([f32; 2], Float2, "float2", false);
socket_value!([f32; 3], Float3, "float3", false);
socket_value!([f32; 4], Float4, "float4", false);
socket_value!(Vec<f32>, FloatBuffer, "float_buffer", false);
socket_value!(Vec<i32>, IntBuffer, "int_buffer", false);

impl RangedValue for i32 {}
impl RangedValue for f32 {}
impl RangedValue for f64 {}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}
