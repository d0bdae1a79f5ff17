//! Slot Value Kinds
//!
//! Any `Clone + Send + Sync + Debug + 'static` type can flow through a slot
//! once it implements [`SlotValue`]. The built-in kinds (booleans, integers,
//! floats, strings and small float vectors) additionally map to and from a
//! [`LiteralValue`], the serializable form used for typed-in input overrides
//! in persisted subgraph definitions.
//!
//! User value kinds implement [`SlotValue`] with the default methods; they
//! can be wired and propagated like any other value but cannot be persisted
//! as literal overrides unless they provide the two conversions.

use std::any::TypeId;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A type that can be carried by an input or output slot.
pub trait SlotValue: Clone + Send + Sync + fmt::Debug + 'static {
    /// Build a value from a persisted literal, if the literal fits this kind.
    fn from_literal(_literal: &LiteralValue) -> Option<Self> {
        None
    }

    /// The persisted literal form of this value, if it has one.
    fn to_literal(&self) -> Option<LiteralValue> {
        None
    }
}

/// A literal input override as stored in an instance description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum LiteralValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Vector2([f32; 2]),
    Vector3([f32; 3]),
    Vector4([f32; 4]),
}

macro_rules! integer_slot_value {
    ($($ty:ty),*) => {
        $(
            impl SlotValue for $ty {
                fn from_literal(literal: &LiteralValue) -> Option<Self> {
                    match literal {
                        LiteralValue::Int(v) => <$ty>::try_from(*v).ok(),
                        _ => None,
                    }
                }

                fn to_literal(&self) -> Option<LiteralValue> {
                    i64::try_from(*self).ok().map(LiteralValue::Int)
                }
            }
        )*
    };
}

integer_slot_value!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl SlotValue for f64 {
    fn from_literal(literal: &LiteralValue) -> Option<Self> {
        match literal {
            LiteralValue::Float(v) => Some(*v),
            LiteralValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    fn to_literal(&self) -> Option<LiteralValue> {
        Some(LiteralValue::Float(*self))
    }
}

impl SlotValue for f32 {
    fn from_literal(literal: &LiteralValue) -> Option<Self> {
        match literal {
            LiteralValue::Float(v) => Some(*v as f32),
            LiteralValue::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    fn to_literal(&self) -> Option<LiteralValue> {
        Some(LiteralValue::Float(f64::from(*self)))
    }
}

impl SlotValue for bool {
    fn from_literal(literal: &LiteralValue) -> Option<Self> {
        match literal {
            LiteralValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    fn to_literal(&self) -> Option<LiteralValue> {
        Some(LiteralValue::Bool(*self))
    }
}

impl SlotValue for String {
    fn from_literal(literal: &LiteralValue) -> Option<Self> {
        match literal {
            LiteralValue::String(v) => Some(v.clone()),
            _ => None,
        }
    }

    fn to_literal(&self) -> Option<LiteralValue> {
        Some(LiteralValue::String(self.clone()))
    }
}

macro_rules! vector_slot_value {
    ($($n:literal => $variant:ident),*) => {
        $(
            impl SlotValue for [f32; $n] {
                fn from_literal(literal: &LiteralValue) -> Option<Self> {
                    match literal {
                        LiteralValue::$variant(v) => Some(*v),
                        _ => None,
                    }
                }

                fn to_literal(&self) -> Option<LiteralValue> {
                    Some(LiteralValue::$variant(*self))
                }
            }
        )*
    };
}

vector_slot_value!(2 => Vector2, 3 => Vector3, 4 => Vector4);

/// The declared value type of a slot.
#[derive(Debug, Clone, Copy)]
pub struct ValueType {
    id: TypeId,
    name: &'static str,
}

impl ValueType {
    /// The value type of `T`.
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The Rust type identity.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name, for diagnostics and display.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ValueType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ValueType {}

impl std::hash::Hash for ValueType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_literals_respect_range() {
        assert_eq!(u8::from_literal(&LiteralValue::Int(200)), Some(200));
        assert_eq!(u8::from_literal(&LiteralValue::Int(300)), None);
        assert_eq!(i32::from_literal(&LiteralValue::Float(1.0)), None);
    }

    #[test]
    fn floats_accept_integer_literals() {
        assert_eq!(f64::from_literal(&LiteralValue::Int(3)), Some(3.0));
        assert_eq!(f32::from_literal(&LiteralValue::Float(0.5)), Some(0.5));
    }

    #[test]
    fn literal_serializes_with_kind_tag() {
        let json = serde_json::to_string(&LiteralValue::Int(5)).unwrap();
        assert_eq!(json, r#"{"kind":"int","value":5}"#);

        let parsed: LiteralValue =
            serde_json::from_str(r#"{"kind":"vector3","value":[1.0,2.0,3.0]}"#).unwrap();
        assert_eq!(parsed, LiteralValue::Vector3([1.0, 2.0, 3.0]));
    }

    #[test]
    fn value_type_equality_ignores_name() {
        assert_eq!(ValueType::of::<i32>(), ValueType::of::<i32>());
        assert_ne!(ValueType::of::<i32>(), ValueType::of::<i64>());
        assert!(ValueType::of::<String>().name().contains("String"));
    }
}
