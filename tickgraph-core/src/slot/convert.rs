//! Value conversions between differently-typed slots.
//!
//! An output only pushes values of its own type. When it is connected to an
//! input of another type, it pushes into a converting sink that turns `T`
//! into `U` and hands the result to the input. Sinks are internal: neither
//! graph owner sees them as slots.

use std::any::{Any, TypeId};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use super::{AnyInputSlot, InputSlot, SlotKey};
use crate::value::{SlotValue, ValueType};

/// A receiver in an output's fan-out list.
pub(crate) trait InputSink<T>: Send + Sync {
    fn push(&self, value: &T);

    /// Identity of the input slot behind this sink.
    fn target(&self) -> SlotKey;

    fn input(&self) -> Option<Arc<dyn AnyInputSlot>>;
}

/// Same-type sink.
pub(crate) struct DirectSink<T: SlotValue> {
    slot: Weak<InputSlot<T>>,
    key: SlotKey,
}

impl<T: SlotValue> DirectSink<T> {
    pub(crate) fn new(slot: &Arc<InputSlot<T>>) -> Self {
        Self {
            slot: Arc::downgrade(slot),
            key: SlotKey::of(slot.as_ref()),
        }
    }
}

impl<T: SlotValue> InputSink<T> for DirectSink<T> {
    fn push(&self, value: &T) {
        if let Some(slot) = self.slot.upgrade() {
            slot.receive(value.clone());
        }
    }

    fn target(&self) -> SlotKey {
        self.key
    }

    fn input(&self) -> Option<Arc<dyn AnyInputSlot>> {
        self.slot.upgrade().map(|slot| slot as Arc<dyn AnyInputSlot>)
    }
}

struct ConvertingSink<T, U: SlotValue> {
    slot: Weak<InputSlot<U>>,
    key: SlotKey,
    convert: fn(&T) -> U,
}

impl<T: SlotValue, U: SlotValue> InputSink<T> for ConvertingSink<T, U> {
    fn push(&self, value: &T) {
        if let Some(slot) = self.slot.upgrade() {
            slot.receive((self.convert)(value));
        }
    }

    fn target(&self) -> SlotKey {
        self.key
    }

    fn input(&self) -> Option<Arc<dyn AnyInputSlot>> {
        self.slot.upgrade().map(|slot| slot as Arc<dyn AnyInputSlot>)
    }
}

type SinkFactory =
    Arc<dyn Fn(&Arc<dyn AnyInputSlot>) -> Option<Box<dyn Any + Send + Sync>> + Send + Sync>;

/// Table of value conversions usable by connections.
///
/// Keyed by `(from, to)` value type. [`Conversions::with_builtin`] installs the
/// lossless numeric widenings; callers register their own with
/// [`Conversions::register`].
pub struct Conversions {
    factories: DashMap<(TypeId, TypeId), SinkFactory>,
}

impl Conversions {
    /// An empty table: only same-type connections succeed.
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// A table holding the built-in lossless numeric widenings.
    pub fn with_builtin() -> Self {
        let table = Self::new();

        table.register::<i8, i16>(|v| i16::from(*v));
        table.register::<i8, i32>(|v| i32::from(*v));
        table.register::<i8, i64>(|v| i64::from(*v));
        table.register::<i8, f32>(|v| f32::from(*v));
        table.register::<i8, f64>(|v| f64::from(*v));

        table.register::<i16, i32>(|v| i32::from(*v));
        table.register::<i16, i64>(|v| i64::from(*v));
        table.register::<i16, f32>(|v| f32::from(*v));
        table.register::<i16, f64>(|v| f64::from(*v));

        table.register::<i32, i64>(|v| i64::from(*v));
        table.register::<i32, f64>(|v| f64::from(*v));

        table.register::<u8, u16>(|v| u16::from(*v));
        table.register::<u8, u32>(|v| u32::from(*v));
        table.register::<u8, u64>(|v| u64::from(*v));
        table.register::<u8, i16>(|v| i16::from(*v));
        table.register::<u8, i32>(|v| i32::from(*v));
        table.register::<u8, i64>(|v| i64::from(*v));
        table.register::<u8, f32>(|v| f32::from(*v));
        table.register::<u8, f64>(|v| f64::from(*v));

        table.register::<u16, u32>(|v| u32::from(*v));
        table.register::<u16, u64>(|v| u64::from(*v));
        table.register::<u16, i32>(|v| i32::from(*v));
        table.register::<u16, i64>(|v| i64::from(*v));
        table.register::<u16, f32>(|v| f32::from(*v));
        table.register::<u16, f64>(|v| f64::from(*v));

        table.register::<u32, u64>(|v| u64::from(*v));
        table.register::<u32, i64>(|v| i64::from(*v));
        table.register::<u32, f64>(|v| f64::from(*v));

        table.register::<f32, f64>(|v| f64::from(*v));

        table
    }

    /// Allow outputs of type `T` to feed inputs of type `U`.
    ///
    /// Registering the same pair again replaces the previous conversion.
    pub fn register<T: SlotValue, U: SlotValue>(&self, convert: fn(&T) -> U) {
        let factory: SinkFactory = Arc::new(move |input: &Arc<dyn AnyInputSlot>| {
            let slot = Arc::clone(input).as_any_arc().downcast::<InputSlot<U>>().ok()?;
            let sink: Arc<dyn InputSink<T>> = Arc::new(ConvertingSink {
                slot: Arc::downgrade(&slot),
                key: SlotKey::of(slot.as_ref()),
                convert,
            });
            Some(Box::new(sink) as Box<dyn Any + Send + Sync>)
        });
        self.factories
            .insert((TypeId::of::<T>(), TypeId::of::<U>()), factory);
    }

    /// Whether values of `from` can be delivered to inputs of `to`.
    pub fn can_convert(&self, from: ValueType, to: ValueType) -> bool {
        from == to || self.factories.contains_key(&(from.id(), to.id()))
    }

    /// Number of registered conversions.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build a converting sink from `T` into `input`.
    pub(crate) fn sink_for<T: SlotValue>(
        &self,
        input: &Arc<dyn AnyInputSlot>,
    ) -> Option<Arc<dyn InputSink<T>>> {
        let factory = {
            let entry = self
                .factories
                .get(&(TypeId::of::<T>(), input.value_type().id()))?;
            Arc::clone(entry.value())
        };
        let boxed = factory(input)?;
        boxed
            .downcast::<Arc<dyn InputSink<T>>>()
            .ok()
            .map(|sink| *sink)
    }
}

impl Default for Conversions {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl std::fmt::Debug for Conversions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversions")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_widens_but_never_narrows() {
        let table = Conversions::with_builtin();

        assert!(table.can_convert(ValueType::of::<i32>(), ValueType::of::<f64>()));
        assert!(table.can_convert(ValueType::of::<f32>(), ValueType::of::<f64>()));
        assert!(!table.can_convert(ValueType::of::<f64>(), ValueType::of::<i32>()));
        assert!(!table.can_convert(ValueType::of::<i32>(), ValueType::of::<String>()));
    }

    #[test]
    fn same_type_is_always_convertible() {
        let table = Conversions::new();
        assert!(table.is_empty());
        assert!(table.can_convert(ValueType::of::<String>(), ValueType::of::<String>()));
    }

    #[test]
    fn registered_conversion_builds_a_sink() {
        let table = Conversions::new();
        table.register::<bool, i32>(|v| i32::from(*v));

        let input = InputSlot::new(0, 0i32);
        let erased: Arc<dyn AnyInputSlot> = input.clone();

        let sink = table.sink_for::<bool>(&erased).expect("sink");
        sink.push(&true);

        assert_eq!(input.value(), 1);
        assert_eq!(sink.target(), SlotKey::of(input.as_ref()));
    }
}
