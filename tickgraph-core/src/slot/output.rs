//! Output slot implementation.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{ReentrantMutex, RwLock};
use smallvec::SmallVec;

use super::convert::{DirectSink, InputSink};
use super::{
    label, AnyInputSlot, AnyOutputSlot, AnySlot, Conversions, InputMirrorCtor, InputSlot,
    SlotDirection, SlotId, SlotKey,
};
use crate::error::UsageViolation;
use crate::event::{Event, SubscriberId};
use crate::value::{LiteralValue, SlotValue, ValueType};

type Sinks<T> = SmallVec<[Arc<dyn InputSink<T>>; 4]>;

/// A slot that produces values of type `T`.
///
/// Every [`OutputSlot::set`] pushes the value into each connected input, in
/// connection order, and then raises this slot's `ValueChanged`. The output
/// never owns its inputs; inputs that were dropped are skipped.
pub struct OutputSlot<T: SlotValue> {
    id: SlotId,
    name: OnceLock<String>,
    me: Weak<Self>,

    value: RwLock<T>,

    /// Guards write + fan-out + notify as one unit.
    lock: ReentrantMutex<()>,

    /// Fan-out list.
    targets: RwLock<Sinks<T>>,

    /// Mirror input whose values are forwarded into this output.
    transformation_source: OnceLock<SlotKey>,

    value_changed: Event<()>,
}

impl<T: SlotValue> OutputSlot<T> {
    /// Create an output slot with the given ID and initial value.
    pub fn new(id: u16, value: T) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: SlotId(id),
            name: OnceLock::new(),
            me: me.clone(),
            value: RwLock::new(value),
            lock: ReentrantMutex::new(()),
            targets: RwLock::new(SmallVec::new()),
            transformation_source: OnceLock::new(),
            value_changed: Event::new(),
        })
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.name.get().map(String::as_str).unwrap_or("")
    }

    /// The current value.
    pub fn value(&self) -> T {
        self.value.read().clone()
    }

    /// Read the current value without cloning it.
    pub fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.read())
    }

    /// Write a new value and propagate it.
    ///
    /// With nobody connected or listening this only stores the value.
    pub fn set(&self, value: T) {
        if self.targets.read().is_empty() && self.value_changed.is_empty() {
            *self.value.write() = value;
            return;
        }

        let _guard = self.lock.lock();
        *self.value.write() = value.clone();

        let sinks: Sinks<T> = self.targets.read().iter().cloned().collect();
        for sink in sinks {
            sink.push(&value);
        }

        self.value_changed.emit(label(self.name()), ());
    }

    /// Update the value from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = {
            let _guard = self.lock.lock();
            f(&self.value.read())
        };
        self.set(next);
    }

    /// Subscribe to `ValueChanged`.
    pub fn on_value_changed<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.value_changed.subscribe(move |()| callback())
    }

    /// Number of connected inputs.
    pub fn connection_count(&self) -> usize {
        self.targets.read().len()
    }

    fn sink_for(&self, input: &Arc<dyn AnyInputSlot>, conversions: &Conversions) -> Option<Arc<dyn InputSink<T>>> {
        match Arc::clone(input).as_any_arc().downcast::<InputSlot<T>>() {
            Ok(direct) => Some(Arc::new(DirectSink::new(&direct))),
            Err(_) => conversions.sink_for::<T>(input),
        }
    }
}

impl<T: SlotValue> AnySlot for OutputSlot<T> {
    fn id(&self) -> SlotId {
        self.id
    }

    fn name(&self) -> &str {
        OutputSlot::name(self)
    }

    fn direction(&self) -> SlotDirection {
        SlotDirection::Output
    }

    fn value_type(&self) -> ValueType {
        ValueType::of::<T>()
    }

    fn key(&self) -> SlotKey {
        SlotKey::of(self)
    }

    fn literal(&self) -> Option<LiteralValue> {
        self.value.read().to_literal()
    }

    fn subscribe_value_changed(&self, callback: Box<dyn Fn() + Send + Sync>) -> SubscriberId {
        self.value_changed.subscribe(move |()| callback())
    }

    fn unsubscribe_value_changed(&self, id: SubscriberId) -> bool {
        self.value_changed.unsubscribe(id)
    }

    fn disconnect_all(&self) {
        // Release from the back; each release removes exactly that entry.
        loop {
            let Some(last) = self.targets.read().last().cloned() else {
                break;
            };

            let released = last
                .input()
                .map(|input| input.release_connection(self).is_ok())
                .unwrap_or(false);

            if !released {
                // Dropped or re-wired input: drop the stale entry directly.
                self.detach_input(last.target());
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn bind_name(&self, name: &str) -> bool {
        self.name.set(name.to_owned()).is_ok()
    }
}

impl<T: SlotValue> AnyOutputSlot for OutputSlot<T> {
    fn accepts(&self, input: &Arc<dyn AnyInputSlot>, conversions: &Conversions) -> bool {
        self.sink_for(input, conversions).is_some()
    }

    fn attach_input(&self, input: &Arc<dyn AnyInputSlot>, conversions: &Conversions) -> bool {
        let Some(sink) = self.sink_for(input, conversions) else {
            return false;
        };

        let _guard = self.lock.lock();
        {
            let mut targets = self.targets.write();
            targets.retain(|existing| existing.target() != sink.target());
            targets.push(Arc::clone(&sink));
        }

        // Newly wired inputs are never stale.
        let current = self.value();
        sink.push(&current);
        true
    }

    fn detach_input(&self, input: SlotKey) -> bool {
        let mut targets = self.targets.write();
        match targets.iter().rposition(|sink| sink.target() == input) {
            Some(index) => {
                targets.remove(index);
                true
            }
            None => false,
        }
    }

    fn connection_count(&self) -> usize {
        OutputSlot::connection_count(self)
    }

    fn is_connected_to(&self, input: SlotKey) -> bool {
        self.targets.read().iter().any(|sink| sink.target() == input)
    }

    fn attach_transformation_source(
        &self,
        input: &Arc<dyn AnyInputSlot>,
    ) -> Result<(), UsageViolation> {
        self.transformation_source
            .set(input.key())
            .map_err(|_| UsageViolation::TransformationAlreadyAttached(self.id))
    }

    fn transformation_source(&self) -> Option<SlotKey> {
        self.transformation_source.get().copied()
    }

    fn input_mirror_ctor(&self) -> InputMirrorCtor {
        input_mirror_of::<T>
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

fn input_mirror_of<T: SlotValue>(slot: &dyn AnyOutputSlot) -> Option<Arc<dyn AnyInputSlot>> {
    let slot = slot.as_any().downcast_ref::<OutputSlot<T>>()?;
    let mirror = InputSlot::new(slot.id.0, slot.value());
    Some(mirror)
}

impl<T: SlotValue> OutputSlot<T> {
    /// This slot as a type-erased handle.
    pub fn erased(&self) -> Option<Arc<dyn AnyOutputSlot>> {
        self.me.upgrade().map(|me| me as Arc<dyn AnyOutputSlot>)
    }
}

impl<T: SlotValue> fmt::Debug for OutputSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSlot")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("value", &*self.value.read())
            .field("connections", &self.connection_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn set_without_listeners_only_stores() {
        let output = OutputSlot::new(0, 1u32);
        output.set(2);
        assert_eq!(output.value(), 2);
        assert_eq!(output.connection_count(), 0);
    }

    #[test]
    fn fan_out_reaches_inputs_before_own_notification() {
        let conversions = Conversions::with_builtin();
        let output = OutputSlot::new(0, 0i32);
        let a = InputSlot::new(0, 0i32);
        let b = InputSlot::new(1, 0i32);
        a.connect(&output, &conversions);
        b.connect(&output, &conversions);

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (a2, b2, seen2) = (a.clone(), b.clone(), seen.clone());
        output.on_value_changed(move || seen2.lock().push((a2.value(), b2.value())));

        output.set(8);
        assert_eq!(*seen.lock(), vec![(8, 8)]);
    }

    #[test]
    fn disconnect_all_empties_fan_out_and_is_idempotent() {
        let conversions = Conversions::with_builtin();
        let output = OutputSlot::new(0, 0i32);
        let inputs: Vec<_> = (0..5).map(|i| InputSlot::new(i, 0i32)).collect();
        for input in &inputs {
            assert!(input.connect(&output, &conversions));
        }
        assert_eq!(output.connection_count(), 5);

        output.disconnect_all();
        output.disconnect_all();

        assert_eq!(output.connection_count(), 0);
        assert!(inputs.iter().all(|input| !input.is_connected()));
    }

    #[test]
    fn dropped_inputs_are_skipped_and_pruned() {
        let conversions = Conversions::with_builtin();
        let output = OutputSlot::new(0, 0i32);
        {
            let input = InputSlot::new(0, 0i32);
            input.connect(&output, &conversions);
        }

        output.set(3);
        assert_eq!(output.value(), 3);

        output.disconnect_all();
        assert_eq!(output.connection_count(), 0);
    }

    #[test]
    fn panicking_subscriber_keeps_value_and_siblings() {
        let output = OutputSlot::new(0, 0i32);
        let calls = Arc::new(AtomicUsize::new(0));

        output.on_value_changed(|| panic!("node logic failure"));
        let calls_clone = calls.clone();
        output.on_value_changed(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        output.set(5);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(output.value(), 5);
    }

    #[test]
    fn subscriber_may_write_back_into_its_own_slot() {
        let output = OutputSlot::new(0, 0i32);
        let handle = output.clone();
        output.on_value_changed(move || {
            if handle.value() < 3 {
                handle.update(|v| v + 1);
            }
        });

        output.set(1);
        assert_eq!(output.value(), 3);
    }

    #[test]
    fn input_mirror_carries_id_and_value() {
        let output = OutputSlot::new(6, 2.5f32);
        let ctor = output.input_mirror_ctor();
        let mirror = ctor(output.as_ref()).expect("mirror");

        assert_eq!(mirror.id(), SlotId(6));
        assert_eq!(mirror.value_type(), ValueType::of::<f32>());
        assert_eq!(mirror.literal(), Some(LiteralValue::Float(2.5)));
    }

    #[test]
    fn second_transformation_source_is_rejected_and_state_kept() {
        let output = OutputSlot::new(4, 0i32);
        let first: Arc<dyn AnyInputSlot> = InputSlot::new(4, 0i32);
        let second: Arc<dyn AnyInputSlot> = InputSlot::new(4, 0i32);

        output.attach_transformation_source(&first).unwrap();
        assert_eq!(
            output.attach_transformation_source(&second),
            Err(UsageViolation::TransformationAlreadyAttached(SlotId(4)))
        );
        assert_eq!(output.transformation_source(), Some(first.key()));
        assert_eq!(output.connection_count(), 0);
    }
}
