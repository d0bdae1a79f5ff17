//! Input slot implementation.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, ReentrantMutex, RwLock};

use super::{
    label, AnyInputSlot, AnyOutputSlot, AnySlot, Conversions, LiteralRefusal, OutputMirrorCtor,
    OutputSlot, SlotDirection, SlotId, SlotKey,
};
use crate::error::UsageViolation;
use crate::event::{Event, SubscriberId};
use crate::value::{LiteralValue, SlotValue, ValueType};

/// Weak link to the output this input is connected to.
struct Upstream {
    key: SlotKey,
    slot: Weak<dyn AnyOutputSlot>,
}

/// A slot that receives values of type `T`.
///
/// Until connected, the slot holds its default value (or a literal applied to
/// it). Once connected it mirrors the upstream output: every write to that
/// output lands here synchronously.
///
/// # Example
///
/// ```rust
/// use tickgraph_core::slot::{Conversions, InputSlot, OutputSlot};
///
/// let conversions = Conversions::with_builtin();
/// let output = OutputSlot::new(0, 0i32);
/// let input = InputSlot::new(0, 5i32);
///
/// assert!(input.connect(&output, &conversions));
/// assert_eq!(input.value(), 0);
///
/// output.set(42);
/// assert_eq!(input.value(), 42);
/// ```
pub struct InputSlot<T: SlotValue> {
    id: SlotId,
    name: OnceLock<String>,
    me: Weak<Self>,

    default: T,
    value: RwLock<T>,

    /// Guards receive + forward + notify as one unit.
    lock: ReentrantMutex<()>,

    upstream: Mutex<Option<Upstream>>,

    /// Output this slot forwards every received value to.
    transformation: OnceLock<Arc<OutputSlot<T>>>,

    value_changed: Event<()>,
    connection_state_changed: Event<bool>,
}

impl<T: SlotValue> InputSlot<T> {
    /// Create an input slot with the given ID and default value.
    pub fn new(id: u16, default: T) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: SlotId(id),
            name: OnceLock::new(),
            me: me.clone(),
            value: RwLock::new(default.clone()),
            default,
            lock: ReentrantMutex::new(()),
            upstream: Mutex::new(None),
            transformation: OnceLock::new(),
            value_changed: Event::new(),
            connection_state_changed: Event::new(),
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

    /// The value the slot was created with.
    pub fn default_value(&self) -> &T {
        &self.default
    }

    /// Whether a normal connection is active.
    pub fn is_connected(&self) -> bool {
        self.upstream.lock().is_some()
    }

    /// Overwrite the value of an unconnected input.
    ///
    /// Returns false and changes nothing while the input is connected.
    pub fn set_value(&self, value: T) -> bool {
        if self.is_connected() {
            return false;
        }
        self.receive(value);
        true
    }

    /// Connect to a typed output.
    ///
    /// Shorthand for [`AnyInputSlot::try_connect`] with a normal connection.
    pub fn connect<U: SlotValue>(&self, output: &Arc<OutputSlot<U>>, conversions: &Conversions) -> bool {
        let output: Arc<dyn AnyOutputSlot> = output.clone();
        // Normal connections never raise usage violations.
        self.try_connect(&output, false, conversions).unwrap_or(false)
    }

    /// Subscribe to `ValueChanged`.
    pub fn on_value_changed<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.value_changed.subscribe(move |()| callback())
    }

    /// Subscribe to `ConnectionStateChanged`.
    pub fn on_connection_state_changed<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.connection_state_changed.subscribe(callback)
    }

    pub fn unsubscribe_connection_state(&self, id: SubscriberId) -> bool {
        self.connection_state_changed.unsubscribe(id)
    }

    /// Store a value delivered by the upstream output (or a literal), forward
    /// it through the transformation connection and notify subscribers.
    pub(crate) fn receive(&self, value: T) {
        let _guard = self.lock.lock();

        match self.transformation.get() {
            Some(mirror) => {
                *self.value.write() = value.clone();
                mirror.set(value);
            }
            None => *self.value.write() = value,
        }

        self.value_changed.emit(label(self.name()), ());
    }

    /// Drop the normal connection, if any, and notify.
    fn release_current(&self) {
        let Some(upstream) = self.upstream.lock().take() else {
            return;
        };

        if let Some(output) = upstream.slot.upgrade() {
            output.detach_input(self.key());
        }

        tracing::trace!(slot = label(self.name()), "input released");
        self.connection_state_changed.emit(label(self.name()), false);
    }

    fn attach_transformation(&self, output: &Arc<dyn AnyOutputSlot>) -> Result<bool, UsageViolation> {
        if output.value_type() != ValueType::of::<T>() {
            return Ok(false);
        }
        let Ok(mirror) = Arc::clone(output).as_any_arc().downcast::<OutputSlot<T>>() else {
            return Ok(false);
        };

        self.transformation
            .set(Arc::clone(&mirror))
            .map_err(|_| UsageViolation::TransformationAlreadyAttached(self.id))?;

        mirror.set(self.value());
        Ok(true)
    }
}

impl<T: SlotValue> AnySlot for InputSlot<T> {
    fn id(&self) -> SlotId {
        self.id
    }

    fn name(&self) -> &str {
        InputSlot::name(self)
    }

    fn direction(&self) -> SlotDirection {
        SlotDirection::Input
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
        self.release_current();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn bind_name(&self, name: &str) -> bool {
        self.name.set(name.to_owned()).is_ok()
    }
}

impl<T: SlotValue> AnyInputSlot for InputSlot<T> {
    fn try_connect(
        &self,
        output: &Arc<dyn AnyOutputSlot>,
        is_transformation: bool,
        conversions: &Conversions,
    ) -> Result<bool, UsageViolation> {
        if is_transformation {
            return self.attach_transformation(output);
        }

        if !conversions.can_convert(output.value_type(), ValueType::of::<T>()) {
            tracing::debug!(
                from = output.value_type().name(),
                to = std::any::type_name::<T>(),
                "connection rejected: incompatible value types"
            );
            return Ok(false);
        }

        let Some(me) = self.me.upgrade() else {
            return Ok(false);
        };
        let me: Arc<dyn AnyInputSlot> = me;

        if !output.accepts(&me, conversions) {
            tracing::debug!(output = label(output.name()), "connection rejected: output declined the input");
            return Ok(false);
        }

        // Sever-then-reconnect: only one normal connection at a time.
        self.release_current();

        if !output.attach_input(&me, conversions) {
            return Ok(false);
        }

        *self.upstream.lock() = Some(Upstream {
            key: output.key(),
            slot: Arc::downgrade(output),
        });

        tracing::trace!(
            input = label(self.name()),
            output = label(output.name()),
            "input connected"
        );
        self.connection_state_changed.emit(label(self.name()), true);
        Ok(true)
    }

    fn release_connection(&self, output: &dyn AnyOutputSlot) -> Result<(), UsageViolation> {
        if let Some(mirror) = self.transformation.get() {
            if mirror.key() == output.key() {
                return Err(UsageViolation::TransformationNotReleasable(self.id));
            }
        }

        {
            let mut upstream = self.upstream.lock();
            match upstream.as_ref() {
                Some(current) if current.key == output.key() => {
                    *upstream = None;
                }
                _ => return Err(UsageViolation::NotConnected(self.id)),
            }
        }

        output.detach_input(self.key());
        self.connection_state_changed.emit(label(self.name()), false);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        InputSlot::is_connected(self)
    }

    fn connected_output(&self) -> Option<Arc<dyn AnyOutputSlot>> {
        self.upstream.lock().as_ref().and_then(|u| u.slot.upgrade())
    }

    fn transformation(&self) -> Option<Arc<dyn AnyOutputSlot>> {
        self.transformation
            .get()
            .map(|mirror| Arc::clone(mirror) as Arc<dyn AnyOutputSlot>)
    }

    fn apply_literal(&self, literal: &LiteralValue) -> Result<(), LiteralRefusal> {
        if self.is_connected() {
            return Err(LiteralRefusal::Connected);
        }
        let value = T::from_literal(literal).ok_or(LiteralRefusal::KindMismatch)?;
        self.receive(value);
        Ok(())
    }

    fn subscribe_connection_state(
        &self,
        callback: Box<dyn Fn(bool) + Send + Sync>,
    ) -> SubscriberId {
        self.connection_state_changed.subscribe(move |state| callback(state))
    }

    fn output_mirror_ctor(&self) -> OutputMirrorCtor {
        output_mirror_of::<T>
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

fn output_mirror_of<T: SlotValue>(slot: &dyn AnyInputSlot) -> Option<Arc<dyn AnyOutputSlot>> {
    let slot = slot.as_any().downcast_ref::<InputSlot<T>>()?;
    let mirror = OutputSlot::new(slot.id.0, slot.value());
    Some(mirror)
}

impl<T: SlotValue> fmt::Debug for InputSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSlot")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("value", &*self.value.read())
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn erased<T: SlotValue>(output: &Arc<OutputSlot<T>>) -> Arc<dyn AnyOutputSlot> {
        output.clone()
    }

    #[test]
    fn unconnected_input_holds_default() {
        let input = InputSlot::new(3, 5i32);
        assert_eq!(input.value(), 5);
        assert_eq!(*input.default_value(), 5);
        assert!(!input.is_connected());
    }

    #[test]
    fn connect_syncs_and_disconnect_keeps_last_value() {
        let conversions = Conversions::with_builtin();
        let output = OutputSlot::new(0, 0i32);
        let input = InputSlot::new(0, 5i32);

        let changes = Arc::new(AtomicUsize::new(0));
        let changes_clone = changes.clone();
        input.on_value_changed(move || {
            changes_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(input.connect(&output, &conversions));
        assert_eq!(input.value(), 0);
        let after_connect = changes.load(Ordering::SeqCst);

        output.set(42);
        assert_eq!(input.value(), 42);
        assert_eq!(changes.load(Ordering::SeqCst), after_connect + 1);

        input.release_connection(output.as_ref()).unwrap();
        output.set(7);
        assert_eq!(input.value(), 42);
        assert_eq!(output.connection_count(), 0);
    }

    #[test]
    fn incompatible_types_are_rejected_without_side_effects() {
        let conversions = Conversions::with_builtin();
        let output = OutputSlot::new(0, String::from("x"));
        let input = InputSlot::new(0, 1i32);

        let events = Arc::new(AtomicUsize::new(0));
        let events_clone = events.clone();
        input.on_connection_state_changed(move |_| {
            events_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(input.try_connect(&erased(&output), false, &conversions), Ok(false));
        assert!(!input.is_connected());
        assert_eq!(output.connection_count(), 0);
        assert_eq!(events.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reconnecting_severs_the_previous_output() {
        let conversions = Conversions::with_builtin();
        let first = OutputSlot::new(0, 1i32);
        let second = OutputSlot::new(1, 2i32);
        let input = InputSlot::new(0, 0i32);

        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        input.on_connection_state_changed(move |state| log_clone.lock().push(state));

        assert!(input.connect(&first, &conversions));
        log.lock().clear();

        assert!(input.connect(&second, &conversions));
        assert_eq!(*log.lock(), vec![false, true]);
        assert_eq!(first.connection_count(), 0);
        assert_eq!(second.connection_count(), 1);
        assert_eq!(input.value(), 2);
    }

    /// An output that takes no inputs.
    struct Declining;

    fn no_mirror(_output: &dyn AnyOutputSlot) -> Option<Arc<dyn AnyInputSlot>> {
        None
    }

    impl AnySlot for Declining {
        fn id(&self) -> SlotId {
            SlotId(9)
        }

        fn name(&self) -> &str {
            "declining"
        }

        fn direction(&self) -> SlotDirection {
            SlotDirection::Output
        }

        fn value_type(&self) -> ValueType {
            ValueType::of::<i32>()
        }

        fn key(&self) -> SlotKey {
            SlotKey::of(self)
        }

        fn literal(&self) -> Option<LiteralValue> {
            None
        }

        fn subscribe_value_changed(&self, _callback: Box<dyn Fn() + Send + Sync>) -> SubscriberId {
            SubscriberId::new()
        }

        fn unsubscribe_value_changed(&self, _id: SubscriberId) -> bool {
            false
        }

        fn disconnect_all(&self) {}

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn bind_name(&self, _name: &str) -> bool {
            false
        }
    }

    impl AnyOutputSlot for Declining {
        fn accepts(&self, _input: &Arc<dyn AnyInputSlot>, _conversions: &Conversions) -> bool {
            false
        }

        fn attach_input(&self, _input: &Arc<dyn AnyInputSlot>, _conversions: &Conversions) -> bool {
            false
        }

        fn detach_input(&self, _input: SlotKey) -> bool {
            false
        }

        fn connection_count(&self) -> usize {
            0
        }

        fn is_connected_to(&self, _input: SlotKey) -> bool {
            false
        }

        fn attach_transformation_source(
            &self,
            _input: &Arc<dyn AnyInputSlot>,
        ) -> Result<(), UsageViolation> {
            Ok(())
        }

        fn transformation_source(&self) -> Option<SlotKey> {
            None
        }

        fn input_mirror_ctor(&self) -> crate::slot::InputMirrorCtor {
            no_mirror
        }

        fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    #[test]
    fn declined_connection_keeps_the_existing_one() {
        let conversions = Conversions::with_builtin();
        let first = OutputSlot::new(0, 7i32);
        let input = InputSlot::new(0, 0i32);

        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        input.on_connection_state_changed(move |state| log_clone.lock().push(state));

        assert!(input.connect(&first, &conversions));
        log.lock().clear();

        let declining: Arc<dyn AnyOutputSlot> = Arc::new(Declining);
        assert!(!input.try_connect(&declining, false, &conversions).unwrap());

        assert!(log.lock().is_empty());
        assert!(input.is_connected());
        assert_eq!(first.connection_count(), 1);
        first.set(8);
        assert_eq!(input.value(), 8);
    }

    #[test]
    fn widening_connection_converts_values() {
        let conversions = Conversions::with_builtin();
        let output = OutputSlot::new(0, 3i32);
        let input = InputSlot::new(0, 0.0f64);

        assert!(input.connect(&output, &conversions));
        assert_eq!(input.value(), 3.0);

        output.set(-8);
        assert_eq!(input.value(), -8.0);
        assert!(output.is_connected_to(input.key()));
    }

    #[test]
    fn releasing_a_foreign_output_is_a_usage_violation() {
        let conversions = Conversions::with_builtin();
        let output = OutputSlot::new(0, 1i32);
        let other = OutputSlot::new(1, 1i32);
        let input = InputSlot::new(0, 0i32);

        assert_eq!(
            input.release_connection(output.as_ref()),
            Err(UsageViolation::NotConnected(SlotId(0)))
        );

        input.connect(&output, &conversions);
        assert_eq!(
            input.release_connection(other.as_ref()),
            Err(UsageViolation::NotConnected(SlotId(0)))
        );
        assert!(input.is_connected());
    }

    #[test]
    fn second_transformation_is_rejected_and_state_kept() {
        let conversions = Conversions::with_builtin();
        let input = InputSlot::new(4, 9i32);
        let mirror = OutputSlot::new(4, 0i32);
        let intruder = OutputSlot::new(4, 0i32);

        assert_eq!(input.try_connect(&erased(&mirror), true, &conversions), Ok(true));
        assert_eq!(mirror.value(), 9);

        assert_eq!(
            input.try_connect(&erased(&intruder), true, &conversions),
            Err(UsageViolation::TransformationAlreadyAttached(SlotId(4)))
        );
        assert_eq!(
            input.transformation().map(|t| t.key()),
            Some(mirror.key())
        );

        // Forwarding still goes to the original mirror.
        input.set_value(11);
        assert_eq!(mirror.value(), 11);
        assert_eq!(intruder.value(), 0);
    }

    #[test]
    fn transformation_cannot_be_released() {
        let conversions = Conversions::with_builtin();
        let input = InputSlot::new(0, 1i32);
        let mirror = OutputSlot::new(0, 0i32);
        input.try_connect(&erased(&mirror), true, &conversions).unwrap();

        assert_eq!(
            input.release_connection(mirror.as_ref()),
            Err(UsageViolation::TransformationNotReleasable(SlotId(0)))
        );
    }

    #[test]
    fn literal_applies_only_when_unconnected() {
        let conversions = Conversions::with_builtin();
        let input = InputSlot::new(0, 0i32);

        assert_eq!(input.apply_literal(&LiteralValue::Int(12)), Ok(()));
        assert_eq!(input.value(), 12);
        assert_eq!(
            input.apply_literal(&LiteralValue::String("no".into())),
            Err(LiteralRefusal::KindMismatch)
        );

        let output = OutputSlot::new(0, 1i32);
        input.connect(&output, &conversions);
        assert_eq!(
            input.apply_literal(&LiteralValue::Int(99)),
            Err(LiteralRefusal::Connected)
        );
        assert!(!input.set_value(99));
        assert_eq!(input.value(), 1);
    }

    #[test]
    fn bind_name_only_once() {
        let input = InputSlot::new(0, false);
        assert!(input.bind_name("enabled"));
        assert!(!input.bind_name("other"));
        assert_eq!(input.name(), "enabled");
    }
}
