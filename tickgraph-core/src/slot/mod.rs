//! Slots
//!
//! A slot is a typed endpoint on a node. There are two kinds:
//!
//! - [`OutputSlot<T>`]: holds the value a node produces and fans it out to
//!   every connected input on write.
//! - [`InputSlot<T>`]: holds a default value until it is connected, then
//!   mirrors the single output it is connected to.
//!
//! # Propagation
//!
//! Writing an output stores the value, pushes it synchronously into every
//! connected input, and only then raises the output's own `ValueChanged`.
//! The whole sequence runs under the output's lock, so readers never see a
//! half-propagated write. Inputs raise their own `ValueChanged` once per
//! received value.
//!
//! # Connections
//!
//! Connections are made from the input side ([`AnyInputSlot::try_connect`]).
//! An input has at most one normal connection; connecting to a new output
//! severs the old one first. Outputs whose value type differs from the
//! input's can still connect when the [`Conversions`] table knows a widening
//! from one to the other; the conversion is an internal forwarding shim, not
//! a slot.
//!
//! # Transformation Slots
//!
//! Separately from the normal connection, each slot may carry exactly one
//! transformation connection. These are structural: they link a node's
//! slots to the mirror slots its inner subgraph wires against, and can never
//! be released through the normal protocol.
//!
//! # Type Erasure
//!
//! Nodes hold their slots as concrete `Arc<InputSlot<T>>` fields. The runtime
//! sees them through [`AnyInputSlot`] / [`AnyOutputSlot`] so that graphs of
//! heterogeneous value types can be wired without knowing `T`.

mod convert;
mod input;
mod output;

pub use convert::Conversions;
pub use input::InputSlot;
pub use output::OutputSlot;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::UsageViolation;
use crate::event::SubscriberId;
use crate::value::{LiteralValue, ValueType};

/// Numeric slot ID, unique among same-direction slots of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(pub u16);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u16> for SlotId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

/// Whether a slot receives or produces values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotDirection {
    Input,
    Output,
}

impl SlotDirection {
    /// Lowercase name used in diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// Identity of a live slot object.
///
/// Two handles compare equal iff they point at the same slot allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey(usize);

impl SlotKey {
    pub(crate) fn of<S>(slot: &S) -> Self {
        Self(slot as *const S as *const () as usize)
    }
}

/// Static description of one declared slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDescriptor {
    pub id: SlotId,
    pub name: String,
    pub direction: SlotDirection,
    pub value_type: ValueType,
}

/// Why a literal value was not applied to an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralRefusal {
    /// The input is connected and mirrors its upstream output.
    Connected,
    /// The literal's kind does not fit the input's value type.
    KindMismatch,
}

/// Builds the output mirror of an input slot (same value type and ID).
pub type OutputMirrorCtor = fn(&dyn AnyInputSlot) -> Option<Arc<dyn AnyOutputSlot>>;

/// Builds the input mirror of an output slot (same value type and ID).
pub type InputMirrorCtor = fn(&dyn AnyOutputSlot) -> Option<Arc<dyn AnyInputSlot>>;

/// Operations shared by both slot kinds.
pub trait AnySlot: Send + Sync + 'static {
    /// Numeric ID, unique per direction on the owning node.
    fn id(&self) -> SlotId;

    /// Field name assigned at discovery. Empty until the slot is bound.
    fn name(&self) -> &str;

    fn direction(&self) -> SlotDirection;

    /// Declared value type.
    fn value_type(&self) -> ValueType;

    /// Identity of this slot object.
    fn key(&self) -> SlotKey;

    /// Current value in literal form, if the value kind has one.
    fn literal(&self) -> Option<LiteralValue>;

    /// Register a `ValueChanged` callback.
    fn subscribe_value_changed(&self, callback: Box<dyn Fn() + Send + Sync>) -> SubscriberId;

    /// Remove a `ValueChanged` callback.
    fn unsubscribe_value_changed(&self, id: SubscriberId) -> bool;

    /// Sever every normal connection. Idempotent.
    fn disconnect_all(&self);

    fn as_any(&self) -> &dyn Any;

    /// Assign the slot's name. Returns false if it was already bound.
    fn bind_name(&self, name: &str) -> bool;
}

/// Type-erased input slot.
pub trait AnyInputSlot: AnySlot {
    /// Connect this input to `output`.
    ///
    /// Returns `Ok(false)` without touching any state when the types are
    /// incompatible. With `is_transformation` set, the output becomes this
    /// slot's single transformation target instead; a second attachment is a
    /// usage violation.
    fn try_connect(
        &self,
        output: &Arc<dyn AnyOutputSlot>,
        is_transformation: bool,
        conversions: &Conversions,
    ) -> Result<bool, UsageViolation>;

    /// Release the normal connection to `output`.
    fn release_connection(&self, output: &dyn AnyOutputSlot) -> Result<(), UsageViolation>;

    fn is_connected(&self) -> bool;

    /// The output this input is normally connected to, if it is still alive.
    fn connected_output(&self) -> Option<Arc<dyn AnyOutputSlot>>;

    /// The transformation target, if one is attached.
    fn transformation(&self) -> Option<Arc<dyn AnyOutputSlot>>;

    /// Overwrite the value of an unconnected input with a literal.
    fn apply_literal(&self, literal: &LiteralValue) -> Result<(), LiteralRefusal>;

    /// Register a `ConnectionStateChanged` callback.
    fn subscribe_connection_state(&self, callback: Box<dyn Fn(bool) + Send + Sync>)
        -> SubscriberId;

    /// Constructor for this slot's output mirror, cached per value type.
    fn output_mirror_ctor(&self) -> OutputMirrorCtor;

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Type-erased output slot.
pub trait AnyOutputSlot: AnySlot {
    /// Whether [`AnyOutputSlot::attach_input`] would take `input`.
    fn accepts(&self, input: &Arc<dyn AnyInputSlot>, conversions: &Conversions) -> bool;

    /// Add `input` to the fan-out list and push the current value into it.
    ///
    /// Called by [`AnyInputSlot::try_connect`]; use that instead.
    fn attach_input(&self, input: &Arc<dyn AnyInputSlot>, conversions: &Conversions) -> bool;

    /// Remove the input with the given identity from the fan-out list.
    fn detach_input(&self, input: SlotKey) -> bool;

    /// Number of inputs in the fan-out list.
    fn connection_count(&self) -> usize;

    /// Whether the given input is in the fan-out list.
    fn is_connected_to(&self, input: SlotKey) -> bool;

    /// Record the mirror input that feeds this output.
    fn attach_transformation_source(
        &self,
        input: &Arc<dyn AnyInputSlot>,
    ) -> Result<(), UsageViolation>;

    /// Identity of the mirror input feeding this output, if any.
    fn transformation_source(&self) -> Option<SlotKey>;

    /// Constructor for this slot's input mirror, cached per value type.
    fn input_mirror_ctor(&self) -> InputMirrorCtor;

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl fmt::Debug for dyn AnyInputSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSlot")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("type", &self.value_type().name())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl fmt::Debug for dyn AnyOutputSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSlot")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("type", &self.value_type().name())
            .field("connections", &self.connection_count())
            .finish()
    }
}

/// Name for log output.
pub(crate) fn label(name: &str) -> &str {
    if name.is_empty() {
        "<unbound slot>"
    } else {
        name
    }
}
