//! Nodes
//!
//! A node pairs user-written [`NodeLogic`] with the runtime state the graph
//! needs to drive it: a stable [`InstanceId`], the discovered slot layout, the
//! transformation mirrors that let an inner subgraph see the node's slots, and
//! an optional nested [`Subgraph`].
//!
//! # Lifecycle
//!
//! 1. The logic is constructed from its registered type.
//! 2. [`Node::set_instance_id`] assigns the ID exactly once. This triggers slot
//!    discovery and mirror construction; a layout error leaves the node without
//!    an ID, and it never becomes live.
//! 3. [`NodeLogic::on_initialize`] runs.
//! 4. The node is added to the process loop and ticked every iteration.
//! 5. [`Node::destroy`] fires `Destroyed`, severs every connection and calls
//!    [`NodeLogic::on_destroy`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tickgraph_core::node::{NodeLogic, SlotDeclarations};
//! use tickgraph_core::slot::{InputSlot, OutputSlot};
//!
//! struct Doubler {
//!     input: Arc<InputSlot<f64>>,
//!     output: Arc<OutputSlot<f64>>,
//! }
//!
//! impl Default for Doubler {
//!     fn default() -> Self {
//!         Self {
//!             input: InputSlot::new(0, 0.0),
//!             output: OutputSlot::new(0, 0.0),
//!         }
//!     }
//! }
//!
//! impl NodeLogic for Doubler {
//!     fn declare_slots(&self, slots: &mut SlotDeclarations) {
//!         slots.input("input", &self.input).output("output", &self.output);
//!     }
//!
//!     fn process(&mut self, _delta: f64) {
//!         self.output.set(self.input.value() * 2.0);
//!     }
//! }
//! ```

mod discovery;

pub use discovery::SlotDeclarations;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GraphError, UsageViolation};
use crate::event::{panic_message, Event, SubscriberId};
use crate::graph::Subgraph;
use crate::registry::{ConstructionCache, NodeTypeId, NodeTypeInfo, TypeRegistry};
use crate::slot::{AnyInputSlot, AnyOutputSlot, AnySlot, SlotDescriptor, SlotDirection, SlotId};

/// Stable identity of a node instance within its subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    /// Inside a nested subgraph, addresses the owning node whatever its
    /// actual ID. Stored definitions use it to reach the owner's slots.
    pub const OWNER: Self = Self(Uuid::nil());

    /// Generate a fresh random ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for InstanceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// User-written behavior of a node type.
///
/// Implementors own their slots as `Arc<InputSlot<T>>` / `Arc<OutputSlot<T>>`
/// fields and list them in [`NodeLogic::declare_slots`].
pub trait NodeLogic: Send + 'static {
    /// List every slot of this node, in display order.
    fn declare_slots(&self, slots: &mut SlotDeclarations);

    /// Called once, after discovery and before the first tick.
    fn on_initialize(&mut self) {}

    /// Called once per process loop iteration with the elapsed seconds.
    fn process(&mut self, delta: f64);

    /// Called once when the node is destroyed.
    fn on_destroy(&mut self) {}
}

/// Slots discovered on a node, plus their mirrors.
struct Ports {
    inputs: Vec<Arc<dyn AnyInputSlot>>,
    outputs: Vec<Arc<dyn AnyOutputSlot>>,

    /// One output per input: what the inner subgraph reads from.
    input_mirrors: Vec<Arc<dyn AnyOutputSlot>>,

    /// One input per output: what the inner subgraph writes into.
    output_mirrors: Vec<Arc<dyn AnyInputSlot>>,

    layout: Arc<[SlotDescriptor]>,
}

/// A live node in a subgraph.
pub struct Node {
    type_info: Arc<NodeTypeInfo>,
    instance_id: OnceLock<InstanceId>,
    logic: Mutex<Box<dyn NodeLogic>>,
    ports: OnceLock<Ports>,
    subgraph: OnceLock<Arc<Subgraph>>,
    destroyed: AtomicBool,
    on_destroyed: Event<InstanceId>,
}

impl Node {
    /// Wrap freshly constructed logic. The node is inert until it has an ID.
    pub fn new(type_info: Arc<NodeTypeInfo>, logic: Box<dyn NodeLogic>) -> Arc<Self> {
        Arc::new(Self {
            type_info,
            instance_id: OnceLock::new(),
            logic: Mutex::new(logic),
            ports: OnceLock::new(),
            subgraph: OnceLock::new(),
            destroyed: AtomicBool::new(false),
            on_destroyed: Event::new(),
        })
    }

    /// Assign the instance ID and discover the node's slots.
    ///
    /// Fails with [`UsageViolation::InstanceIdAlreadySet`] on a second call,
    /// and with a construction error when the slot layout is invalid; in the
    /// latter case the ID stays unassigned.
    pub fn set_instance_id(
        &self,
        id: InstanceId,
        registry: &TypeRegistry,
        constructors: &ConstructionCache,
    ) -> Result<(), GraphError> {
        // Held for the whole discovery so concurrent assignments serialize.
        let logic = self.logic.lock();
        if self.instance_id.get().is_some() {
            return Err(UsageViolation::InstanceIdAlreadySet.into());
        }

        let node_name = self.type_info.rust_name();
        let mut declarations = SlotDeclarations::new();
        logic.declare_slots(&mut declarations);

        let layout = registry.slot_layout(self.type_info.rust_type(), node_name, &declarations)?;
        declarations.bind_names(node_name)?;

        let conversions = registry.conversions();
        let mut input_mirrors = Vec::with_capacity(declarations.inputs.len());
        for (name, input) in &declarations.inputs {
            let Some(mirror) = constructors.output_mirror(input.as_ref()) else {
                tracing::warn!(node = node_name, slot = name, "no output mirror for input");
                continue;
            };
            mirror.bind_name(name);
            input.try_connect(&mirror, true, conversions)?;
            input_mirrors.push(mirror);
        }

        let mut output_mirrors = Vec::with_capacity(declarations.outputs.len());
        for (name, output) in &declarations.outputs {
            let Some(mirror) = constructors.input_mirror(output.as_ref()) else {
                tracing::warn!(node = node_name, slot = name, "no input mirror for output");
                continue;
            };
            mirror.bind_name(name);
            mirror.try_connect(output, true, conversions)?;
            output.attach_transformation_source(&mirror)?;
            output_mirrors.push(mirror);
        }

        let ports = Ports {
            inputs: declarations.inputs.into_iter().map(|(_, slot)| slot).collect(),
            outputs: declarations.outputs.into_iter().map(|(_, slot)| slot).collect(),
            input_mirrors,
            output_mirrors,
            layout,
        };

        if self.ports.set(ports).is_err() || self.instance_id.set(id).is_err() {
            return Err(UsageViolation::InstanceIdAlreadySet.into());
        }

        tracing::debug!(node = node_name, instance = %id, "node instance assigned");
        Ok(())
    }

    /// The instance ID, once assigned.
    pub fn instance_id(&self) -> Option<InstanceId> {
        self.instance_id.get().copied()
    }

    pub fn is_initialized(&self) -> bool {
        self.instance_id.get().is_some()
    }

    pub fn type_id(&self) -> NodeTypeId {
        self.type_info.id()
    }

    pub fn type_info(&self) -> &Arc<NodeTypeInfo> {
        &self.type_info
    }

    pub fn type_name(&self) -> &str {
        self.type_info.name()
    }

    /// Ordered slot layout, once discovered.
    pub fn slot_layout(&self) -> Option<Arc<[SlotDescriptor]>> {
        self.ports.get().map(|ports| Arc::clone(&ports.layout))
    }

    /// Input slots in declaration order.
    pub fn inputs(&self) -> &[Arc<dyn AnyInputSlot>] {
        self.ports.get().map(|p| p.inputs.as_slice()).unwrap_or(&[])
    }

    /// Output slots in declaration order.
    pub fn outputs(&self) -> &[Arc<dyn AnyOutputSlot>] {
        self.ports.get().map(|p| p.outputs.as_slice()).unwrap_or(&[])
    }

    /// Input slot by ID.
    pub fn input(&self, port: SlotId) -> Result<Arc<dyn AnyInputSlot>, UsageViolation> {
        let ports = self.ports()?;
        find_by_id(&ports.inputs, port)
            .cloned()
            .ok_or_else(|| self.unknown_port(SlotDirection::Input, port))
    }

    /// Output slot by ID.
    pub fn output(&self, port: SlotId) -> Result<Arc<dyn AnyOutputSlot>, UsageViolation> {
        let ports = self.ports()?;
        find_by_id(&ports.outputs, port)
            .cloned()
            .ok_or_else(|| self.unknown_port(SlotDirection::Output, port))
    }

    /// Input slot by position.
    pub fn input_at(&self, index: usize) -> Result<Arc<dyn AnyInputSlot>, UsageViolation> {
        let ports = self.ports()?;
        ports
            .inputs
            .get(index)
            .cloned()
            .ok_or(UsageViolation::PortIndexOutOfRange {
                direction: SlotDirection::Input.as_str(),
                index,
                count: ports.inputs.len(),
            })
    }

    /// Output slot by position.
    pub fn output_at(&self, index: usize) -> Result<Arc<dyn AnyOutputSlot>, UsageViolation> {
        let ports = self.ports()?;
        ports
            .outputs
            .get(index)
            .cloned()
            .ok_or(UsageViolation::PortIndexOutOfRange {
                direction: SlotDirection::Output.as_str(),
                index,
                count: ports.outputs.len(),
            })
    }

    /// The output that mirrors input `port` inside a nested subgraph.
    pub fn input_mirror(&self, port: SlotId) -> Result<Arc<dyn AnyOutputSlot>, UsageViolation> {
        let ports = self.ports()?;
        find_by_id(&ports.input_mirrors, port)
            .cloned()
            .ok_or_else(|| self.unknown_port(SlotDirection::Input, port))
    }

    /// The input that feeds output `port` from inside a nested subgraph.
    pub fn output_mirror(&self, port: SlotId) -> Result<Arc<dyn AnyInputSlot>, UsageViolation> {
        let ports = self.ports()?;
        find_by_id(&ports.output_mirrors, port)
            .cloned()
            .ok_or_else(|| self.unknown_port(SlotDirection::Output, port))
    }

    /// Attach the nested subgraph. Allowed once.
    pub fn attach_subgraph(&self, subgraph: Arc<Subgraph>) -> Result<(), UsageViolation> {
        self.subgraph
            .set(subgraph)
            .map_err(|_| UsageViolation::SubgraphAlreadySet)
    }

    /// The nested subgraph, if any.
    pub fn subgraph(&self) -> Option<&Arc<Subgraph>> {
        self.subgraph.get()
    }

    /// Run the logic's initialization hook.
    pub(crate) fn initialize(&self) {
        self.logic.lock().on_initialize();
    }

    /// Tick the node once.
    ///
    /// Panics raised by the logic are caught and logged; the loop keeps going.
    pub fn process(&self, delta: f64) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }

        let mut logic = self.logic.lock();
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| logic.process(delta))) {
            tracing::error!(
                node = self.type_info.rust_name(),
                instance = ?self.instance_id(),
                panic = panic_message(payload.as_ref()),
                "node process fault contained"
            );
        }
    }

    /// Run a closure against the node's logic.
    pub fn with_logic<R>(&self, f: impl FnOnce(&mut dyn NodeLogic) -> R) -> R {
        let mut logic = self.logic.lock();
        f(logic.as_mut())
    }

    /// Tear the node down. Returns false if it was already destroyed.
    ///
    /// Must not be called from within the node's own `process`.
    pub fn destroy(&self) -> bool {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return false;
        }

        if let Some(id) = self.instance_id() {
            self.on_destroyed.emit(self.type_info.rust_name(), id);
        }

        if let Some(ports) = self.ports.get() {
            for input in &ports.inputs {
                input.disconnect_all();
            }
            for output in &ports.outputs {
                output.disconnect_all();
            }
            for mirror in &ports.input_mirrors {
                mirror.disconnect_all();
            }
            for mirror in &ports.output_mirrors {
                mirror.disconnect_all();
            }
        }

        if let Some(subgraph) = self.subgraph.get() {
            subgraph.clear();
        }

        self.logic.lock().on_destroy();
        self.on_destroyed.clear();

        tracing::debug!(node = self.type_info.rust_name(), instance = ?self.instance_id(), "node destroyed");
        true
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Subscribe to `Destroyed`.
    pub fn on_destroyed<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(InstanceId) + Send + Sync + 'static,
    {
        self.on_destroyed.subscribe(callback)
    }

    fn ports(&self) -> Result<&Ports, UsageViolation> {
        self.ports
            .get()
            .ok_or(UsageViolation::NotInitialized(self.type_info.rust_name()))
    }

    fn unknown_port(&self, direction: SlotDirection, port: SlotId) -> UsageViolation {
        UsageViolation::UnknownPort {
            node: self.instance_id().unwrap_or(InstanceId(Uuid::nil())),
            direction: direction.as_str(),
            port,
        }
    }
}

fn find_by_id<S: AnySlot + ?Sized>(slots: &[Arc<S>], id: SlotId) -> Option<&Arc<S>> {
    slots.iter().find(|slot| slot.id() == id)
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("type", &self.type_info.name())
            .field("instance_id", &self.instance_id())
            .field("inputs", &self.inputs().len())
            .field("outputs", &self.outputs().len())
            .field("nested", &self.subgraph.get().is_some())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
