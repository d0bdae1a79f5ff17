//! Type Registry
//!
//! The registry is the runtime's replacement for reflection. It knows:
//!
//! - which node types exist, keyed by a stable [`NodeTypeId`] that survives
//!   across processes (persisted definitions refer to types by this ID);
//! - the ordered slot layout of each node type, discovered once from the
//!   type's slot declarations and cached for the life of the registry;
//! - a dense numeric index per Rust type, handed to display collaborators
//!   for color and label lookups;
//! - the [`Conversions`] table used when wiring differently-typed slots.
//!
//! One registry is created per engine and shared by every subgraph in it.
//! There is no global state: two engines in one process do not see each
//! other's registrations.

mod construct;

pub use construct::ConstructionCache;

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConstructionError;
use crate::node::{NodeLogic, SlotDeclarations};
use crate::slot::{Conversions, SlotDescriptor};
use crate::value::ValueType;

/// Stable identifier of a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeTypeId(pub Uuid);

impl NodeTypeId {
    /// Build an ID from its 128-bit value.
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for NodeTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for NodeTypeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Metadata supplied when registering a node type.
#[derive(Debug, Clone)]
pub struct NodeTypeAttributes {
    pub id: NodeTypeId,
    /// Display name. Defaults to the Rust type's name.
    pub name: Option<String>,
    pub description: String,
    pub category: String,
}

impl NodeTypeAttributes {
    pub fn new(id: NodeTypeId) -> Self {
        Self {
            id,
            name: None,
            description: String::new(),
            category: String::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
}

/// Builds a fresh node logic instance.
pub type NodeConstructor = fn() -> Box<dyn NodeLogic>;

/// A registered node type.
pub struct NodeTypeInfo {
    id: NodeTypeId,
    name: String,
    description: String,
    category: String,
    /// Dense display index shared with value types.
    index: usize,
    rust_type: TypeId,
    rust_name: &'static str,
    constructor: NodeConstructor,
}

impl NodeTypeInfo {
    pub fn id(&self) -> NodeTypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn rust_type(&self) -> TypeId {
        self.rust_type
    }

    /// Short Rust name of the logic type, used in diagnostics.
    pub fn rust_name(&self) -> &'static str {
        self.rust_name
    }

    /// Construct a new, not yet initialized, logic instance.
    pub fn construct(&self) -> Box<dyn NodeLogic> {
        (self.constructor)()
    }
}

impl fmt::Debug for NodeTypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeTypeInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("category", &self.category)
            .field("index", &self.index)
            .finish()
    }
}

fn construct_default<N: NodeLogic + Default>() -> Box<dyn NodeLogic> {
    Box::new(N::default())
}

fn short_type_name<N>() -> &'static str {
    let full = std::any::type_name::<N>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Registry of node types, slot layouts and display indices.
pub struct TypeRegistry {
    node_types: DashMap<NodeTypeId, Arc<NodeTypeInfo>>,

    /// Registration order, for listing.
    order: RwLock<Vec<NodeTypeId>>,

    /// Rust type -> display index.
    indices: DashMap<TypeId, usize>,

    /// Display index -> type name.
    index_names: RwLock<Vec<&'static str>>,

    /// Validated slot layouts keyed by node Rust type.
    layouts: DashMap<TypeId, Arc<[SlotDescriptor]>>,

    conversions: Conversions,
}

impl TypeRegistry {
    /// Create a registry with the built-in numeric conversions.
    pub fn new() -> Self {
        Self::with_conversions(Conversions::with_builtin())
    }

    /// Create a registry using the given conversion table.
    pub fn with_conversions(conversions: Conversions) -> Self {
        Self {
            node_types: DashMap::new(),
            order: RwLock::new(Vec::new()),
            indices: DashMap::new(),
            index_names: RwLock::new(Vec::new()),
            layouts: DashMap::new(),
            conversions,
        }
    }

    /// Register node type `N` under a stable ID.
    pub fn register_node<N>(
        &self,
        attributes: NodeTypeAttributes,
    ) -> Result<Arc<NodeTypeInfo>, ConstructionError>
    where
        N: NodeLogic + Default,
    {
        let rust_name = short_type_name::<N>();
        if attributes.id.is_nil() {
            return Err(ConstructionError::MissingTypeId(rust_name));
        }

        let name = attributes.name.unwrap_or_else(|| rust_name.to_owned());
        if name.trim().is_empty() {
            return Err(ConstructionError::MissingTypeName(attributes.id.0));
        }

        let info = Arc::new(NodeTypeInfo {
            id: attributes.id,
            name,
            description: attributes.description,
            category: attributes.category,
            index: self.type_index_of(TypeId::of::<N>(), std::any::type_name::<N>()),
            rust_type: TypeId::of::<N>(),
            rust_name,
            constructor: construct_default::<N>,
        });

        match self.node_types.entry(attributes.id) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                let existing = existing.get();
                if existing.rust_type == info.rust_type {
                    // Registering the same type twice is harmless.
                    return Ok(Arc::clone(existing));
                }
                return Err(ConstructionError::DuplicateTypeId {
                    id: attributes.id.0,
                    existing: existing.rust_name,
                });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&info));
            }
        }

        self.order.write().push(attributes.id);
        tracing::debug!(id = %info.id, name = info.name(), "node type registered");
        Ok(info)
    }

    /// Look up a node type by stable ID.
    pub fn resolve(&self, id: NodeTypeId) -> Result<Arc<NodeTypeInfo>, ConstructionError> {
        self.node_types
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(ConstructionError::UnknownType(id.0))
    }

    /// Whether a node type is registered under `id`.
    pub fn contains(&self, id: NodeTypeId) -> bool {
        self.node_types.contains_key(&id)
    }

    /// All registered node types, in registration order.
    pub fn node_types(&self) -> Vec<Arc<NodeTypeInfo>> {
        self.order
            .read()
            .iter()
            .filter_map(|id| self.node_types.get(id).map(|e| Arc::clone(e.value())))
            .collect()
    }

    /// Ordered slot layout of a node type.
    ///
    /// The first request builds a throwaway instance to read its declarations;
    /// the validated layout is cached afterwards.
    pub fn describe_fields(&self, id: NodeTypeId) -> Result<Arc<[SlotDescriptor]>, ConstructionError> {
        let info = self.resolve(id)?;
        if let Some(layout) = self.layouts.get(&info.rust_type) {
            return Ok(Arc::clone(layout.value()));
        }

        let logic = info.construct();
        let mut declarations = SlotDeclarations::new();
        logic.declare_slots(&mut declarations);
        self.slot_layout(info.rust_type, info.rust_name, &declarations)
    }

    /// Validated slot layout for a node Rust type, computed once.
    pub(crate) fn slot_layout(
        &self,
        rust_type: TypeId,
        node_name: &'static str,
        declarations: &SlotDeclarations,
    ) -> Result<Arc<[SlotDescriptor]>, ConstructionError> {
        if let Some(layout) = self.layouts.get(&rust_type) {
            return Ok(Arc::clone(layout.value()));
        }

        let layout: Arc<[SlotDescriptor]> = declarations.validate(node_name)?.into();
        for descriptor in layout.iter() {
            self.type_index_of(descriptor.value_type.id(), descriptor.value_type.name());
        }

        self.layouts.insert(rust_type, Arc::clone(&layout));
        Ok(layout)
    }

    /// Display index of Rust type `T`, assigned on first request.
    pub fn type_index<T: 'static>(&self) -> usize {
        self.type_index_of(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    /// Display index of a slot value type.
    pub fn value_type_index(&self, value_type: ValueType) -> usize {
        self.type_index_of(value_type.id(), value_type.name())
    }

    /// Type name registered at a display index.
    pub fn type_name_at(&self, index: usize) -> Option<&'static str> {
        self.index_names.read().get(index).copied()
    }

    /// Number of types that have a display index.
    pub fn indexed_type_count(&self) -> usize {
        self.index_names.read().len()
    }

    fn type_index_of(&self, id: TypeId, name: &'static str) -> usize {
        if let Some(index) = self.indices.get(&id) {
            return *index;
        }

        // Hold the names lock across insertion so indices stay dense.
        let mut names = self.index_names.write();
        *self.indices.entry(id).or_insert_with(|| {
            names.push(name);
            names.len() - 1
        })
    }

    /// The conversion table used when wiring slots of different types.
    pub fn conversions(&self) -> &Conversions {
        &self.conversions
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("node_types", &self.node_types.len())
            .field("indexed_types", &self.indexed_type_count())
            .field("conversions", &self.conversions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::{InputSlot, OutputSlot, SlotDirection, SlotId};

    const ADDER: NodeTypeId = NodeTypeId::from_u128(0x1d2a_0000_0000_0000_0000_0000_0000_0001);

    struct Adder {
        a: Arc<InputSlot<f64>>,
        b: Arc<InputSlot<f64>>,
        sum: Arc<OutputSlot<f64>>,
    }

    impl Default for Adder {
        fn default() -> Self {
            Self {
                a: InputSlot::new(0, 0.0),
                b: InputSlot::new(1, 0.0),
                sum: OutputSlot::new(0, 0.0),
            }
        }
    }

    impl NodeLogic for Adder {
        fn declare_slots(&self, slots: &mut SlotDeclarations) {
            slots.input("a", &self.a).input("b", &self.b).output("sum", &self.sum);
        }

        fn process(&mut self, _delta: f64) {
            self.sum.set(self.a.value() + self.b.value());
        }
    }

    #[derive(Default)]
    struct Other;

    impl NodeLogic for Other {
        fn declare_slots(&self, _slots: &mut SlotDeclarations) {}
        fn process(&mut self, _delta: f64) {}
    }

    #[test]
    fn register_and_resolve() {
        let registry = TypeRegistry::new();
        let info = registry
            .register_node::<Adder>(NodeTypeAttributes::new(ADDER).category("Math"))
            .unwrap();

        assert_eq!(info.name(), "Adder");
        assert_eq!(info.category(), "Math");
        assert_eq!(registry.resolve(ADDER).unwrap().id(), ADDER);
        assert_eq!(registry.node_types().len(), 1);
    }

    #[test]
    fn unknown_type_is_a_construction_error() {
        let registry = TypeRegistry::new();
        assert_eq!(
            registry.resolve(ADDER).unwrap_err(),
            ConstructionError::UnknownType(ADDER.0)
        );
    }

    #[test]
    fn nil_id_is_missing_metadata() {
        let registry = TypeRegistry::new();
        let err = registry
            .register_node::<Adder>(NodeTypeAttributes::new(NodeTypeId(Uuid::nil())))
            .unwrap_err();
        assert_eq!(err, ConstructionError::MissingTypeId("Adder"));
    }

    #[test]
    fn id_collision_between_types_is_rejected() {
        let registry = TypeRegistry::new();
        registry.register_node::<Adder>(NodeTypeAttributes::new(ADDER)).unwrap();

        // Same type again is fine.
        assert!(registry.register_node::<Adder>(NodeTypeAttributes::new(ADDER)).is_ok());

        let err = registry
            .register_node::<Other>(NodeTypeAttributes::new(ADDER))
            .unwrap_err();
        assert!(matches!(err, ConstructionError::DuplicateTypeId { .. }));
        assert_eq!(registry.node_types().len(), 1);
    }

    #[test]
    fn describe_fields_lists_slots_in_declaration_order() {
        let registry = TypeRegistry::new();
        registry.register_node::<Adder>(NodeTypeAttributes::new(ADDER)).unwrap();

        let layout = registry.describe_fields(ADDER).unwrap();
        let names: Vec<_> = layout.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "sum"]);
        assert_eq!(layout[2].direction, SlotDirection::Output);
        assert_eq!(layout[1].id, SlotId(1));

        // Cached: same allocation on the second request.
        let again = registry.describe_fields(ADDER).unwrap();
        assert!(Arc::ptr_eq(&layout, &again));
    }

    #[test]
    fn type_indices_are_dense_and_stable() {
        let registry = TypeRegistry::new();
        let a = registry.type_index::<i32>();
        let b = registry.type_index::<String>();
        assert_eq!(registry.type_index::<i32>(), a);
        assert_ne!(a, b);
        assert_eq!(registry.indexed_type_count(), 2);
        assert_eq!(registry.type_name_at(a), Some("i32"));
    }
}
