//! Construction Cache
//!
//! Memoizes the two lookups made every time a node is instantiated: the
//! registry entry behind a [`NodeTypeId`], and the mirror constructors for
//! each slot value type. Both are resolved once and reused; concurrent
//! first requests race harmlessly and store equivalent entries.

use std::any::TypeId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::{NodeTypeId, NodeTypeInfo, TypeRegistry};
use crate::error::ConstructionError;
use crate::node::NodeLogic;
use crate::slot::{AnyInputSlot, AnyOutputSlot, InputMirrorCtor, OutputMirrorCtor};

/// Cache of node and mirror constructors.
#[derive(Default)]
pub struct ConstructionCache {
    node_types: DashMap<NodeTypeId, Arc<NodeTypeInfo>>,
    output_mirrors: DashMap<TypeId, OutputMirrorCtor>,
    input_mirrors: DashMap<TypeId, InputMirrorCtor>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ConstructionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a node type through the cache.
    pub fn node_type(
        &self,
        registry: &TypeRegistry,
        id: NodeTypeId,
    ) -> Result<Arc<NodeTypeInfo>, ConstructionError> {
        if let Some(info) = self.node_types.get(&id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(info.value()));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let info = registry.resolve(id)?;
        self.node_types.insert(id, Arc::clone(&info));
        Ok(info)
    }

    /// Build a fresh logic instance of the given type.
    pub fn construct(
        &self,
        registry: &TypeRegistry,
        id: NodeTypeId,
    ) -> Result<(Arc<NodeTypeInfo>, Box<dyn NodeLogic>), ConstructionError> {
        let info = self.node_type(registry, id)?;
        let logic = info.construct();
        Ok((info, logic))
    }

    /// Build the output mirror of `input`.
    pub fn output_mirror(&self, input: &dyn AnyInputSlot) -> Option<Arc<dyn AnyOutputSlot>> {
        let key = input.value_type().id();
        let cached = self.output_mirrors.get(&key).map(|ctor| *ctor);
        let ctor = match cached {
            Some(ctor) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                ctor
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let ctor = input.output_mirror_ctor();
                self.output_mirrors.insert(key, ctor);
                ctor
            }
        };
        ctor(input)
    }

    /// Build the input mirror of `output`.
    pub fn input_mirror(&self, output: &dyn AnyOutputSlot) -> Option<Arc<dyn AnyInputSlot>> {
        let key = output.value_type().id();
        let cached = self.input_mirrors.get(&key).map(|ctor| *ctor);
        let ctor = match cached {
            Some(ctor) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                ctor
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let ctor = output.input_mirror_ctor();
                self.input_mirrors.insert(key, ctor);
                ctor
            }
        };
        ctor(output)
    }

    /// Lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that had to consult the registry or the slot itself.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.node_types.clear();
        self.output_mirrors.clear();
        self.input_mirrors.clear();
    }
}

impl std::fmt::Debug for ConstructionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstructionCache")
            .field("node_types", &self.node_types.len())
            .field("output_mirrors", &self.output_mirrors.len())
            .field("input_mirrors", &self.input_mirrors.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::SlotDeclarations;
    use crate::registry::NodeTypeAttributes;
    use crate::slot::{InputSlot, OutputSlot, SlotId};
    use crate::value::ValueType;

    const NOOP: NodeTypeId = NodeTypeId::from_u128(0xc0de);

    #[derive(Default)]
    struct Noop;

    impl NodeLogic for Noop {
        fn declare_slots(&self, _slots: &mut SlotDeclarations) {}
        fn process(&mut self, _delta: f64) {}
    }

    #[test]
    fn node_lookups_hit_after_first_miss() {
        let registry = TypeRegistry::new();
        registry.register_node::<Noop>(NodeTypeAttributes::new(NOOP)).unwrap();
        let cache = ConstructionCache::new();

        cache.construct(&registry, NOOP).unwrap();
        cache.construct(&registry, NOOP).unwrap();
        cache.construct(&registry, NOOP).unwrap();

        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 2);
    }

    #[test]
    fn unknown_type_is_not_cached() {
        let registry = TypeRegistry::new();
        let cache = ConstructionCache::new();

        assert!(cache.node_type(&registry, NOOP).is_err());
        assert!(cache.node_type(&registry, NOOP).is_err());
        assert_eq!(cache.hits(), 0);
    }

    #[test]
    fn mirrors_match_type_and_id() {
        let cache = ConstructionCache::new();
        let input = InputSlot::new(3, 1.5f64);
        let output = OutputSlot::new(7, String::from("hi"));

        let out_mirror = cache.output_mirror(input.as_ref()).unwrap();
        assert_eq!(out_mirror.id(), SlotId(3));
        assert_eq!(out_mirror.value_type(), ValueType::of::<f64>());

        let in_mirror = cache.input_mirror(output.as_ref()).unwrap();
        assert_eq!(in_mirror.id(), SlotId(7));
        assert_eq!(in_mirror.value_type(), ValueType::of::<String>());

        let again = InputSlot::new(4, 0.0f64);
        cache.output_mirror(again.as_ref()).unwrap();
        assert_eq!(cache.hits(), 1);
    }
}
