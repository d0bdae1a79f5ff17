//! Slot discovery.
//!
//! Node logic lists its slots through [`NodeLogic::declare_slots`]; the
//! runtime collects them here, validates the layout once per node type and
//! binds each slot to its declared name.
//!
//! [`NodeLogic::declare_slots`]: super::NodeLogic::declare_slots

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::ConstructionError;
use crate::slot::{
    AnyInputSlot, AnyOutputSlot, InputSlot, OutputSlot, SlotDescriptor, SlotDirection, SlotKey,
};
use crate::value::SlotValue;

/// Slots declared by one node instance, in declaration order.
#[derive(Default)]
pub struct SlotDeclarations {
    pub(crate) inputs: Vec<(&'static str, Arc<dyn AnyInputSlot>)>,
    pub(crate) outputs: Vec<(&'static str, Arc<dyn AnyOutputSlot>)>,
}

impl SlotDeclarations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an input slot under a field name.
    pub fn input<T: SlotValue>(&mut self, name: &'static str, slot: &Arc<InputSlot<T>>) -> &mut Self {
        self.inputs.push((name, Arc::clone(slot) as Arc<dyn AnyInputSlot>));
        self
    }

    /// Declare an output slot under a field name.
    pub fn output<T: SlotValue>(&mut self, name: &'static str, slot: &Arc<OutputSlot<T>>) -> &mut Self {
        self.outputs.push((name, Arc::clone(slot) as Arc<dyn AnyOutputSlot>));
        self
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Check the layout and describe it.
    ///
    /// Fails on repeated IDs within one direction and on a slot object
    /// declared more than once.
    pub(crate) fn validate(&self, node: &'static str) -> Result<Vec<SlotDescriptor>, ConstructionError> {
        let mut seen_keys: HashSet<SlotKey> = HashSet::new();
        let mut descriptors = Vec::with_capacity(self.inputs.len() + self.outputs.len());

        let mut input_ids = HashSet::new();
        for (name, slot) in &self.inputs {
            if !seen_keys.insert(slot.key()) {
                return Err(ConstructionError::SlotRebound {
                    node,
                    slot: (*name).to_owned(),
                });
            }
            if !input_ids.insert(slot.id()) {
                return Err(ConstructionError::DuplicateSlotId {
                    node,
                    direction: SlotDirection::Input.as_str(),
                    id: slot.id(),
                });
            }
            descriptors.push(SlotDescriptor {
                id: slot.id(),
                name: (*name).to_owned(),
                direction: SlotDirection::Input,
                value_type: slot.value_type(),
            });
        }

        let mut output_ids = HashSet::new();
        for (name, slot) in &self.outputs {
            if !seen_keys.insert(slot.key()) {
                return Err(ConstructionError::SlotRebound {
                    node,
                    slot: (*name).to_owned(),
                });
            }
            if !output_ids.insert(slot.id()) {
                return Err(ConstructionError::DuplicateSlotId {
                    node,
                    direction: SlotDirection::Output.as_str(),
                    id: slot.id(),
                });
            }
            descriptors.push(SlotDescriptor {
                id: slot.id(),
                name: (*name).to_owned(),
                direction: SlotDirection::Output,
                value_type: slot.value_type(),
            });
        }

        Ok(descriptors)
    }

    /// Assign every declared slot its field name.
    ///
    /// A slot that already carries a name belongs to another node.
    pub(crate) fn bind_names(&self, node: &'static str) -> Result<(), ConstructionError> {
        let inputs = self.inputs.iter().map(|(name, slot)| (*name, slot.bind_name(name)));
        let outputs = self.outputs.iter().map(|(name, slot)| (*name, slot.bind_name(name)));

        for (name, bound) in inputs.chain(outputs) {
            if !bound {
                return Err(ConstructionError::SlotRebound {
                    node,
                    slot: name.to_owned(),
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SlotDeclarations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inputs: Vec<_> = self.inputs.iter().map(|(name, _)| *name).collect();
        let outputs: Vec<_> = self.outputs.iter().map(|(name, _)| *name).collect();
        f.debug_struct("SlotDeclarations")
            .field("inputs", &inputs)
            .field("outputs", &outputs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::SlotId;

    #[test]
    fn same_id_across_directions_is_fine() {
        let input = InputSlot::new(0, 0i32);
        let output = OutputSlot::new(0, 0i32);
        let mut decls = SlotDeclarations::new();
        decls.input("in", &input).output("out", &output);

        let layout = decls.validate("Node").unwrap();
        assert_eq!(layout.len(), 2);
        assert_eq!(layout[0].direction, SlotDirection::Input);
    }

    #[test]
    fn duplicate_id_in_one_direction_fails() {
        let a = OutputSlot::new(2, 0i32);
        let b = OutputSlot::new(2, String::new());
        let mut decls = SlotDeclarations::new();
        decls.output("a", &a).output("b", &b);

        assert_eq!(
            decls.validate("Node").unwrap_err(),
            ConstructionError::DuplicateSlotId {
                node: "Node",
                direction: "output",
                id: SlotId(2),
            }
        );
    }

    #[test]
    fn declaring_one_slot_twice_fails() {
        let a = InputSlot::new(0, 0i32);
        let mut decls = SlotDeclarations::new();
        decls.input("a", &a).input("alias", &a);

        assert!(matches!(
            decls.validate("Node"),
            Err(ConstructionError::SlotRebound { .. })
        ));
    }

    #[test]
    fn binding_a_bound_slot_fails() {
        let shared = InputSlot::new(0, 0i32);
        let mut first = SlotDeclarations::new();
        first.input("shared", &shared);
        first.bind_names("First").unwrap();

        let mut second = SlotDeclarations::new();
        second.input("shared", &shared);
        assert_eq!(
            second.bind_names("Second").unwrap_err(),
            ConstructionError::SlotRebound {
                node: "Second",
                slot: "shared".into(),
            }
        );
    }
}
