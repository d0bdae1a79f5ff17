use std::sync::Arc;

use crate::event::SubscriberId;
use crate::node::{NodeLogic, SlotDeclarations};
use crate::registry::NodeTypeId;
use crate::slot::{AnySlot, InputSlot, OutputSlot};

/// Mirrors its inputs to its outputs as soon as they change.
///
/// `text` is passed through unchanged; `number` produces its double and
/// whether it is even. Nothing happens on tick.
pub struct Echo {
    text: Arc<InputSlot<String>>,
    number: Arc<InputSlot<i32>>,

    text_output: Arc<OutputSlot<String>>,
    doubled: Arc<OutputSlot<i32>>,
    is_even: Arc<OutputSlot<bool>>,

    text_listener: Option<SubscriberId>,
    number_listener: Option<SubscriberId>,
}

impl Echo {
    pub const TYPE_ID: NodeTypeId = NodeTypeId::from_u128(0x9557ade7_bef8_4666_8acb_c2c9276c69cc);

    fn echo_text(text: &InputSlot<String>, output: &OutputSlot<String>) {
        output.set(text.value());
    }

    fn echo_number(number: &InputSlot<i32>, doubled: &OutputSlot<i32>, is_even: &OutputSlot<bool>) {
        let value = number.value();
        doubled.set(value.wrapping_mul(2));
        is_even.set(value % 2 == 0);
    }
}

impl Default for Echo {
    fn default() -> Self {
        Self {
            text: InputSlot::new(0, "this is default".to_owned()),
            number: InputSlot::new(1, 42),
            text_output: OutputSlot::new(0, String::new()),
            doubled: OutputSlot::new(1, 0),
            is_even: OutputSlot::new(2, false),
            text_listener: None,
            number_listener: None,
        }
    }
}

impl NodeLogic for Echo {
    fn declare_slots(&self, slots: &mut SlotDeclarations) {
        slots
            .input("text", &self.text)
            .input("number", &self.number)
            .output("text_output", &self.text_output)
            .output("doubled", &self.doubled)
            .output("is_even", &self.is_even);
    }

    fn on_initialize(&mut self) {
        // Weak self-references: a slot must not keep itself alive.
        let text = Arc::downgrade(&self.text);
        let text_output = Arc::clone(&self.text_output);
        self.text_listener = Some(self.text.on_value_changed(move || {
            if let Some(text) = text.upgrade() {
                Echo::echo_text(&text, &text_output);
            }
        }));

        let number = Arc::downgrade(&self.number);
        let doubled = Arc::clone(&self.doubled);
        let is_even = Arc::clone(&self.is_even);
        self.number_listener = Some(self.number.on_value_changed(move || {
            if let Some(number) = number.upgrade() {
                Echo::echo_number(&number, &doubled, &is_even);
            }
        }));

        Echo::echo_text(&self.text, &self.text_output);
        Echo::echo_number(&self.number, &self.doubled, &self.is_even);
    }

    fn process(&mut self, _delta: f64) {}

    fn on_destroy(&mut self) {
        if let Some(id) = self.text_listener.take() {
            self.text.unsubscribe_value_changed(id);
        }
        if let Some(id) = self.number_listener.take() {
            self.number.unsubscribe_value_changed(id);
        }
        tracing::debug!("echo node destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_values_are_echoed() {
        let mut node = Echo::default();
        node.on_initialize();

        assert_eq!(node.text_output.value(), "this is default");
        assert_eq!(node.doubled.value(), 84);
        assert!(node.is_even.value());
    }

    #[test]
    fn changes_propagate_without_ticks() {
        let mut node = Echo::default();
        node.on_initialize();

        node.number.set_value(7);
        node.text.set_value("hello".into());

        assert_eq!(node.doubled.value(), 14);
        assert!(!node.is_even.value());
        assert_eq!(node.text_output.value(), "hello");
    }

    #[test]
    fn destroy_detaches_listeners() {
        let mut node = Echo::default();
        node.on_initialize();
        node.on_destroy();

        node.number.set_value(5);
        assert_eq!(node.doubled.value(), 84);
    }
}
