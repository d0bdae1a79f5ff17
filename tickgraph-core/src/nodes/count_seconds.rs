use std::sync::Arc;

use crate::node::{NodeLogic, SlotDeclarations};
use crate::registry::NodeTypeId;
use crate::slot::{InputSlot, OutputSlot};

/// Accumulates elapsed time and reports whole seconds.
///
/// - `count` is the floor of the accumulated time.
/// - `scaled_count` is the floor of the accumulated time times `rate`.
/// - `count_as_string` renders `count` with an `s` suffix.
pub struct CountSeconds {
    rate: Arc<InputSlot<f64>>,

    count_as_string: Arc<OutputSlot<String>>,
    count: Arc<OutputSlot<i64>>,
    scaled_count: Arc<OutputSlot<i64>>,

    timer: f64,
}

impl CountSeconds {
    pub const TYPE_ID: NodeTypeId = NodeTypeId::from_u128(0x61f89227_6810_49ab_9848_069dadb63b16);

    /// Seconds accumulated so far.
    pub fn timer(&self) -> f64 {
        self.timer
    }
}

impl Default for CountSeconds {
    fn default() -> Self {
        Self {
            rate: InputSlot::new(0, 1.0),
            count_as_string: OutputSlot::new(0, "0s".to_owned()),
            count: OutputSlot::new(1, 0),
            scaled_count: OutputSlot::new(2, 0),
            timer: 0.0,
        }
    }
}

impl NodeLogic for CountSeconds {
    fn declare_slots(&self, slots: &mut SlotDeclarations) {
        slots
            .input("rate", &self.rate)
            .output("count_as_string", &self.count_as_string)
            .output("count", &self.count)
            .output("scaled_count", &self.scaled_count);
    }

    fn process(&mut self, delta: f64) {
        self.timer += delta;

        let count = self.timer.floor() as i64;
        self.count.set(count);
        self.scaled_count.set((self.timer * self.rate.value()).floor() as i64);

        self.count_as_string.set(format!("{count}s"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_one_second_ticks() {
        let mut node = CountSeconds::default();
        node.rate.set_value(2.0);

        for _ in 0..3 {
            node.process(1.0);
        }

        assert_eq!(node.timer(), 3.0);
        assert_eq!(node.count.value(), 3);
        assert_eq!(node.scaled_count.value(), 6);
        assert_eq!(node.count_as_string.value(), "3s");
    }

    #[test]
    fn fractional_ticks_floor() {
        let mut node = CountSeconds::default();
        node.process(0.4);
        node.process(0.4);
        assert_eq!(node.count.value(), 0);
        assert_eq!(node.count_as_string.value(), "0s");

        node.process(0.4);
        assert_eq!(node.count.value(), 1);
        assert_eq!(node.scaled_count.value(), 1);
    }
}
