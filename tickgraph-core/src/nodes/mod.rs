//! Built-in node types.

mod count_seconds;
mod echo;

pub use count_seconds::CountSeconds;
pub use echo::Echo;

use crate::error::ConstructionError;
use crate::registry::{NodeTypeAttributes, TypeRegistry};

/// Register every bundled node type.
pub fn register_builtin_nodes(registry: &TypeRegistry) -> Result<(), ConstructionError> {
    registry.register_node::<CountSeconds>(
        NodeTypeAttributes::new(CountSeconds::TYPE_ID)
            .description("Counts elapsed seconds")
            .category("Time"),
    )?;
    registry.register_node::<Echo>(
        NodeTypeAttributes::new(Echo::TYPE_ID)
            .description("Echoes its inputs, doubling the number")
            .category("Debug"),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_register_once_and_describe() {
        let registry = TypeRegistry::new();
        register_builtin_nodes(&registry).unwrap();
        register_builtin_nodes(&registry).unwrap();

        let names: Vec<_> = registry
            .node_types()
            .iter()
            .map(|info| info.name().to_owned())
            .collect();
        assert_eq!(names, ["CountSeconds", "Echo"]);

        assert_eq!(registry.describe_fields(Echo::TYPE_ID).unwrap().len(), 5);
        assert_eq!(registry.describe_fields(CountSeconds::TYPE_ID).unwrap().len(), 4);
    }
}
