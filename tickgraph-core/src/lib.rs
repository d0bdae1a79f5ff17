//! Tickgraph Core
//!
//! This crate provides the runtime for the tickgraph node-graph engine.
//! It implements:
//!
//! - Typed input/output slots with synchronous value propagation
//! - Declaration-driven node wiring and a node type registry
//! - Subgraphs, including nodes that contain subgraphs of their own
//! - A dedicated process loop that ticks every live node once per frame
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `slot`: Slot types, the connection protocol and value conversions
//! - `event`: Fault-isolated subscription lists
//! - `registry`: Node type registration and the construction cache
//! - `node`: The `NodeLogic` trait and the runtime `Node` wrapper
//! - `graph`: Subgraphs, connections and persisted definitions
//! - `scheduler`: The process loop
//! - `engine`: The runtime root tying everything together
//! - `nodes`: Bundled node types
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tickgraph_core::node::{NodeLogic, SlotDeclarations};
//! use tickgraph_core::registry::{NodeTypeAttributes, NodeTypeId};
//! use tickgraph_core::slot::{InputSlot, OutputSlot, SlotId};
//! use tickgraph_core::{Engine, EngineConfig, LiteralValue};
//!
//! struct Negate {
//!     input: Arc<InputSlot<f64>>,
//!     output: Arc<OutputSlot<f64>>,
//! }
//!
//! impl Default for Negate {
//!     fn default() -> Self {
//!         Self { input: InputSlot::new(0, 0.0), output: OutputSlot::new(0, 0.0) }
//!     }
//! }
//!
//! impl NodeLogic for Negate {
//!     fn declare_slots(&self, slots: &mut SlotDeclarations) {
//!         slots.input("input", &self.input).output("output", &self.output);
//!     }
//!
//!     fn process(&mut self, _delta: f64) {
//!         self.output.set(-self.input.value());
//!     }
//! }
//!
//! const NEGATE: NodeTypeId = NodeTypeId::from_u128(0x5d1e_0001);
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! engine
//!     .registry()
//!     .register_node::<Negate>(NodeTypeAttributes::new(NEGATE).named("Negate"))
//!     .unwrap();
//!
//! let id = engine.create_node(NEGATE).unwrap();
//! engine.set_literal_input(id, SlotId(0), LiteralValue::Float(2.5)).unwrap();
//!
//! engine.start().unwrap();
//! engine.allow_run_once();
//! assert!(engine.wait_for_iteration(1, std::time::Duration::from_secs(5)));
//! engine.stop().unwrap();
//!
//! let output = engine.node(id).unwrap().output(SlotId(0)).unwrap();
//! assert_eq!(output.literal(), Some(LiteralValue::Float(-2.5)));
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod registry;
pub mod scheduler;
pub mod slot;
pub mod value;

pub use config::{EngineConfig, LoopConfig, LoopMode};
pub use engine::Engine;
pub use error::{ConstructionError, GraphError, Result, UsageViolation};
pub use graph::{Connection, ConnectionEndpoint, InstanceInfo, Subgraph, SubgraphDefinition};
pub use node::{InstanceId, Node, NodeLogic, SlotDeclarations};
pub use registry::{NodeTypeAttributes, NodeTypeId, TypeRegistry};
pub use scheduler::ProcessLoop;
pub use value::{LiteralValue, SlotValue, ValueType};
