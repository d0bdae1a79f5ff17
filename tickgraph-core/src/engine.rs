//! Engine
//!
//! The runtime root. An [`Engine`] owns one of each shared service (type
//! registry, construction cache, process loop, definition store) and the root
//! subgraph, and exposes the operations an editor front end needs. Nothing is
//! global: independent engines can coexist in one process.
//!
//! # Example
//!
//! ```rust
//! use tickgraph_core::nodes::{CountSeconds, Echo};
//! use tickgraph_core::slot::SlotId;
//! use tickgraph_core::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! let counter = engine.create_node(CountSeconds::TYPE_ID).unwrap();
//! let echo = engine.create_node(Echo::TYPE_ID).unwrap();
//!
//! // CountSeconds.count_as_string -> Echo.text
//! assert!(engine.connect(counter, SlotId(0), echo, SlotId(0)).unwrap());
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::graph::{ConnectionEndpoint, DefinitionStore, GraphContext, Subgraph, SubgraphDefinition};
use crate::node::{InstanceId, Node};
use crate::nodes::register_builtin_nodes;
use crate::registry::{NodeTypeId, TypeRegistry};
use crate::scheduler::ProcessLoop;
use crate::slot::{Conversions, SlotId};
use crate::value::LiteralValue;

/// The node graph runtime.
pub struct Engine {
    config: EngineConfig,
    context: GraphContext,
    root: Arc<Subgraph>,
}

impl Engine {
    /// Build an engine from its configuration.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let conversions = if config.builtin_conversions {
            Conversions::with_builtin()
        } else {
            Conversions::new()
        };
        let registry = TypeRegistry::with_conversions(conversions);
        if config.builtin_nodes {
            register_builtin_nodes(&registry)?;
        }

        let process_loop = Arc::new(ProcessLoop::new(config.process_loop.clone()));
        let context = GraphContext::new(Arc::new(registry), process_loop);
        let root = Subgraph::new(context.clone());

        tracing::debug!(node_types = context.registry.node_types().len(), "engine created");
        Ok(Self { config, context, root })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &GraphContext {
        &self.context
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.context.registry
    }

    pub fn process_loop(&self) -> &Arc<ProcessLoop> {
        &self.context.process_loop
    }

    pub fn definitions(&self) -> &Arc<DefinitionStore> {
        &self.context.definitions
    }

    /// The top-level subgraph.
    pub fn root(&self) -> &Arc<Subgraph> {
        &self.root
    }

    /// Store the definition backing nodes of `type_id`.
    ///
    /// Only nodes created afterwards pick it up.
    pub fn register_definition(&self, type_id: NodeTypeId, definition: SubgraphDefinition) {
        self.context.definitions.insert(type_id, definition);
    }

    /// Create a node in the root subgraph.
    pub fn create_node(&self, type_id: NodeTypeId) -> Result<InstanceId> {
        self.create_node_with_id(type_id, InstanceId::new())
    }

    /// Create a node in the root subgraph under a chosen instance ID.
    pub fn create_node_with_id(&self, type_id: NodeTypeId, id: InstanceId) -> Result<InstanceId> {
        self.root.create_node_logic(type_id, Some(id))?;
        Ok(id)
    }

    /// A node of the root subgraph.
    pub fn node(&self, id: InstanceId) -> Result<Arc<Node>> {
        Ok(self.root.get_node(id)?)
    }

    pub fn remove_node(&self, id: InstanceId) -> bool {
        self.root.remove_node(id)
    }

    /// Connect an output port to an input port in the root subgraph.
    pub fn connect(&self, from: InstanceId, from_port: SlotId, to: InstanceId, to_port: SlotId) -> Result<bool> {
        self.root.try_add_connection(
            ConnectionEndpoint::new(from, from_port),
            ConnectionEndpoint::new(to, to_port),
        )
    }

    /// Release a connection made with [`Engine::connect`].
    pub fn disconnect(&self, from: InstanceId, from_port: SlotId, to: InstanceId, to_port: SlotId) -> Result<bool> {
        self.root.remove_connection(
            ConnectionEndpoint::new(from, from_port),
            ConnectionEndpoint::new(to, to_port),
        )
    }

    pub fn set_literal_input(&self, id: InstanceId, port: SlotId, literal: LiteralValue) -> Result<()> {
        self.root.set_literal_input(id, port, literal)
    }

    /// Snapshot the root subgraph.
    pub fn save(&self) -> SubgraphDefinition {
        self.root.definition()
    }

    /// Populate the (empty) root subgraph from a definition.
    pub fn load(&self, definition: &SubgraphDefinition) -> Result<()> {
        self.root.load(definition)
    }

    pub fn start(&self) -> Result<()> {
        self.context.process_loop.start()
    }

    pub fn stop(&self) -> Result<()> {
        self.context.process_loop.stop()
    }

    pub fn allow_run_once(&self) {
        self.context.process_loop.allow_run_once();
    }

    /// See [`ProcessLoop::wait_for_iteration`].
    pub fn wait_for_iteration(&self, target: u64, timeout: Duration) -> bool {
        self.context.process_loop.wait_for_iteration(target, timeout)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.context.process_loop.is_running() {
            if let Err(err) = self.context.process_loop.stop() {
                tracing::warn!(error = %err, "process loop did not stop cleanly");
            }
        }
        // Nodes hold the context through their nested subgraphs.
        self.root.clear();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.root)
            .field("process_loop", &self.context.process_loop)
            .finish()
    }
}
