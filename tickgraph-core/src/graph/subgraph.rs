//! Subgraph implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::{Connection, ConnectionEndpoint, ExposedInput, GraphContext, InstanceInfo, SubgraphDefinition};
use crate::error::{ConstructionError, GraphError, Result, UsageViolation};
use crate::node::{InstanceId, Node};
use crate::registry::NodeTypeId;
use crate::slot::{AnyInputSlot, AnyOutputSlot, LiteralRefusal, SlotId};
use crate::value::LiteralValue;

#[derive(Default)]
struct State {
    nodes: IndexMap<InstanceId, Arc<Node>>,
    instances: IndexMap<InstanceId, InstanceInfo>,
    connections: Vec<Connection>,
    exposed_inputs: Vec<ExposedInput>,
    exposed_outputs: Vec<ConnectionEndpoint>,
    type_id: Option<NodeTypeId>,
}

/// A set of node instances and the connections between them.
///
/// The state lock is never held while slots are connected, released or
/// destroyed: slot operations fire callbacks that may re-enter the subgraph.
pub struct Subgraph {
    context: GraphContext,

    /// Node that owns this subgraph; `None` for a root.
    owner: Option<(InstanceId, Weak<Node>)>,

    /// Node types of every enclosing owner, outermost first.
    ancestry: Vec<NodeTypeId>,

    loaded: AtomicBool,
    state: Mutex<State>,
}

impl Subgraph {
    /// Create an empty root subgraph.
    pub fn new(context: GraphContext) -> Arc<Self> {
        Arc::new(Self {
            context,
            owner: None,
            ancestry: Vec::new(),
            loaded: AtomicBool::new(false),
            state: Mutex::new(State::default()),
        })
    }

    fn nested(&self, owner: &Arc<Node>, owner_id: InstanceId) -> Arc<Self> {
        let mut ancestry = self.ancestry.clone();
        ancestry.push(owner.type_id());

        Arc::new(Self {
            context: self.context.clone(),
            owner: Some((owner_id, Arc::downgrade(owner))),
            ancestry,
            loaded: AtomicBool::new(false),
            state: Mutex::new(State::default()),
        })
    }

    /// Shared engine services.
    pub fn context(&self) -> &GraphContext {
        &self.context
    }

    /// The owning node, if this subgraph is nested and the owner is alive.
    pub fn owner(&self) -> Option<Arc<Node>> {
        self.owner.as_ref().and_then(|(_, node)| node.upgrade())
    }

    pub fn owner_id(&self) -> Option<InstanceId> {
        self.owner.as_ref().map(|(id, _)| *id)
    }

    pub fn is_nested(&self) -> bool {
        self.owner.is_some()
    }

    fn addresses_owner(&self, node: InstanceId) -> bool {
        match self.owner_id() {
            Some(owner) => node == owner || node == InstanceId::OWNER,
            None => false,
        }
    }

    /// The form an endpoint is recorded under. Both names of the owner
    /// collapse to [`InstanceId::OWNER`].
    fn canonical(&self, endpoint: ConnectionEndpoint) -> ConnectionEndpoint {
        if self.addresses_owner(endpoint.node) {
            ConnectionEndpoint::new(InstanceId::OWNER, endpoint.port)
        } else {
            endpoint
        }
    }

    /// Node type this subgraph was loaded for, if any.
    pub fn type_id(&self) -> Option<NodeTypeId> {
        self.state.lock().type_id
    }

    // -------------------------------------------------------------------------
    // Nodes
    // -------------------------------------------------------------------------

    /// Instantiate a node of a registered type.
    ///
    /// A fresh instance ID is generated when none is given.
    pub fn create_node_logic(&self, type_id: NodeTypeId, instance_id: Option<InstanceId>) -> Result<Arc<Node>> {
        self.create_node_from_info(InstanceInfo::new(type_id, instance_id.unwrap_or_default()))
    }

    /// Instantiate a node from its persisted description.
    ///
    /// Literal overrides that no longer fit the node's inputs are logged and
    /// skipped. On success the node is initialized and handed to the process
    /// loop.
    pub fn create_node_from_info(&self, info: InstanceInfo) -> Result<Arc<Node>> {
        let id = info.instance_id;
        if id == InstanceId::OWNER || self.addresses_owner(id) || self.state.lock().nodes.contains_key(&id) {
            return Err(ConstructionError::DuplicateInstance(id).into());
        }

        let context = &self.context;
        let (type_info, logic) = context.constructors.construct(&context.registry, info.type_id)?;
        let node = Node::new(type_info, logic);
        node.set_instance_id(id, &context.registry, &context.constructors)?;

        for (port, literal) in &info.literal_inputs {
            if let Err(err) = apply_literal(&node, id, *port, literal) {
                tracing::warn!(instance = %id, port = %port, error = %err, "literal override skipped");
            }
        }

        if context.definitions.contains(info.type_id) {
            if let Err(err) = self.build_nested(&node, id) {
                node.destroy();
                return Err(err);
            }
        }

        node.initialize();

        {
            let mut state = self.state.lock();
            if state.nodes.contains_key(&id) {
                drop(state);
                node.destroy();
                return Err(ConstructionError::DuplicateInstance(id).into());
            }
            state.nodes.insert(id, Arc::clone(&node));
            state.instances.insert(id, info);
        }

        context.process_loop.add(Arc::clone(&node));
        tracing::debug!(instance = %id, node = node.type_name(), "node created");
        Ok(node)
    }

    /// Remove a node: prune its ledger entries, take it off the process loop
    /// and destroy it. Returns false if the node is not in this subgraph.
    pub fn remove_node(&self, id: InstanceId) -> bool {
        let node = {
            let mut state = self.state.lock();
            let Some(node) = state.nodes.shift_remove(&id) else {
                return false;
            };
            state.instances.shift_remove(&id);
            state.connections.retain(|c| !c.involves_node(id));
            state.exposed_inputs.retain(|e| e.endpoint.node != id);
            state.exposed_outputs.retain(|e| e.node != id);
            node
        };

        self.context.process_loop.remove(&node);
        node.destroy();
        tracing::debug!(instance = %id, "node removed");
        true
    }

    /// Look up a node of this subgraph.
    pub fn get_node(&self, id: InstanceId) -> std::result::Result<Arc<Node>, UsageViolation> {
        self.state
            .lock()
            .nodes
            .get(&id)
            .cloned()
            .ok_or(UsageViolation::UnknownNode(id))
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.state.lock().nodes.contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Nodes in creation order.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.state.lock().nodes.values().cloned().collect()
    }

    /// Persisted description of one instance.
    pub fn instance_info(&self, id: InstanceId) -> Option<InstanceInfo> {
        self.state.lock().instances.get(&id).cloned()
    }

    /// Set or clear a node's display name override.
    pub fn rename_node(&self, id: InstanceId, rename: Option<String>) -> std::result::Result<(), UsageViolation> {
        let mut state = self.state.lock();
        let info = state.instances.get_mut(&id).ok_or(UsageViolation::UnknownNode(id))?;
        info.rename = rename;
        Ok(())
    }

    /// Set or clear a node's note.
    pub fn set_note(&self, id: InstanceId, note: Option<String>) -> std::result::Result<(), UsageViolation> {
        let mut state = self.state.lock();
        let info = state.instances.get_mut(&id).ok_or(UsageViolation::UnknownNode(id))?;
        info.note = note;
        Ok(())
    }

    /// Attach a nested subgraph to one of this subgraph's nodes.
    ///
    /// The inner graph is loaded from the definition stored for the node's
    /// type, or left empty if there is none.
    pub fn create_nested(&self, id: InstanceId) -> Result<Arc<Subgraph>> {
        let node = self.get_node(id)?;
        self.build_nested(&node, id)
    }

    fn build_nested(&self, node: &Arc<Node>, id: InstanceId) -> Result<Arc<Subgraph>> {
        if node.subgraph().is_some() {
            return Err(UsageViolation::SubgraphAlreadySet.into());
        }

        let inner = self.nested(node, id);
        if let Some(definition) = self.context.definitions.get(node.type_id()) {
            if self.ancestry.contains(&node.type_id()) {
                return Err(ConstructionError::RecursiveDefinition(node.type_id().0).into());
            }
            if let Err(err) = inner.load(&definition) {
                inner.clear();
                return Err(err);
            }
        }

        if let Err(err) = node.attach_subgraph(Arc::clone(&inner)) {
            inner.clear();
            return Err(err.into());
        }
        Ok(inner)
    }

    // -------------------------------------------------------------------------
    // Connections
    // -------------------------------------------------------------------------

    /// Connect an output to an input and record it in the ledger.
    ///
    /// `Ok(false)` means the slots refused (incompatible types); nothing was
    /// changed. An input that was already connected is re-wired, and its old
    /// ledger entry replaced.
    pub fn try_add_connection(&self, source: ConnectionEndpoint, target: ConnectionEndpoint) -> Result<bool> {
        let output = self.resolve_output(source)?;
        let input = self.resolve_input(target)?;

        if !input.try_connect(&output, false, self.context.registry.conversions())? {
            tracing::debug!(?source, ?target, "connection refused");
            return Ok(false);
        }

        let connection = Connection::new(self.canonical(source), self.canonical(target));
        let mut state = self.state.lock();
        state.connections.retain(|c| c.target != connection.target);
        state.connections.push(connection);
        Ok(true)
    }

    /// Release a recorded connection.
    ///
    /// Returns `Ok(false)` when the ledger has no such connection.
    pub fn remove_connection(&self, source: ConnectionEndpoint, target: ConnectionEndpoint) -> Result<bool> {
        let connection = Connection::new(self.canonical(source), self.canonical(target));
        if !self.state.lock().connections.contains(&connection) {
            return Ok(false);
        }

        let output = self.resolve_output(source)?;
        let input = self.resolve_input(target)?;
        input.release_connection(output.as_ref())?;

        self.state.lock().connections.retain(|c| *c != connection);
        Ok(true)
    }

    /// Recorded connections, oldest first.
    ///
    /// Endpoints on the owning node are listed under [`InstanceId::OWNER`].
    pub fn connections(&self) -> Vec<Connection> {
        self.state.lock().connections.clone()
    }

    /// The output slot behind an endpoint.
    ///
    /// An endpoint on the owning node (or [`InstanceId::OWNER`]) resolves to
    /// the mirror of the owner's input with that ID.
    pub fn resolve_output(&self, endpoint: ConnectionEndpoint) -> Result<Arc<dyn AnyOutputSlot>> {
        if self.addresses_owner(endpoint.node) {
            let owner = self.owner().ok_or(UsageViolation::UnknownNode(endpoint.node))?;
            return Ok(owner.input_mirror(endpoint.port)?);
        }
        Ok(self.get_node(endpoint.node)?.output(endpoint.port)?)
    }

    /// The input slot behind an endpoint.
    ///
    /// An endpoint on the owning node (or [`InstanceId::OWNER`]) resolves to
    /// the mirror of the owner's output with that ID.
    pub fn resolve_input(&self, endpoint: ConnectionEndpoint) -> Result<Arc<dyn AnyInputSlot>> {
        if self.addresses_owner(endpoint.node) {
            let owner = self.owner().ok_or(UsageViolation::UnknownNode(endpoint.node))?;
            return Ok(owner.output_mirror(endpoint.port)?);
        }
        Ok(self.get_node(endpoint.node)?.input(endpoint.port)?)
    }

    // -------------------------------------------------------------------------
    // Literals
    // -------------------------------------------------------------------------

    /// Override the value of an unconnected input and record it.
    pub fn set_literal_input(&self, id: InstanceId, port: SlotId, literal: LiteralValue) -> Result<()> {
        let node = self.get_node(id)?;
        apply_literal(&node, id, port, &literal)?;

        if let Some(info) = self.state.lock().instances.get_mut(&id) {
            info.literal_inputs.insert(port, literal);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Exposed Ports
    // -------------------------------------------------------------------------

    /// Expose an inner input on the owning node.
    pub fn expose_input(&self, mut exposed: ExposedInput) -> Result<()> {
        let input = self.resolve_input(exposed.endpoint)?;
        exposed.endpoint = self.canonical(exposed.endpoint);

        {
            let mut state = self.state.lock();
            if state.exposed_inputs.iter().any(|e| e.endpoint == exposed.endpoint) {
                return Err(UsageViolation::DuplicateExposedPort(exposed.endpoint).into());
            }
            state.exposed_inputs.push(exposed.clone());
        }

        if let Some(default) = &exposed.default {
            if let Err(refusal) = input.apply_literal(default) {
                tracing::debug!(endpoint = ?exposed.endpoint, ?refusal, "exposed default not applied");
            }
        }
        Ok(())
    }

    pub fn unexpose_input(&self, endpoint: ConnectionEndpoint) -> std::result::Result<(), UsageViolation> {
        let endpoint = self.canonical(endpoint);
        let mut state = self.state.lock();
        let index = state
            .exposed_inputs
            .iter()
            .position(|e| e.endpoint == endpoint)
            .ok_or(UsageViolation::UnknownExposedPort(endpoint))?;
        state.exposed_inputs.remove(index);
        Ok(())
    }

    /// Expose an inner output on the owning node.
    pub fn expose_output(&self, endpoint: ConnectionEndpoint) -> Result<()> {
        self.resolve_output(endpoint)?;
        let endpoint = self.canonical(endpoint);

        let mut state = self.state.lock();
        if state.exposed_outputs.contains(&endpoint) {
            return Err(UsageViolation::DuplicateExposedPort(endpoint).into());
        }
        state.exposed_outputs.push(endpoint);
        Ok(())
    }

    pub fn unexpose_output(&self, endpoint: ConnectionEndpoint) -> std::result::Result<(), UsageViolation> {
        let endpoint = self.canonical(endpoint);
        let mut state = self.state.lock();
        let index = state
            .exposed_outputs
            .iter()
            .position(|e| *e == endpoint)
            .ok_or(UsageViolation::UnknownExposedPort(endpoint))?;
        state.exposed_outputs.remove(index);
        Ok(())
    }

    pub fn exposed_inputs(&self) -> Vec<ExposedInput> {
        self.state.lock().exposed_inputs.clone()
    }

    pub fn exposed_outputs(&self) -> Vec<ConnectionEndpoint> {
        self.state.lock().exposed_outputs.clone()
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Snapshot this subgraph into its persisted form.
    pub fn definition(&self) -> SubgraphDefinition {
        let state = self.state.lock();
        SubgraphDefinition {
            type_id: state.type_id,
            nodes: state.instances.values().cloned().collect(),
            connections: state.connections.clone(),
            exposed_inputs: state.exposed_inputs.clone(),
            exposed_outputs: state.exposed_outputs.clone(),
        }
    }

    /// Populate this (empty) subgraph from a definition. Allowed once.
    ///
    /// Nodes are created first, then connections replayed in order, then
    /// exposed ports registered. Loading stops at the first failure and
    /// leaves whatever was built so far in place.
    pub fn load(&self, definition: &SubgraphDefinition) -> Result<()> {
        if self.loaded.load(Ordering::Acquire) {
            return Err(UsageViolation::DefinitionAlreadyLoaded.into());
        }
        let existing = self.node_count();
        if existing > 0 {
            return Err(UsageViolation::SubgraphNotEmpty(existing).into());
        }
        if self.loaded.swap(true, Ordering::AcqRel) {
            return Err(UsageViolation::DefinitionAlreadyLoaded.into());
        }

        self.state.lock().type_id = definition.type_id;

        for info in &definition.nodes {
            self.create_node_from_info(info.clone())?;
        }

        for connection in &definition.connections {
            if !self.try_add_connection(connection.source, connection.target)? {
                return Err(GraphError::ConnectionRejected(connection.source, connection.target));
            }
        }

        for exposed in &definition.exposed_inputs {
            self.expose_input(exposed.clone())?;
        }
        for endpoint in &definition.exposed_outputs {
            self.expose_output(*endpoint)?;
        }

        tracing::debug!(
            nodes = definition.nodes.len(),
            connections = definition.connections.len(),
            "subgraph loaded"
        );
        Ok(())
    }

    /// Remove every node, newest first.
    pub fn clear(&self) {
        let nodes: Vec<Arc<Node>> = {
            let mut state = self.state.lock();
            state.instances.clear();
            state.connections.clear();
            state.exposed_inputs.clear();
            state.exposed_outputs.clear();
            state.nodes.drain(..).map(|(_, node)| node).collect()
        };

        for node in nodes.iter().rev() {
            self.context.process_loop.remove(node);
            node.destroy();
        }
    }
}

impl std::fmt::Debug for Subgraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Subgraph")
            .field("owner", &self.owner_id())
            .field("nodes", &state.nodes.len())
            .field("connections", &state.connections.len())
            .finish()
    }
}

fn apply_literal(node: &Node, id: InstanceId, port: SlotId, literal: &LiteralValue) -> Result<()> {
    let input = node.input(port)?;
    input.apply_literal(literal).map_err(|refusal| match refusal {
        LiteralRefusal::Connected => GraphError::InputConnected { node: id, port },
        LiteralRefusal::KindMismatch => GraphError::LiteralRejected {
            port,
            expected: input.value_type().name(),
        },
    })
}
