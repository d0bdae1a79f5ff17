//! Error Types
//!
//! Structural failures are split by who is at fault:
//!
//! - [`ConstructionError`]: a node or node type could not be built. The node
//!   never becomes live.
//! - [`UsageViolation`]: the caller broke a protocol rule (double assignment,
//!   releasing a connection that does not exist, stopping a stopped loop).
//!   These signal programmer error, not a recoverable runtime condition.
//! - [`GraphError`]: the umbrella returned by subgraph and engine operations.
//!
//! A rejected connection is not an error. Connect calls return `Ok(false)` and
//! leave every slot untouched.
//!
//! Faults raised by user callbacks during value propagation never show up
//! here. They are contained and logged at the dispatch boundary (see
//! [`crate::event`]).

use thiserror::Error;
use uuid::Uuid;

use crate::graph::ConnectionEndpoint;
use crate::node::InstanceId;
use crate::slot::SlotId;

/// A node or node type could not be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    /// No node type is registered under this stable ID.
    #[error("node type {0} is not registered")]
    UnknownType(Uuid),

    /// A different node type already owns this stable ID.
    #[error("node type id {id} is already registered to {existing}")]
    DuplicateTypeId {
        /// The contested stable ID.
        id: Uuid,
        /// Name of the type that registered it first.
        existing: &'static str,
    },

    /// The type was registered without a stable ID.
    #[error("node type {0} must carry a non-nil type id")]
    MissingTypeId(&'static str),

    /// The type was registered without a display name.
    #[error("node type {0} must carry a display name")]
    MissingTypeName(Uuid),

    /// Two same-direction slots on one node share an ID.
    #[error("duplicate {direction} slot id {id} found on {node}")]
    DuplicateSlotId {
        /// Name of the node type.
        node: &'static str,
        /// "input" or "output".
        direction: &'static str,
        /// The repeated ID.
        id: SlotId,
    },

    /// A slot object was declared twice, or is already owned by another node.
    #[error("slot {slot} on {node} is already bound to a node")]
    SlotRebound {
        /// Name of the node type.
        node: &'static str,
        /// Declared field name.
        slot: String,
    },

    /// The requested instance ID is already used in this subgraph.
    #[error("instance {0} already exists in this subgraph")]
    DuplicateInstance(InstanceId),

    /// A stored definition instantiates its own node type, directly or through
    /// a nested definition.
    #[error("definition for node type {0} contains itself")]
    RecursiveDefinition(Uuid),
}

/// The caller broke a protocol rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageViolation {
    #[error("instance id can only be set once")]
    InstanceIdAlreadySet,

    #[error("subgraph can only be set once")]
    SubgraphAlreadySet,

    #[error("subgraph definition was already loaded")]
    DefinitionAlreadyLoaded,

    #[error("subgraph already holds {0} node(s); definitions load into an empty subgraph")]
    SubgraphNotEmpty(usize),

    #[error("input slot {0} is not connected to the given output")]
    NotConnected(SlotId),

    #[error("transformation connection on slot {0} cannot be released")]
    TransformationNotReleasable(SlotId),

    #[error("slot {0} already has a transformation connection")]
    TransformationAlreadyAttached(SlotId),

    #[error("process loop is not running")]
    LoopNotRunning,

    #[error("process loop is already running")]
    LoopAlreadyRunning,

    #[error("node {0} does not exist in this subgraph")]
    UnknownNode(InstanceId),

    #[error("node {node} has no {direction} port {port}")]
    UnknownPort {
        node: InstanceId,
        direction: &'static str,
        port: SlotId,
    },

    #[error("{direction} port index {index} is out of range (node has {count})")]
    PortIndexOutOfRange {
        direction: &'static str,
        index: usize,
        count: usize,
    },

    #[error("endpoint {0:?} is already exposed")]
    DuplicateExposedPort(ConnectionEndpoint),

    #[error("endpoint {0:?} is not exposed")]
    UnknownExposedPort(ConnectionEndpoint),

    #[error("node {0} has not been assigned an instance id")]
    NotInitialized(&'static str),
}

/// Errors returned by subgraph and engine operations.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    Usage(#[from] UsageViolation),

    /// Literal values only apply to unconnected inputs.
    #[error("input {port} on node {node} is connected; literal value not applied")]
    InputConnected { node: InstanceId, port: SlotId },

    /// The literal's kind does not fit the slot's value type.
    #[error("literal does not fit input {port} ({expected})")]
    LiteralRejected { port: SlotId, expected: &'static str },

    /// A persisted connection could not be re-established on load.
    #[error("connection {0:?} -> {1:?} was rejected while loading")]
    ConnectionRejected(ConnectionEndpoint, ConnectionEndpoint),

    /// The process loop worker thread could not be spawned.
    #[error("failed to spawn process loop thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("msgpack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),
}

/// Result alias used across the crate.
pub type Result<T, E = GraphError> = std::result::Result<T, E>;
