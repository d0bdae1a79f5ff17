//! Connection records.
//!
//! The subgraph keeps a ledger of the normal connections it made, so the
//! wiring can be snapshotted into a definition and replayed on load. The
//! ledger only mirrors what the slots already did; it never drives them.

use serde::{Deserialize, Serialize};

use crate::node::InstanceId;
use crate::slot::SlotId;

/// One side of a connection: a port on a node.
///
/// When `node` is the subgraph's owning node, the port refers to that node's
/// transformation mirror instead of one of its normal slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionEndpoint {
    pub node: InstanceId,
    pub port: SlotId,
}

impl ConnectionEndpoint {
    pub fn new(node: InstanceId, port: SlotId) -> Self {
        Self { node, port }
    }
}

/// A normal connection from an output to an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    /// Output side.
    pub source: ConnectionEndpoint,
    /// Input side.
    pub target: ConnectionEndpoint,
}

impl Connection {
    pub fn new(source: ConnectionEndpoint, target: ConnectionEndpoint) -> Self {
        Self { source, target }
    }

    /// Whether either end sits on `node`.
    pub fn involves_node(&self, node: InstanceId) -> bool {
        self.source.node == node || self.target.node == node
    }
}
