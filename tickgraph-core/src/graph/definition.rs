//! Subgraph Definitions
//!
//! The persisted form of a subgraph: which node instances exist, their
//! literal input overrides, how they are wired and which ports are exposed
//! on the owning node. Definitions round-trip through JSON (for tooling and
//! hand editing) and MessagePack (compact, for storage).
//!
//! # Format
//!
//! ```json
//! {
//!   "type_id": "61f89227-6810-49ab-9848-069dadb63b16",
//!   "nodes": [
//!     {
//!       "type_id": "9557ade7-bef8-4666-8acb-c2c9276c69cc",
//!       "instance_id": "8c0c0a41-3f4e-4a5c-9a3e-4d2f4a3b1f00",
//!       "literal_inputs": { "1": { "kind": "int", "value": 7 } }
//!     }
//!   ],
//!   "connections": [],
//!   "exposed_inputs": [],
//!   "exposed_outputs": []
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::{Connection, ConnectionEndpoint};
use crate::error::Result;
use crate::node::InstanceId;
use crate::registry::NodeTypeId;
use crate::slot::SlotId;
use crate::value::LiteralValue;

/// Persisted description of one node instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub type_id: NodeTypeId,
    pub instance_id: InstanceId,

    /// User-facing name override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    /// Literal values typed into unconnected inputs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub literal_inputs: BTreeMap<SlotId, LiteralValue>,
}

impl InstanceInfo {
    pub fn new(type_id: NodeTypeId, instance_id: InstanceId) -> Self {
        Self {
            type_id,
            instance_id,
            rename: None,
            note: None,
            literal_inputs: BTreeMap::new(),
        }
    }

    pub fn with_literal(mut self, port: SlotId, value: LiteralValue) -> Self {
        self.literal_inputs.insert(port, value);
        self
    }
}

/// An input port exposed on the owning node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposedInput {
    pub endpoint: ConnectionEndpoint,

    /// Value used while the exposed port is unconnected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<LiteralValue>,
}

/// Persisted form of a subgraph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubgraphDefinition {
    /// Node type this definition implements, when it backs a nested subgraph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_id: Option<NodeTypeId>,

    #[serde(default)]
    pub nodes: Vec<InstanceInfo>,

    #[serde(default)]
    pub connections: Vec<Connection>,

    #[serde(default)]
    pub exposed_inputs: Vec<ExposedInput>,

    #[serde(default)]
    pub exposed_outputs: Vec<ConnectionEndpoint>,
}

impl SubgraphDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a definition from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode a definition from MessagePack.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Encode to MessagePack, keeping field names.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Find the description of an instance.
    pub fn instance(&self, id: InstanceId) -> Option<&InstanceInfo> {
        self.nodes.iter().find(|info| info.instance_id == id)
    }
}

/// Definitions keyed by the node type they implement.
///
/// A node whose type has a stored definition gets a nested subgraph loaded
/// from it when it is created.
#[derive(Debug, Default)]
pub struct DefinitionStore {
    definitions: DashMap<NodeTypeId, Arc<SubgraphDefinition>>,
}

impl DefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a definition, replacing any previous one for the same type.
    pub fn insert(&self, type_id: NodeTypeId, definition: SubgraphDefinition) -> Option<Arc<SubgraphDefinition>> {
        self.definitions.insert(type_id, Arc::new(definition))
    }

    pub fn get(&self, type_id: NodeTypeId) -> Option<Arc<SubgraphDefinition>> {
        self.definitions.get(&type_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, type_id: NodeTypeId) -> Option<Arc<SubgraphDefinition>> {
        self.definitions.remove(&type_id).map(|(_, definition)| definition)
    }

    pub fn contains(&self, type_id: NodeTypeId) -> bool {
        self.definitions.contains_key(&type_id)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TYPE: NodeTypeId = NodeTypeId::from_u128(0x9557ade7_bef8_4666_8acb_c2c9276c69cc);

    fn sample() -> SubgraphDefinition {
        let a = InstanceId::from_u128(1);
        let b = InstanceId::from_u128(2);
        SubgraphDefinition {
            type_id: Some(TYPE),
            nodes: vec![
                InstanceInfo::new(TYPE, a).with_literal(SlotId(1), LiteralValue::Int(7)),
                InstanceInfo {
                    rename: Some("second".into()),
                    ..InstanceInfo::new(TYPE, b)
                },
            ],
            connections: vec![Connection::new(
                ConnectionEndpoint::new(a, SlotId(0)),
                ConnectionEndpoint::new(b, SlotId(0)),
            )],
            exposed_inputs: vec![ExposedInput {
                endpoint: ConnectionEndpoint::new(a, SlotId(0)),
                default: Some(LiteralValue::String("hi".into())),
            }],
            exposed_outputs: vec![ConnectionEndpoint::new(b, SlotId(2))],
        }
    }

    #[test]
    fn json_round_trip() {
        let definition = sample();
        let json = definition.to_json().unwrap();
        assert!(json.contains("\"kind\": \"int\""));
        assert_eq!(SubgraphDefinition::from_json(&json).unwrap(), definition);
    }

    #[test]
    fn msgpack_round_trip() {
        let definition = sample();
        let bytes = definition.to_msgpack().unwrap();
        assert_eq!(SubgraphDefinition::from_msgpack(&bytes).unwrap(), definition);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let definition = SubgraphDefinition::from_json("{}").unwrap();
        assert!(definition.nodes.is_empty());
        assert!(definition.type_id.is_none());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(SubgraphDefinition::from_json("{\"nodes\": 3}").is_err());
    }

    #[test]
    fn store_replaces_by_type() {
        let store = DefinitionStore::new();
        assert!(store.insert(TYPE, SubgraphDefinition::new()).is_none());
        assert!(store.insert(TYPE, sample()).is_some());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(TYPE).unwrap().nodes.len(), 2);
    }
}
