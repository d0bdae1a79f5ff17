//! Subgraphs
//!
//! A subgraph owns a set of node instances and the normal connections between
//! them. It is the unit of editing (create, wire, remove) and of persistence
//! ([`SubgraphDefinition`]).
//!
//! # Overview
//!
//! - Every engine has one root subgraph.
//! - A node may own a nested subgraph. Inside it, the owning node's slots are
//!   addressed through the owner's instance ID (or [`InstanceId::OWNER`] in a
//!   stored definition); those endpoints resolve to the node's transformation
//!   mirrors, so values cross the boundary in both directions without the
//!   inner nodes knowing they are nested.
//! - The connection ledger records successful slot connections only. Slots
//!   stay the source of truth for what is wired.
//!
//! # Shared Services
//!
//! Subgraphs at every depth share one [`GraphContext`]: the type registry,
//! the construction cache, the process loop and the definition store.
//!
//! [`InstanceId::OWNER`]: crate::node::InstanceId::OWNER

mod connection;
mod definition;
mod subgraph;

pub use connection::{Connection, ConnectionEndpoint};
pub use definition::{DefinitionStore, ExposedInput, InstanceInfo, SubgraphDefinition};
pub use subgraph::Subgraph;

use std::sync::Arc;

use crate::registry::{ConstructionCache, TypeRegistry};
use crate::scheduler::ProcessLoop;

/// Services shared by every subgraph of one engine.
#[derive(Debug, Clone)]
pub struct GraphContext {
    pub registry: Arc<TypeRegistry>,
    pub constructors: Arc<ConstructionCache>,
    pub process_loop: Arc<ProcessLoop>,
    pub definitions: Arc<DefinitionStore>,
}

impl GraphContext {
    pub fn new(registry: Arc<TypeRegistry>, process_loop: Arc<ProcessLoop>) -> Self {
        Self {
            registry,
            constructors: Arc::new(ConstructionCache::new()),
            process_loop,
            definitions: Arc::new(DefinitionStore::new()),
        }
    }
}
