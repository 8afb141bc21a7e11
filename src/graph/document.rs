//! Serialized form of a graph: nodes with their data and input links.

use crate::graph::node::{Connection, NodeData, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub version: u32,
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, NodeDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    pub id: NodeId,
    pub component: String,
    #[serde(default)]
    pub data: NodeData,
    /// Producers per input socket, in connection order
    #[serde(default)]
    pub inputs: BTreeMap<String, Vec<InputLink>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputLink {
    pub node: NodeId,
    pub output: String,
}

impl Default for GraphDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            nodes: BTreeMap::new(),
        }
    }
}

impl GraphDocument {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Every connection described by the document
    pub fn connections(&self) -> Vec<Connection> {
        let mut connections = Vec::new();
        for node in self.nodes.values() {
            for (input, links) in &node.inputs {
                for link in links {
                    connections.push(Connection::new(link.node, link.output.clone(), node.id, input.clone()));
                }
            }
        }
        connections
    }
}
