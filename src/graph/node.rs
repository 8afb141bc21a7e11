use crate::graph::socket::Sockets;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Free-form configuration record of a node
pub type NodeData = serde_json::Map<String, serde_json::Value>;

/// Stable node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// Tag of the component this node instantiates
    pub component: String,
    pub data: NodeData,
    pub sockets: Sockets,
}

impl Node {
    pub fn new(id: NodeId, component: impl Into<String>, data: NodeData, sockets: Sockets) -> Self {
        Self {
            id,
            component: component.into(),
            data,
            sockets,
        }
    }
}

/// An edge from a node's output socket to another node's input socket
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub from: NodeId,
    pub output: String,
    pub to: NodeId,
    pub input: String,
}

impl Connection {
    pub fn new(
        from: NodeId,
        output: impl Into<String>,
        to: NodeId,
        input: impl Into<String>,
    ) -> Self {
        Self {
            from,
            output: output.into(),
            to,
            input: input.into(),
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} -> {}.{}", self.from, self.output, self.to, self.input)
    }
}
