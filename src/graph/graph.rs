//! Node and connection bookkeeping.
//!
//! The graph only enforces structure: socket existence, kind compatibility,
//! single-producer inputs and acyclicity. Evaluation state lives in the
//! executor.

use crate::graph::node::{Connection, Node, NodeData, NodeId};
use crate::graph::socket::{SocketKind, Sockets};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("node {0} already exists")]
    DuplicateNode(NodeId),

    #[error("unknown component '{0}'")]
    UnknownComponent(String),

    #[error("node {node} has no {direction} socket '{socket}'")]
    UnknownSocket {
        node: NodeId,
        socket: String,
        direction: &'static str,
    },

    #[error("cannot connect a {output} output to a {input} input")]
    IncompatibleSockets { output: SocketKind, input: SocketKind },

    #[error("connecting {0} would create a cycle")]
    Cycle(Connection),

    #[error("unsupported document version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: BTreeMap<NodeId, Node>,
    /// In creation order, which is also the order variadic inputs receive values
    connections: Vec<Connection>,
    next_id: u32,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node under a fresh id
    pub fn add_node(&mut self, component: impl Into<String>, data: NodeData, sockets: Sockets) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node::new(id, component, data, sockets));
        id
    }

    /// Inserts a node with a caller-chosen id, e.g. when loading a document
    pub fn insert_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.next_id = self.next_id.max(node.id.0 + 1);
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// Removes a node along with every connection touching it
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, GraphError> {
        let node = self.nodes.remove(&id).ok_or(GraphError::UnknownNode(id))?;
        self.connections.retain(|c| c.from != id && c.to != id);
        Ok(node)
    }

    /// Replaces a node's data and sockets, dropping connections to sockets
    /// that no longer exist or no longer accept their producer.
    pub fn update_node(
        &mut self,
        id: NodeId,
        data: NodeData,
        sockets: Sockets,
    ) -> Result<Vec<Connection>, GraphError> {
        let node = self.nodes.get_mut(&id).ok_or(GraphError::UnknownNode(id))?;
        node.data = data;
        node.sockets = sockets;

        let nodes = &self.nodes;
        let mut dropped = Vec::new();
        self.connections.retain(|c| {
            let keep = Self::socket_kinds(nodes, c)
                .map_or(false, |(output, input)| input.accepts(output));
            if !keep {
                dropped.push(c.clone());
            }
            keep
        });
        Ok(dropped)
    }

    fn socket_kinds(
        nodes: &BTreeMap<NodeId, Node>,
        connection: &Connection,
    ) -> Option<(SocketKind, SocketKind)> {
        let output = nodes
            .get(&connection.from)?
            .sockets
            .find_output(&connection.output)?;
        let input = nodes
            .get(&connection.to)?
            .sockets
            .find_input(&connection.input)?;
        Some((output.kind, input.kind))
    }

    /// Adds a connection.
    ///
    /// Connecting a second producer to a non-variadic input replaces the
    /// existing connection, which is returned.
    pub fn connect(&mut self, connection: Connection) -> Result<Option<Connection>, GraphError> {
        let from = self
            .nodes
            .get(&connection.from)
            .ok_or(GraphError::UnknownNode(connection.from))?;
        let to = self
            .nodes
            .get(&connection.to)
            .ok_or(GraphError::UnknownNode(connection.to))?;

        let output = from
            .sockets
            .find_output(&connection.output)
            .ok_or_else(|| GraphError::UnknownSocket {
                node: connection.from,
                socket: connection.output.clone(),
                direction: "output",
            })?;
        let input = to
            .sockets
            .find_input(&connection.input)
            .ok_or_else(|| GraphError::UnknownSocket {
                node: connection.to,
                socket: connection.input.clone(),
                direction: "input",
            })?;

        if !input.kind.accepts(output.kind) {
            return Err(GraphError::IncompatibleSockets {
                output: output.kind,
                input: input.kind,
            });
        }
        if connection.from == connection.to || self.reaches(connection.to, connection.from) {
            return Err(GraphError::Cycle(connection));
        }
        if self.connections.contains(&connection) {
            return Ok(None);
        }

        let replaced = if input.variadic {
            None
        } else {
            let position = self
                .connections
                .iter()
                .position(|c| c.to == connection.to && c.input == connection.input);
            position.map(|i| self.connections.remove(i))
        };

        self.connections.push(connection);
        Ok(replaced)
    }

    pub fn disconnect(&mut self, connection: &Connection) -> bool {
        let before = self.connections.len();
        self.connections.retain(|c| c != connection);
        self.connections.len() != before
    }

    /// Whether `to` is reachable from `from` along connections
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if seen.insert(id) {
                stack.extend(self.connections.iter().filter(|c| c.from == id).map(|c| c.to));
            }
        }
        false
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Connections feeding `id`, in creation order
    pub fn inputs_of(&self, id: NodeId) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(move |c| c.to == id)
    }

    pub fn outputs_of(&self, id: NodeId) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(move |c| c.from == id)
    }

    /// Distinct direct producers of `id`
    pub fn upstream(&self, id: NodeId) -> BTreeSet<NodeId> {
        self.inputs_of(id).map(|c| c.from).collect()
    }

    /// Every node transitively downstream of `id`, excluding `id` itself
    pub fn descendants(&self, id: NodeId) -> BTreeSet<NodeId> {
        let mut found = BTreeSet::new();
        let mut queue: VecDeque<NodeId> = self.outputs_of(id).map(|c| c.to).collect();
        while let Some(next) = queue.pop_front() {
            if found.insert(next) {
                queue.extend(self.outputs_of(next).map(|c| c.to));
            }
        }
        found
    }

    /// Nodes ordered so that producers come before consumers; ties by id
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut in_degree: BTreeMap<NodeId, usize> =
            self.nodes.keys().map(|&id| (id, 0)).collect();
        for id in self.nodes.keys() {
            for producer in self.upstream(*id) {
                if self.nodes.contains_key(&producer) {
                    *in_degree.entry(*id).or_insert(0) += 1;
                }
            }
        }

        let mut ready: BTreeSet<NodeId> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_first() {
            order.push(id);
            let consumers: BTreeSet<NodeId> = self.outputs_of(id).map(|c| c.to).collect();
            for consumer in consumers {
                if let Some(d) = in_degree.get_mut(&consumer) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(consumer);
                    }
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::socket::Socket;

    fn passthrough() -> Sockets {
        Sockets::new()
            .input(Socket::new("in", "Input", SocketKind::NumericRaster))
            .output(Socket::new("out", "Output", SocketKind::NumericRaster))
    }

    fn variadic() -> Sockets {
        Sockets::new()
            .input(Socket::new("in", "Inputs", SocketKind::NumericRaster).variadic())
            .output(Socket::new("out", "Output", SocketKind::NumericRaster))
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut graph = Graph::new();
        let a = graph.add_node("a", NodeData::new(), passthrough());
        let b = graph.add_node("b", NodeData::new(), passthrough());
        let c = graph.add_node("c", NodeData::new(), passthrough());

        graph.connect(Connection::new(a, "out", b, "in")).unwrap();
        graph.connect(Connection::new(b, "out", c, "in")).unwrap();
        let err = graph.connect(Connection::new(c, "out", a, "in")).unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));

        let self_loop = graph.connect(Connection::new(a, "out", a, "in")).unwrap_err();
        assert!(matches!(self_loop, GraphError::Cycle(_)));
        assert_eq!(graph.connections().len(), 2);
    }

    #[test]
    fn test_single_input_is_replaced() {
        let mut graph = Graph::new();
        let a = graph.add_node("a", NodeData::new(), passthrough());
        let b = graph.add_node("b", NodeData::new(), passthrough());
        let c = graph.add_node("c", NodeData::new(), passthrough());

        graph.connect(Connection::new(a, "out", c, "in")).unwrap();
        let replaced = graph.connect(Connection::new(b, "out", c, "in")).unwrap();
        assert_eq!(replaced, Some(Connection::new(a, "out", c, "in")));
        assert_eq!(graph.upstream(c), BTreeSet::from([b]));
    }

    #[test]
    fn test_variadic_input_keeps_all() {
        let mut graph = Graph::new();
        let a = graph.add_node("a", NodeData::new(), passthrough());
        let b = graph.add_node("b", NodeData::new(), passthrough());
        let sum = graph.add_node("sum", NodeData::new(), variadic());

        graph.connect(Connection::new(a, "out", sum, "in")).unwrap();
        assert_eq!(graph.connect(Connection::new(b, "out", sum, "in")).unwrap(), None);
        let producers: Vec<NodeId> = graph.inputs_of(sum).map(|c| c.from).collect();
        assert_eq!(producers, vec![a, b]);
    }

    #[test]
    fn test_incompatible_kinds_are_rejected() {
        let mut graph = Graph::new();
        let flag = graph.add_node(
            "flag",
            NodeData::new(),
            Sockets::new().output(Socket::new("out", "Out", SocketKind::BooleanRaster)),
        );
        let b = graph.add_node("b", NodeData::new(), passthrough());
        assert_eq!(
            graph.connect(Connection::new(flag, "out", b, "in")),
            Err(GraphError::IncompatibleSockets {
                output: SocketKind::BooleanRaster,
                input: SocketKind::NumericRaster
            })
        );
    }

    #[test]
    fn test_descendants_and_order() {
        let mut graph = Graph::new();
        let a = graph.add_node("a", NodeData::new(), passthrough());
        let b = graph.add_node("b", NodeData::new(), passthrough());
        let c = graph.add_node("c", NodeData::new(), passthrough());
        let sibling = graph.add_node("d", NodeData::new(), passthrough());

        graph.connect(Connection::new(b, "out", c, "in")).unwrap();
        graph.connect(Connection::new(a, "out", b, "in")).unwrap();

        assert_eq!(graph.descendants(a), BTreeSet::from([b, c]));
        assert!(graph.descendants(sibling).is_empty());

        let order = graph.topological_order();
        let pos = |id| order.iter().position(|&n| n == id).unwrap();
        assert!(pos(a) < pos(b) && pos(b) < pos(c));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn test_update_drops_stale_connections() {
        let mut graph = Graph::new();
        let a = graph.add_node("a", NodeData::new(), passthrough());
        let b = graph.add_node("b", NodeData::new(), passthrough());
        graph.connect(Connection::new(a, "out", b, "in")).unwrap();

        let renamed = Sockets::new()
            .input(Socket::new("x", "x", SocketKind::NumericRaster))
            .output(Socket::new("out", "Output", SocketKind::NumericRaster));
        let dropped = graph.update_node(b, NodeData::new(), renamed).unwrap();
        assert_eq!(dropped.len(), 1);
        assert!(graph.connections().is_empty());
    }

    #[test]
    fn test_remove_node_drops_connections() {
        let mut graph = Graph::new();
        let a = graph.add_node("a", NodeData::new(), passthrough());
        let b = graph.add_node("b", NodeData::new(), passthrough());
        graph.connect(Connection::new(a, "out", b, "in")).unwrap();
        graph.remove_node(a).unwrap();
        assert!(graph.connections().is_empty());
        assert_eq!(graph.remove_node(a), Err(GraphError::UnknownNode(a)));
    }
}
