//! Incremental evaluation of a graph.
//!
//! The executor is driven from a single task through `&mut self`. Edits mark
//! the edited node and everything downstream of it `Pending`; [`Executor::schedule`]
//! starts every pending node whose producers have settled, and completions are
//! folded back in with [`Executor::apply`]. Each evaluation carries the
//! generation stamp it was started with, so results that an edit has made
//! stale are recognised and dropped.

use crate::background::WorkerPool;
use crate::components::{Component, ComponentError, ComponentLibrary, ComponentResult, EvalContext, EvalRequest, LayerSink};
use crate::core::config::EngineConfig;
use crate::data::FeatureSource;
use crate::graph::document::{GraphDocument, InputLink, NodeDocument, DOCUMENT_VERSION};
use crate::graph::graph::{Graph, GraphError};
use crate::graph::node::{Connection, Node, NodeData, NodeId};
use crate::graph::socket::Sockets;
use crate::graph::value::{Inputs, LayerRequest, Outputs, Value};
use crate::grid::BooleanTileGrid;
use crossbeam_channel::{unbounded, Receiver, Sender};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Evaluating,
    Ready,
    Errored,
}

impl NodeState {
    pub fn is_settled(&self) -> bool {
        matches!(self, NodeState::Ready | NodeState::Errored)
    }
}

/// Notifications for presentation layers
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Ready(NodeId),
    Errored { node: NodeId, message: String },
    /// A result arrived for an evaluation an edit had already superseded
    Discarded { node: NodeId, generation: u64 },
}

/// A finished evaluation, not yet applied
pub struct Completion {
    pub node: NodeId,
    pub generation: u64,
    revision: u64,
    connected: BTreeSet<String>,
    inputs: Inputs,
    result: ComponentResult<Outputs>,
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("node", &self.node)
            .field("generation", &self.generation)
            .field("ok", &self.result.is_ok())
            .finish()
    }
}

/// What the previous evaluation saw and produced
struct Memo {
    revision: u64,
    connected: BTreeSet<String>,
    inputs: Inputs,
    result: ComponentResult<Outputs>,
}

impl Memo {
    fn matches(&self, revision: u64, connected: &BTreeSet<String>, inputs: &Inputs) -> bool {
        self.revision == revision && &self.connected == connected && same_inputs(&self.inputs, inputs)
    }
}

fn same_inputs(a: &Inputs, b: &Inputs) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|((ka, va), (kb, vb))| {
            ka == kb && va.len() == vb.len() && va.iter().zip(vb).all(|(x, y)| x.same(y))
        })
}

struct NodeRecord {
    state: NodeState,
    generation: u64,
    /// Bumped on every data change
    revision: u64,
    outputs: Outputs,
    error: Option<ComponentError>,
    /// Set when the data record cannot configure the component
    config_error: Option<ComponentError>,
    memo: Option<Memo>,
    /// Outputs the in-flight evaluation was asked to produce
    requested: BTreeSet<String>,
}

impl NodeRecord {
    fn new(config_error: Option<ComponentError>) -> Self {
        Self {
            state: NodeState::Pending,
            generation: 0,
            revision: 0,
            outputs: Outputs::new(),
            error: None,
            config_error,
            memo: None,
            requested: BTreeSet::new(),
        }
    }

    fn settle(&mut self, result: ComponentResult<Outputs>) {
        match result {
            Ok(outputs) => {
                self.state = NodeState::Ready;
                self.outputs = outputs;
                self.error = None;
            }
            Err(err) => {
                self.state = NodeState::Errored;
                self.outputs = Outputs::new();
                self.error = Some(err);
            }
        }
    }

    /// Layer requests among the current outputs
    fn layer_requests(&self) -> Vec<Arc<LayerRequest>> {
        self.outputs.values().filter_map(Value::as_layer).cloned().collect()
    }

    fn event(&self, node: NodeId) -> NodeEvent {
        match &self.error {
            Some(err) if self.state == NodeState::Errored => NodeEvent::Errored {
                node,
                message: err.to_string(),
            },
            _ => NodeEvent::Ready(node),
        }
    }
}

pub struct Executor {
    graph: Graph,
    library: ComponentLibrary,
    records: BTreeMap<NodeId, NodeRecord>,
    context: EvalContext,
    in_flight: FuturesUnordered<BoxFuture<'static, Completion>>,
    subscribers: Vec<Sender<NodeEvent>>,
    next_generation: u64,
}

impl Executor {
    pub fn new(
        config: &EngineConfig,
        features: Arc<dyn FeatureSource>,
        layers: Arc<dyn LayerSink>,
    ) -> crate::Result<Self> {
        let pool = WorkerPool::new(&config.workers)?;
        log::info!(
            "executor started with {} workers at zoom {}",
            pool.worker_count(),
            config.project.zoom
        );
        Ok(Self {
            graph: Graph::new(),
            library: ComponentLibrary::new(config),
            records: BTreeMap::new(),
            context: EvalContext {
                project: config.project,
                mask: None,
                pool: Arc::new(pool),
                features,
                layers,
            },
            in_flight: FuturesUnordered::new(),
            subscribers: Vec::new(),
            next_generation: 1,
        })
    }

    /// Restricts source components to the tiles where `mask` is true
    pub fn with_mask(mut self, mask: BooleanTileGrid) -> Self {
        self.context.mask = Some(Arc::new(mask));
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn library(&self) -> &ComponentLibrary {
        &self.library
    }

    /// Receives every event emitted from now on
    pub fn subscribe(&mut self) -> Receiver<NodeEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: NodeEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn component(&self, tag: &str) -> Result<Arc<dyn Component>, GraphError> {
        self.library
            .get(tag)
            .cloned()
            .ok_or_else(|| GraphError::UnknownComponent(tag.to_string()))
    }

    /// Sockets for `data`, or the configuration error that stops the node
    fn configure(component: &dyn Component, data: &NodeData) -> (Option<Sockets>, Option<ComponentError>) {
        match component.sockets(data) {
            Ok(sockets) => (Some(sockets), None),
            Err(err) => (None, Some(err)),
        }
    }

    pub fn add_node(&mut self, component: &str, data: NodeData) -> Result<NodeId, GraphError> {
        let instance = self.component(component)?;
        let (sockets, config_error) = Self::configure(instance.as_ref(), &data);
        let id = self.graph.add_node(component, data, sockets.unwrap_or_default());
        self.records.insert(id, NodeRecord::new(config_error));
        log::debug!("added {} node {}", component, id);
        Ok(id)
    }

    pub fn remove_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        let downstream = self.graph.descendants(id);
        self.graph.remove_node(id)?;
        self.records.remove(&id);
        self.context.layers.withdraw(id);
        for node in downstream {
            self.mark_pending(node);
        }
        Ok(())
    }

    /// Replaces a node's data record.
    ///
    /// Returns the connections dropped because the new sockets no longer
    /// accept them. A configuration error keeps the previous sockets.
    pub fn set_data(&mut self, id: NodeId, data: NodeData) -> Result<Vec<Connection>, GraphError> {
        let node = self.graph.node(id).ok_or(GraphError::UnknownNode(id))?;
        let instance = self.component(&node.component)?;
        let previous = node.sockets.clone();

        let (sockets, config_error) = Self::configure(instance.as_ref(), &data);
        let dropped = self.graph.update_node(id, data, sockets.unwrap_or(previous))?;

        if let Some(record) = self.records.get_mut(&id) {
            record.revision += 1;
            record.config_error = config_error;
        }
        self.invalidate(id);
        for connection in &dropped {
            self.invalidate(connection.to);
        }
        Ok(dropped)
    }

    pub fn connect(&mut self, connection: Connection) -> Result<(), GraphError> {
        let replaced = self.graph.connect(connection.clone())?;
        if let Some(replaced) = replaced {
            log::debug!("{} replaced {}", connection, replaced);
        }

        // Producers only compute the outputs connected when they started
        let producer_lacks_output = self.records.get(&connection.from).map_or(false, |r| match r.state {
            NodeState::Ready => !r.outputs.contains_key(&connection.output),
            NodeState::Evaluating => !r.requested.contains(&connection.output),
            NodeState::Pending | NodeState::Errored => false,
        });
        if producer_lacks_output {
            self.invalidate(connection.from);
        }
        self.invalidate(connection.to);
        Ok(())
    }

    pub fn disconnect(&mut self, connection: &Connection) -> bool {
        let removed = self.graph.disconnect(connection);
        if removed {
            self.invalidate(connection.to);
        }
        removed
    }

    fn mark_pending(&mut self, id: NodeId) {
        if let Some(record) = self.records.get_mut(&id) {
            record.state = NodeState::Pending;
        }
    }

    /// Marks `id` and its transitive downstream pending
    fn invalidate(&mut self, id: NodeId) {
        self.mark_pending(id);
        for node in self.graph.descendants(id) {
            self.mark_pending(node);
        }
    }

    pub fn state(&self, id: NodeId) -> Option<NodeState> {
        self.records.get(&id).map(|r| r.state)
    }

    /// Outputs of a `Ready` node
    pub fn outputs(&self, id: NodeId) -> Option<&Outputs> {
        self.records
            .get(&id)
            .filter(|r| r.state == NodeState::Ready)
            .map(|r| &r.outputs)
    }

    pub fn output(&self, id: NodeId, socket: &str) -> Option<&Value> {
        self.outputs(id)?.get(socket)
    }

    /// Error of an `Errored` node
    pub fn error(&self, id: NodeId) -> Option<&ComponentError> {
        self.records
            .get(&id)
            .filter(|r| r.state == NodeState::Errored)
            .and_then(|r| r.error.as_ref())
    }

    /// Number of evaluations started but not yet applied
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether every node has settled
    pub fn is_settled(&self) -> bool {
        self.records.values().all(|r| r.state.is_settled())
    }

    fn gather_inputs(&self, id: NodeId) -> Inputs {
        let mut inputs = Inputs::new();
        for connection in self.graph.inputs_of(id) {
            let value = self
                .records
                .get(&connection.from)
                .filter(|r| r.state == NodeState::Ready)
                .and_then(|r| r.outputs.get(&connection.output));
            if let Some(value) = value {
                inputs
                    .entry(connection.input.clone())
                    .or_default()
                    .push(value.clone());
            }
        }
        inputs
    }

    fn upstream_settled(&self, id: NodeId) -> bool {
        self.graph
            .upstream(id)
            .iter()
            .all(|p| self.records.get(p).map_or(true, |r| r.state.is_settled()))
    }

    /// Starts every pending node whose producers have settled.
    ///
    /// Nodes that can settle without evaluating (configuration errors and
    /// memo hits) settle immediately, which may unblock nodes later in the
    /// same pass. Returns the number of evaluations started.
    pub fn schedule(&mut self) -> usize {
        let mut started = 0;

        for id in self.graph.topological_order() {
            let pending = self.records.get(&id).map_or(false, |r| r.state == NodeState::Pending);
            if !pending || !self.upstream_settled(id) {
                continue;
            }
            let Some((tag, data)) = self.graph.node(id).map(|n| (n.component.clone(), n.data.clone())) else {
                continue;
            };

            let config_error = self.records.get(&id).and_then(|r| r.config_error.clone());
            if let Some(err) = config_error {
                if let Some(record) = self.records.get_mut(&id) {
                    record.settle(Err(err));
                }
                self.settled(id);
                continue;
            }

            let inputs = self.gather_inputs(id);
            let connected: BTreeSet<String> =
                self.graph.outputs_of(id).map(|c| c.output.clone()).collect();

            let Some(record) = self.records.get_mut(&id) else {
                continue;
            };
            if let Some(memo) = record.memo.as_ref().filter(|m| m.matches(record.revision, &connected, &inputs)) {
                log::debug!("memo hit for {} node {}", tag, id);
                let result = memo.result.clone();
                record.settle(result);
                self.settled(id);
                continue;
            }

            let component = match self.library.get(&tag) {
                Some(component) => component.clone(),
                None => continue,
            };
            let generation = self.next_generation;
            self.next_generation += 1;
            record.state = NodeState::Evaluating;
            record.generation = generation;
            record.requested = connected.clone();
            let revision = record.revision;

            let request = EvalRequest {
                node: id,
                data,
                inputs: inputs.clone(),
                connected_outputs: connected.clone(),
            };
            let ctx = self.context.clone();
            log::debug!("evaluating {} node {} (generation {})", tag, id, generation);

            self.in_flight.push(
                async move {
                    let result = component.evaluate(request, &ctx).await;
                    Completion {
                        node: id,
                        generation,
                        revision,
                        connected,
                        inputs,
                        result,
                    }
                }
                .boxed(),
            );
            started += 1;
        }
        started
    }

    /// Hands accepted layer requests to the sink; an errored node's layer is withdrawn
    fn publish_layers(&self, id: NodeId) {
        let Some(record) = self.records.get(&id) else {
            return;
        };
        match record.state {
            NodeState::Ready => {
                for layer in record.layer_requests() {
                    self.context.layers.publish(id, &layer.name, layer.grid.clone());
                }
            }
            NodeState::Errored => self.context.layers.withdraw(id),
            NodeState::Pending | NodeState::Evaluating => {}
        }
    }

    /// Follow-up for a node that settled without evaluating
    fn settled(&mut self, id: NodeId) {
        self.publish_layers(id);
        if let Some(event) = self.records.get(&id).map(|r| r.event(id)) {
            if let NodeEvent::Errored { message, .. } = &event {
                log::debug!("node {} errored: {}", id, message);
            }
            self.emit(event);
        }
    }

    /// Waits for the next in-flight evaluation; `None` when nothing is running
    pub async fn next_completion(&mut self) -> Option<Completion> {
        self.in_flight.next().await
    }

    /// Folds a completion into the node's state.
    ///
    /// A completion whose node was removed, is no longer evaluating, or has
    /// since been restarted under a newer generation is discarded.
    pub fn apply(&mut self, completion: Completion) -> NodeEvent {
        let id = completion.node;
        let current = self
            .records
            .get_mut(&id)
            .filter(|r| r.state == NodeState::Evaluating && r.generation == completion.generation);

        let Some(record) = current else {
            log::warn!(
                "discarding stale result for node {} (generation {})",
                id,
                completion.generation
            );
            let event = NodeEvent::Discarded {
                node: id,
                generation: completion.generation,
            };
            self.emit(event.clone());
            return event;
        };

        record.memo = Some(Memo {
            revision: completion.revision,
            connected: completion.connected,
            inputs: completion.inputs,
            result: completion.result.clone(),
        });
        record.settle(completion.result);
        let event = record.event(id);
        self.publish_layers(id);
        if let NodeEvent::Errored { message, .. } = &event {
            log::warn!("node {} failed: {}", id, message);
        }
        self.emit(event.clone());
        event
    }

    /// Schedules and applies until nothing is pending or running
    pub async fn process(&mut self) {
        loop {
            self.schedule();
            match self.next_completion().await {
                Some(completion) => {
                    self.apply(completion);
                }
                None => break,
            }
        }
    }

    /// Replaces the whole graph with a document's nodes and connections.
    ///
    /// On error the current graph is left untouched.
    pub fn load_document(&mut self, document: &GraphDocument) -> crate::Result<()> {
        if document.version > DOCUMENT_VERSION {
            return Err(GraphError::UnsupportedVersion(document.version).into());
        }

        let mut graph = Graph::new();
        let mut records = BTreeMap::new();
        for node in document.nodes.values() {
            let instance = self.component(&node.component)?;
            let (sockets, config_error) = Self::configure(instance.as_ref(), &node.data);
            graph.insert_node(Node::new(
                node.id,
                node.component.clone(),
                node.data.clone(),
                sockets.unwrap_or_default(),
            ))?;
            records.insert(node.id, NodeRecord::new(config_error));
        }
        for connection in document.connections() {
            graph.connect(connection)?;
        }

        for id in self.graph.node_ids() {
            self.context.layers.withdraw(id);
        }
        log::info!(
            "loaded document with {} nodes and {} connections",
            graph.len(),
            graph.connections().len()
        );
        self.graph = graph;
        self.records = records;
        Ok(())
    }

    pub fn to_document(&self) -> GraphDocument {
        let nodes = self
            .graph
            .nodes()
            .map(|node| {
                let mut inputs: BTreeMap<String, Vec<InputLink>> = BTreeMap::new();
                for connection in self.graph.inputs_of(node.id) {
                    inputs.entry(connection.input.clone()).or_default().push(InputLink {
                        node: connection.from,
                        output: connection.output.clone(),
                    });
                }
                let document = NodeDocument {
                    id: node.id,
                    component: node.component.clone(),
                    data: node.data.clone(),
                    inputs,
                };
                (node.id, document)
            })
            .collect();
        GraphDocument {
            version: DOCUMENT_VERSION,
            nodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::LayerStore;
    use crate::data::MemoryFeatureSource;
    use serde_json::json;

    fn executor() -> Executor {
        let config = EngineConfig::default().with_workers(1);
        Executor::new(
            &config,
            Arc::new(MemoryFeatureSource::new()),
            Arc::new(LayerStore::new()),
        )
        .unwrap()
    }

    fn constant(value: &str) -> NodeData {
        let mut data = NodeData::new();
        data.insert("value".to_string(), json!(value));
        data
    }

    #[tokio::test]
    async fn test_numbers_flow_through_arithmetic() {
        let mut exec = executor();
        let a = exec.add_node("Numeric constant", constant("2")).unwrap();
        let b = exec.add_node("Numeric constant", constant("3")).unwrap();
        let sum = exec.add_node("Multiply", NodeData::new()).unwrap();
        exec.connect(Connection::new(a, "out", sum, "a")).unwrap();
        exec.connect(Connection::new(b, "out", sum, "b")).unwrap();

        exec.process().await;
        assert_eq!(exec.output(sum, "out").and_then(Value::as_number), Some(6.0));
        assert!(exec.is_settled());
    }

    #[tokio::test]
    async fn test_config_error_settles_without_evaluating() {
        let mut exec = executor();
        let events = exec.subscribe();
        let id = exec.add_node("Numeric constant", constant("two")).unwrap();

        assert_eq!(exec.schedule(), 0);
        assert_eq!(exec.state(id), Some(NodeState::Errored));
        assert!(matches!(exec.error(id), Some(ComponentError::Config(_))));
        assert!(matches!(events.try_recv(), Ok(NodeEvent::Errored { .. })));
    }

    #[tokio::test]
    async fn test_memo_hit_reuses_outputs() {
        let mut exec = executor();
        let a = exec.add_node("Numeric constant", constant("4")).unwrap();
        let neg = exec.add_node("Negate", NodeData::new()).unwrap();
        exec.connect(Connection::new(a, "out", neg, "in")).unwrap();
        exec.process().await;

        // Same number bits after an edit: the consumer settles from its memo
        exec.set_data(a, constant("4.0")).unwrap();
        assert_eq!(exec.state(neg), Some(NodeState::Pending));
        exec.process().await;
        assert_eq!(exec.output(neg, "out").and_then(Value::as_number), Some(-4.0));
    }

    #[tokio::test]
    async fn test_stale_completion_is_discarded() {
        let mut exec = executor();
        let events = exec.subscribe();
        let id = exec.add_node("Numeric constant", constant("1")).unwrap();

        assert_eq!(exec.schedule(), 1);
        exec.set_data(id, constant("2")).unwrap();
        assert_eq!(exec.schedule(), 1);

        let first = exec.next_completion().await.unwrap();
        let second = exec.next_completion().await.unwrap();
        let (old, new) = if first.generation < second.generation {
            (first, second)
        } else {
            (second, first)
        };

        assert_eq!(exec.apply(new), NodeEvent::Ready(id));
        assert!(matches!(exec.apply(old), NodeEvent::Discarded { node, .. } if node == id));
        assert_eq!(exec.output(id, "out").and_then(Value::as_number), Some(2.0));

        let received: Vec<NodeEvent> = events.try_iter().collect();
        assert_eq!(received.len(), 2);
    }

    #[test]
    fn test_unknown_component() {
        let mut exec = executor();
        assert_eq!(
            exec.add_node("Teleport", NodeData::new()),
            Err(GraphError::UnknownComponent("Teleport".to_string()))
        );
    }
}
