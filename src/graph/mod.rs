//! The dataflow graph: structure, serialized documents and evaluation.

pub mod document;
pub mod executor;
#[allow(clippy::module_inception)]
pub mod graph;
pub mod node;
pub mod socket;
pub mod value;

pub use document::{GraphDocument, InputLink, NodeDocument, DOCUMENT_VERSION};
pub use executor::{Completion, Executor, NodeEvent, NodeState};
pub use graph::{Graph, GraphError};
pub use node::{Connection, Node, NodeData, NodeId};
pub use socket::{Socket, SocketKind, Sockets};
pub use value::{ChartBar, ChartData, Inputs, LayerRequest, Outputs, PropertyValue, Value};
