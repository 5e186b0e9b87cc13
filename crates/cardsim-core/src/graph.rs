//! Structural graph of nodes and endpoint connections.
//!
//! The graph knows node ids and which endpoint names are connected. It does
//! not know which endpoints a component actually exposes or their
//! directions; the network checks those when it wires instances.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::document::{GraphDocument, NodeDocument};

/// Free-form node metadata. Opaque to the engine apart from `view` and
/// `config`.
pub type Metadata = serde_json::Map<String, Value>;

/// Metadata key holding view placement.
pub const VIEW_KEY: &str = "view";

/// Graph construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Node id already present.
    #[error("duplicate node id '{id}'")]
    DuplicateNode {
        /// Node id
        id: String,
    },

    /// Node id not present.
    #[error("node '{id}' not found")]
    NodeNotFound {
        /// Node id
        id: String,
    },

    /// Connection from a node to itself.
    #[error("connection from node '{node}' to itself")]
    SelfLoop {
        /// Node id
        node: String,
    },

    /// The same pair of endpoints is already connected.
    #[error("connection {from} -> {to} already exists")]
    DuplicateConnection {
        /// Source endpoint
        from: EndpointRef,
        /// Target endpoint
        to: EndpointRef,
    },

    /// No such connection.
    #[error("connection {from} -> {to} not found")]
    ConnectionNotFound {
        /// Source endpoint
        from: EndpointRef,
        /// Target endpoint
        to: EndpointRef,
    },
}

/// Node placement in the editor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewMetadata {
    /// Left edge
    pub x: f64,
    /// Top edge
    pub y: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

/// A node: one component instance in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Unique id within the graph
    pub id: String,
    /// Registered component type name
    pub component_type: String,
    /// Opaque metadata
    pub metadata: Metadata,
}

impl Node {
    /// Node with empty metadata.
    pub fn new(id: impl Into<String>, component_type: impl Into<String>) -> Self {
        Self { id: id.into(), component_type: component_type.into(), metadata: Metadata::new() }
    }

    /// Replace the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// View placement, if present and well-formed.
    pub fn view(&self) -> Option<ViewMetadata> {
        serde_json::from_value(self.metadata.get(VIEW_KEY)?.clone()).ok()
    }

    /// Set view placement, replacing any previous `view` entry.
    pub fn set_view(&mut self, view: ViewMetadata) {
        let value = serde_json::json!({
            "x": view.x,
            "y": view.y,
            "width": view.width,
            "height": view.height,
        });
        self.metadata.insert(VIEW_KEY.to_string(), value);
    }
}

/// Reference to one endpoint of one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointRef {
    /// Node id
    pub node: String,
    /// Endpoint name on that node's component
    pub endpoint: String,
}

impl EndpointRef {
    /// Reference `endpoint` on `node`.
    pub fn new(node: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self { node: node.into(), endpoint: endpoint.into() }
    }
}

impl fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.endpoint)
    }
}

/// Connection between two endpoints on different nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    /// Source endpoint
    pub from: EndpointRef,
    /// Target endpoint
    pub to: EndpointRef,
}

impl Connection {
    /// Connection `from` -> `to`.
    pub fn new(from: EndpointRef, to: EndpointRef) -> Self {
        Self { from, to }
    }

    /// Whether either side belongs to `node`.
    pub fn touches(&self, node: &str) -> bool {
        self.from.node == node || self.to.node == node
    }

    /// Whether this and `other` join the same endpoint pair, in either order.
    pub fn same_pair(&self, other: &Self) -> bool {
        (self.from == other.from && self.to == other.to)
            || (self.from == other.to && self.to == other.from)
    }
}

/// Nodes plus connections.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Graph {
    id: String,
    nodes: Vec<Node>,
    connections: Vec<Connection>,
}

impl Graph {
    /// Empty graph.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), nodes: Vec::new(), connections: Vec::new() }
    }

    /// Graph id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Connections in insertion order.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Whether a node with `id` exists.
    pub fn contains_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// Connections touching `node`.
    pub fn connections_of<'a>(
        &'a self,
        node: &'a str,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.touches(node))
    }

    /// Add a node.
    ///
    /// # Errors
    ///
    /// `DuplicateNode` if the id is taken; the graph is unchanged.
    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.contains_node(&node.id) {
            return Err(GraphError::DuplicateNode { id: node.id });
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Remove a node and every connection referencing it.
    pub fn remove_node(&mut self, id: &str) -> Result<Node, GraphError> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| GraphError::NodeNotFound { id: id.to_string() })?;

        self.connections.retain(|c| !c.touches(id));
        Ok(self.nodes.remove(index))
    }

    /// Replace a node's metadata wholesale.
    pub fn set_metadata(&mut self, id: &str, metadata: Metadata) -> Result<(), GraphError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| GraphError::NodeNotFound { id: id.to_string() })?;
        node.metadata = metadata;
        Ok(())
    }

    /// Add a connection between endpoints on two existing, distinct nodes.
    pub fn connect(&mut self, connection: Connection) -> Result<(), GraphError> {
        self.check_connection(&connection)?;
        self.connections.push(connection);
        Ok(())
    }

    /// Validate `connection` against the current nodes and connections
    /// without adding it.
    pub fn check_connection(&self, connection: &Connection) -> Result<(), GraphError> {
        for end in [&connection.from, &connection.to] {
            if !self.contains_node(&end.node) {
                return Err(GraphError::NodeNotFound { id: end.node.clone() });
            }
        }
        if connection.from.node == connection.to.node {
            return Err(GraphError::SelfLoop { node: connection.from.node.clone() });
        }
        if self.connections.iter().any(|c| c.same_pair(connection)) {
            return Err(GraphError::DuplicateConnection {
                from: connection.from.clone(),
                to: connection.to.clone(),
            });
        }
        Ok(())
    }

    /// Remove a connection (matched in either orientation).
    pub fn disconnect(&mut self, connection: &Connection) -> Result<Connection, GraphError> {
        let index = self.connections.iter().position(|c| c.same_pair(connection)).ok_or_else(|| {
            GraphError::ConnectionNotFound {
                from: connection.from.clone(),
                to: connection.to.clone(),
            }
        })?;
        Ok(self.connections.remove(index))
    }

    /// Build a graph from its document form, validating ids and connections.
    pub fn from_document(document: GraphDocument) -> Result<Self, GraphError> {
        let mut graph = Self::new(document.id);
        for node in document.nodes {
            graph.add_node(Node {
                id: node.id,
                component_type: node.component_type,
                metadata: node.metadata,
            })?;
        }
        for connection in document.connections {
            graph.connect(connection)?;
        }
        Ok(graph)
    }

    /// Document form of this graph.
    pub fn to_document(&self) -> GraphDocument {
        GraphDocument {
            id: self.id.clone(),
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeDocument {
                    id: n.id.clone(),
                    component_type: n.component_type.clone(),
                    metadata: n.metadata.clone(),
                })
                .collect(),
            connections: self.connections.clone(),
        }
    }
}
