//! Graph document: the form exchanged with the persistence collaborator.
//!
//! ```json
//! { "id": "...",
//!   "nodes": [ { "id": "...", "type": "...", "metadata": { "view": {...} } } ],
//!   "connections": [ { "from": {"node": "...", "endpoint": "..."},
//!                      "to":   {"node": "...", "endpoint": "..."} } ] }
//! ```
//!
//! `nodes` may also arrive as an object keyed by node id, in which case the
//! key supplies a missing `id`. Documents are always written in array form.

use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use serde_json::Value;

use crate::graph::{Connection, Metadata};

/// Serialized graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    /// Graph id (also the network name)
    pub id: String,
    /// Nodes
    #[serde(default, deserialize_with = "deserialize_nodes")]
    pub nodes: Vec<NodeDocument>,
    /// Connections
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// Serialized node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    /// Node id
    #[serde(default)]
    pub id: String,
    /// Component type name
    #[serde(rename = "type")]
    pub component_type: String,
    /// Opaque metadata, carried through unchanged
    #[serde(default)]
    pub metadata: Metadata,
}

impl GraphDocument {
    /// Document with only an id.
    pub fn empty(id: impl Into<String>) -> Self {
        Self { id: id.into(), nodes: Vec::new(), connections: Vec::new() }
    }

    /// Parse from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Render as pretty JSON text.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NodesForm {
    List(Vec<NodeDocument>),
    Keyed(serde_json::Map<String, Value>),
}

fn deserialize_nodes<'de, D>(deserializer: D) -> Result<Vec<NodeDocument>, D::Error>
where
    D: Deserializer<'de>,
{
    match NodesForm::deserialize(deserializer)? {
        NodesForm::List(nodes) => Ok(nodes),
        NodesForm::Keyed(map) => map
            .into_iter()
            .map(|(key, value)| {
                let mut node: NodeDocument = serde_json::from_value(value)
                    .map_err(|e| D::Error::custom(format!("node '{key}': {e}")))?;
                if node.id.is_empty() {
                    node.id = key;
                }
                Ok(node)
            })
            .collect(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_array_form() {
        let doc = GraphDocument::from_json(
            r#"{
                "id": "demo",
                "nodes": [
                    { "id": "term", "type": "APDUSender",
                      "metadata": { "view": { "x": 10, "y": 20, "width": 120, "height": 60 } } }
                ],
                "connections": []
            }"#,
        )
        .unwrap();

        assert_eq!(doc.id, "demo");
        assert_eq!(doc.nodes[0].component_type, "APDUSender");
        assert_eq!(doc.nodes[0].metadata["view"]["width"], 120);
    }

    #[test]
    fn parses_keyed_form() {
        let doc = GraphDocument::from_json(
            r#"{ "id": "demo",
                 "nodes": { "card": { "type": "EMVCardSimulator" },
                            "term": { "type": "APDUSender" } } }"#,
        )
        .unwrap();

        let ids: Vec<&str> = doc.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["card", "term"]);
        assert!(doc.connections.is_empty());
    }

    #[test]
    fn id_only_document_is_valid() {
        let doc = GraphDocument::from_json(r#"{ "id": "blank" }"#).unwrap();
        assert_eq!(doc, GraphDocument::empty("blank"));
    }

    #[test]
    fn missing_type_is_an_error() {
        assert!(GraphDocument::from_json(r#"{ "id": "x", "nodes": [ { "id": "n" } ] }"#).is_err());
    }

    #[test]
    fn metadata_text_survives_round_trip() {
        let text = concat!(
            r#"{"id":"g","nodes":[{"id":"n","type":"T","metadata":"#,
            r#"{"view":{"x":1.5,"y":2,"width":3,"height":4},"zeta":true,"alpha":[1,2]}}],"#,
            r#""connections":[]}"#,
        );
        let doc = GraphDocument::from_json(text).unwrap();
        assert_eq!(serde_json::to_string(&doc).unwrap(), text);
    }
}
