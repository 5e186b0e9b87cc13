//! Graph document properties: save/load preserves ids, topology and view
//! metadata.

use cardsim_core::{
    Connection, EndpointRef, Graph, GraphDocument, Metadata, Node, ViewMetadata, graph::VIEW_KEY,
};
use proptest::prelude::*;
use serde_json::json;

fn arb_view() -> impl Strategy<Value = ViewMetadata> {
    (-1.0e6..1.0e6f64, -1.0e6..1.0e6f64, 0.0..1.0e4f64, 0.0..1.0e4f64)
        .prop_map(|(x, y, width, height)| ViewMetadata { x, y, width, height })
}

fn arb_graph() -> impl Strategy<Value = Graph> {
    (
        prop::collection::vec((arb_view(), "[A-Za-z]{1,12}", any::<bool>()), 1..8),
        prop::collection::vec((any::<prop::sample::Index>(), any::<prop::sample::Index>()), 0..12),
    )
        .prop_map(|(nodes, edges)| {
            let mut graph = Graph::new("prop");
            for (i, (view, kind, extra)) in nodes.iter().enumerate() {
                let mut node = Node::new(format!("n{i}"), kind.clone());
                node.set_view(*view);
                if *extra {
                    let label = json!({ "text": kind, "tags": [1, 2, 3] });
                    node.metadata.insert("label".into(), label);
                }
                graph.add_node(node).unwrap();
            }
            for (a, b) in edges {
                let from = a.index(nodes.len());
                let to = b.index(nodes.len());
                let connection = Connection::new(
                    EndpointRef::new(format!("n{from}"), "out"),
                    EndpointRef::new(format!("n{to}"), "in"),
                );
                // Self-loops and duplicates are rejected; skip them.
                let _ = graph.connect(connection);
            }
            graph
        })
}

fn save_then_load(graph: &Graph) -> Graph {
    let text = graph.to_document().to_json_pretty().unwrap();
    Graph::from_document(GraphDocument::from_json(&text).unwrap()).unwrap()
}

proptest! {
    #[test]
    fn load_save_round_trip(graph in arb_graph()) {
        let loaded = save_then_load(&graph);

        prop_assert_eq!(loaded.id(), graph.id());
        prop_assert_eq!(loaded.connections(), graph.connections());
        prop_assert_eq!(loaded.nodes().len(), graph.nodes().len());
        for (a, b) in loaded.nodes().iter().zip(graph.nodes()) {
            prop_assert_eq!(&a.id, &b.id);
            prop_assert_eq!(&a.component_type, &b.component_type);
            prop_assert_eq!(a.view(), b.view());
            prop_assert_eq!(&a.metadata, &b.metadata);
        }
    }

    #[test]
    fn document_text_is_stable(graph in arb_graph()) {
        let once = graph.to_document().to_json_pretty().unwrap();
        let twice = save_then_load(&graph).to_document().to_json_pretty().unwrap();
        prop_assert_eq!(once, twice);
    }
}

#[test]
fn unknown_metadata_is_carried_through() {
    let mut metadata = Metadata::new();
    metadata.insert(VIEW_KEY.into(), json!({ "x": 1, "y": 2, "width": 3, "height": 4, "z": 9 }));
    metadata.insert("config".into(), json!({ "pin": "1234" }));
    metadata.insert("notes".into(), json!(null));

    let mut graph = Graph::new("g");
    graph.add_node(Node::new("n", "T").with_metadata(metadata.clone())).unwrap();

    let loaded = save_then_load(&graph);
    assert_eq!(loaded.node("n").unwrap().metadata, metadata);
    assert_eq!(
        loaded.node("n").unwrap().view(),
        Some(ViewMetadata { x: 1.0, y: 2.0, width: 3.0, height: 4.0 })
    );
}

#[test]
fn invalid_documents_are_rejected() {
    let duplicate = r#"{ "id": "g",
        "nodes": [ { "id": "a", "type": "T" }, { "id": "a", "type": "T" } ] }"#;
    assert!(Graph::from_document(GraphDocument::from_json(duplicate).unwrap()).is_err());

    let dangling = r#"{ "id": "g", "nodes": [ { "id": "a", "type": "T" } ],
        "connections": [
            { "from": { "node": "a", "endpoint": "x" }, "to": { "node": "b", "endpoint": "y" } }
        ] }"#;
    assert!(Graph::from_document(GraphDocument::from_json(dangling).unwrap()).is_err());
}
