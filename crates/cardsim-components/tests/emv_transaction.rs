//! Terminal ↔ card transactions over a running network.

use std::{sync::Arc, time::Duration};

use cardsim_components::{ApduSender, ByteArrayViewer, default_factory, types};
use cardsim_core::{
    Connection, DiagnosticsSnapshot, EndpointRef, Graph, Metadata, Network, Node, SlotState,
};
use proptest::prelude::*;
use serde_json::json;

fn settings(value: serde_json::Value) -> Metadata {
    json!({ "config": value }).as_object().cloned().unwrap()
}

fn wire(from: (&str, &str), to: (&str, &str)) -> Connection {
    Connection::new(EndpointRef::new(from.0, from.1), EndpointRef::new(to.0, to.1))
}

fn network(terminal_pin: &str, card_pin: &str) -> Network {
    let mut graph = Graph::new("emv");
    let term = Node::new("term", types::APDU_SENDER);
    graph.add_node(term.with_metadata(settings(json!({ "pin": terminal_pin })))).unwrap();
    let card = Node::new("card", types::EMV_CARD_SIMULATOR);
    graph.add_node(card.with_metadata(settings(json!({ "pin": card_pin })))).unwrap();
    graph.connect(wire(("term", "toCard"), ("card", "iso7816"))).unwrap();
    Network::new(graph, Arc::new(default_factory().unwrap()))
}

fn terminal<'a>(network: &'a Network, node: &str) -> &'a ApduSender {
    network.component(node).unwrap().as_any().downcast_ref::<ApduSender>().unwrap()
}

async fn finish(network: &Network) -> DiagnosticsSnapshot {
    tokio::time::timeout(Duration::from_secs(5), async {
        while terminal(network, "term").is_busy() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    network.diagnostics("term").unwrap()
}

#[tokio::test]
async fn test_transaction_completes_against_simulated_card() {
    let mut network = network("1234", "1234");
    network.start().unwrap();
    let diagnostics = finish(&network).await;

    assert_eq!(diagnostics.completed, 1);
    assert_eq!(diagnostics.error_count, 0, "{diagnostics:?}");
    assert_eq!(
        diagnostics.transcript[..5],
        [
            "ATR 3B021450",
            ">> SELECT FILE (AID): 00A4040007F0000017113112",
            "<< 6F0B8407F0000017113112A5009000",
            ">> GET PROCESSING OPTIONS: 80A80000028300",
            "<< 770A820219809404080101009000",
        ]
    );
    assert!(diagnostics.transcript.contains(&"<< 9F1701039000".to_string()));
    assert!(diagnostics.transcript.last().unwrap().ends_with("9000"));

    let card = network.diagnostics("card").unwrap();
    assert_eq!(card.transcript.first().map(String::as_str), Some("ATR 3B021450"));

    network.stop();
}

#[tokio::test]
async fn wrong_pin_counts_exactly_one_error_and_transaction_continues() {
    let mut network = network("0000", "1234");
    network.start().unwrap();
    let diagnostics = finish(&network).await;

    assert_eq!(diagnostics.error_count, 1);
    assert_eq!(diagnostics.last_error.as_deref(), Some("Incorrect PIN."));
    assert!(diagnostics.transcript.contains(&"<< 63C2".to_string()));
    let ptc = "<< 9F1701029000".to_string();
    assert!(diagnostics.transcript.contains(&ptc), "PTC reflects the failed try");
    assert_eq!(diagnostics.completed, 1);

    network.stop();
}

#[tokio::test]
async fn trigger_reruns_and_restart_starts_clean() {
    let mut network = network("0000", "1234");
    network.start().unwrap();
    finish(&network).await;

    let sender = network.component_mut("term").unwrap().as_any_mut();
    let sender = sender.downcast_mut::<ApduSender>().unwrap();
    sender.trigger().unwrap();
    let diagnostics = finish(&network).await;
    assert_eq!(diagnostics.completed, 2);
    assert_eq!(diagnostics.error_count, 2, "second wrong PIN");

    network.stop();
    assert!(network.diagnostics("term").is_none(), "instances are dropped on stop");

    network.start().unwrap();
    let diagnostics = finish(&network).await;
    assert_eq!(diagnostics.completed, 1);
    assert_eq!(diagnostics.error_count, 1, "fresh card, fresh counters");
    network.stop();
}

#[tokio::test]
async fn stop_abandons_outstanding_exchange() {
    // A viewer never answers, so power-on stays outstanding.
    let mut graph = Graph::new("silent");
    graph.add_node(Node::new("term", types::APDU_SENDER)).unwrap();
    graph.add_node(Node::new("void", types::BYTE_ARRAY_VIEWER)).unwrap();
    graph.connect(wire(("term", "toCard"), ("void", "in"))).unwrap();
    let mut network = Network::new(graph, Arc::new(default_factory().unwrap()));
    network.start().unwrap();

    let slot = terminal(&network, "term").card_slot().unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while slot.state() != SlotState::AwaitingResponse {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let viewer = network.component("void").unwrap().as_any();
            let viewer = viewer.downcast_ref::<ByteArrayViewer>().unwrap();
            if !viewer.received().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(terminal(&network, "term").is_busy());

    network.stop();
    tokio::task::yield_now().await;
    assert_eq!(slot.state(), SlotState::PoweredOff);
}

#[tokio::test]
async fn entry_bytes_reach_viewer() {
    let mut graph = Graph::new("bytes");
    let entry = Node::new("entry", types::BYTE_ARRAY_ENTRY);
    graph.add_node(entry.with_metadata(settings(json!({ "data": "DEADBEEF" })))).unwrap();
    graph.add_node(Node::new("viewer", types::BYTE_ARRAY_VIEWER)).unwrap();
    graph.connect(wire(("entry", "out"), ("viewer", "in"))).unwrap();
    let mut network = Network::new(graph, Arc::new(default_factory().unwrap()));
    network.start().unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while network.diagnostics("viewer").unwrap().transcript.is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    assert_eq!(network.diagnostics("viewer").unwrap().transcript, vec!["<< DEADBEEF".to_string()]);
    assert_eq!(network.diagnostics("entry").unwrap().transcript, vec![">> DEADBEEF".to_string()]);
    network.stop();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn pin_mismatch_is_the_only_error(terminal_pin in "[0-9]{4}", card_pin in "[0-9]{4}") {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let diagnostics = runtime.block_on(async {
            let mut network = network(&terminal_pin, &card_pin);
            network.start().unwrap();
            let diagnostics = finish(&network).await;
            network.stop();
            diagnostics
        });

        prop_assert_eq!(diagnostics.completed, 1);
        prop_assert_eq!(diagnostics.error_count, u32::from(terminal_pin != card_pin));
        prop_assert!(diagnostics.transcript.iter().any(|line| line.starts_with("<< 6F0B")));
    }
}
