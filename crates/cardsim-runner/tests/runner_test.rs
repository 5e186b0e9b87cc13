//! Runner tests

use std::path::PathBuf;

use cardsim_core::{FsGraphStore, GraphStore};
use cardsim_runner::{GraphSource, RunnerConfig, RunnerError, demo_graph, load_graph, run};

fn file_config(path: PathBuf) -> RunnerConfig {
    RunnerConfig { source: GraphSource::File(path), ..RunnerConfig::default() }
}

#[tokio::test]
async fn demo_run_completes_without_errors() {
    let report = run(RunnerConfig::default()).await.unwrap();

    assert_eq!(report.graph, "demo");
    assert!(!report.timed_out);
    assert_eq!(report.error_count(), 0);

    let (_, terminal) = report.diagnostics.iter().find(|(node, _)| node == "terminal").unwrap();
    assert_eq!(terminal.completed, 1);
    assert!(terminal.transcript.iter().any(|line| line.starts_with(">> GENERATE_AC")));
}

#[tokio::test]
async fn graph_file_with_wrong_pin_reports_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wrong-pin.json");
    let text = r#"{
        "id": "wrong-pin",
        "nodes": {
            "term": { "type": "APDUSender", "metadata": { "config": { "pin": "9999" } } },
            "card": { "type": "EMVCardSimulator" }
        },
        "connections": [
            {
                "from": { "node": "term", "endpoint": "toCard" },
                "to": { "node": "card", "endpoint": "iso7816" }
            }
        ]
    }"#;
    std::fs::write(&path, text).unwrap();

    let report = run(file_config(path)).await.unwrap();
    assert_eq!(report.graph, "wrong-pin");
    assert_eq!(report.error_count(), 1);
}

#[tokio::test]
async fn store_source_loads_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsGraphStore::new(dir.path());
    store.create(demo_graph().unwrap().to_document()).await.unwrap();

    let source = GraphSource::Store { dir: dir.path().to_path_buf(), name: "demo".into() };
    let graph = load_graph(&source).await.unwrap();
    assert_eq!(graph.nodes().len(), 2);

    let missing = GraphSource::Store { dir: dir.path().to_path_buf(), name: "other".into() };
    assert!(matches!(load_graph(&missing).await, Err(RunnerError::Config(_))));
}

#[tokio::test]
async fn unknown_component_type_fails_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    let text = r#"{ "id": "bad", "nodes": [ { "id": "x", "type": "CryptoBox" } ] }"#;
    std::fs::write(&path, text).unwrap();

    let result = run(file_config(path)).await;
    assert!(matches!(result, Err(RunnerError::Network(_))));
}
