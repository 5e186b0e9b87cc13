//! Headless cardsim runner.
//!
//! Loads a graph, builds a [`Network`] over the stock component factory,
//! starts it, waits for every terminal to finish its transaction and reports
//! what each component saw.
//!
//! ## Architecture
//!
//! ```text
//! cardsim-runner
//!   ├─ GraphSource     (demo graph, JSON file, or store directory)
//!   ├─ Network         (cardsim-core lifecycle)
//!   └─ default_factory (cardsim-components)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;

use std::{path::PathBuf, sync::Arc, time::Duration};

use cardsim_components::{ApduSender, default_factory, types};
use cardsim_core::{
    Connection, DiagnosticsSnapshot, EndpointRef, FsGraphStore, Graph, GraphDocument, GraphError,
    GraphStore, Network, Node, ViewMetadata,
};
pub use error::RunnerError;

/// Where the graph comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GraphSource {
    /// Built-in terminal ↔ card graph
    #[default]
    Demo,
    /// A single graph document
    File(PathBuf),
    /// Graph `name` in a directory store
    Store {
        /// Store directory
        dir: PathBuf,
        /// Graph id
        name: String,
    },
}

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Graph to run
    pub source: GraphSource,
    /// Upper bound on waiting for terminals, in milliseconds
    pub timeout_ms: u64,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { source: GraphSource::Demo, timeout_ms: 5_000, log_level: "info".to_string() }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Graph id
    pub graph: String,
    /// Diagnostics per node, captured before stop
    pub diagnostics: Vec<(String, DiagnosticsSnapshot)>,
    /// Whether some terminal was still busy when the timeout hit
    pub timed_out: bool,
}

impl RunReport {
    /// Total errors recorded across all components.
    pub fn error_count(&self) -> u32 {
        self.diagnostics.iter().map(|(_, d)| d.error_count).sum()
    }
}

/// Terminal wired to a simulated EMV card.
pub fn demo_graph() -> Result<Graph, GraphError> {
    let mut graph = Graph::new("demo");

    let mut terminal = Node::new("terminal", types::APDU_SENDER);
    terminal.set_view(ViewMetadata { x: 40.0, y: 40.0, width: 160.0, height: 80.0 });
    graph.add_node(terminal)?;

    let mut card = Node::new("card", types::EMV_CARD_SIMULATOR);
    card.set_view(ViewMetadata { x: 320.0, y: 40.0, width: 160.0, height: 80.0 });
    graph.add_node(card)?;

    graph.connect(Connection::new(
        EndpointRef::new("terminal", "toCard"),
        EndpointRef::new("card", "iso7816"),
    ))?;
    Ok(graph)
}

/// Load the graph named by `source`.
pub async fn load_graph(source: &GraphSource) -> Result<Graph, RunnerError> {
    match source {
        GraphSource::Demo => Ok(demo_graph()?),
        GraphSource::File(path) => {
            let text = tokio::fs::read_to_string(path).await?;
            Ok(Graph::from_document(GraphDocument::from_json(&text)?)?)
        },
        GraphSource::Store { dir, name } => {
            let store = FsGraphStore::new(dir);
            let document =
                store.fetch_all().await?.into_iter().find(|d| d.id == *name).ok_or_else(|| {
                    RunnerError::Config(format!("no graph '{name}' in {}", dir.display()))
                })?;
            Ok(Graph::from_document(document)?)
        },
    }
}

/// Run the configured graph once.
///
/// # Errors
///
/// Returns error if:
/// - The graph cannot be loaded
/// - The network fails to start
pub async fn run(config: RunnerConfig) -> Result<RunReport, RunnerError> {
    let graph = load_graph(&config.source).await?;
    let factory = Arc::new(default_factory()?);
    let mut network = Network::new(graph, factory);

    network.start()?;
    tracing::info!(graph = %network.id(), nodes = network.graph().nodes().len(), "running");

    let timeout = Duration::from_millis(config.timeout_ms);
    let timed_out = tokio::time::timeout(timeout, terminals_idle(&network)).await.is_err();
    if timed_out {
        tracing::warn!(
            graph = %network.id(),
            timeout_ms = config.timeout_ms,
            "terminals still busy"
        );
    }

    let diagnostics = network.all_diagnostics();
    for (node, snapshot) in &diagnostics {
        tracing::info!(
            node = %node,
            completed = snapshot.completed,
            errors = snapshot.error_count,
            last_error = snapshot.last_error.as_deref().unwrap_or("-"),
            "diagnostics"
        );
        for line in &snapshot.transcript {
            tracing::info!(node = %node, "{line}");
        }
    }

    let report = RunReport { graph: network.id().to_string(), diagnostics, timed_out };
    network.stop();
    Ok(report)
}

async fn terminals_idle(network: &Network) {
    let terminals: Vec<&str> = network
        .graph()
        .nodes()
        .iter()
        .filter(|n| n.component_type == types::APDU_SENDER)
        .map(|n| n.id.as_str())
        .collect();

    loop {
        let busy = terminals.iter().any(|id| {
            network
                .component(id)
                .and_then(|c| c.as_any().downcast_ref::<ApduSender>())
                .is_some_and(ApduSender::is_busy)
        });
        if !busy {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
