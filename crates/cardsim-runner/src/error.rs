//! Runner error types.

use std::fmt;

use cardsim_core::{FactoryError, GraphError, NetworkError, StoreError};

/// Errors that can occur while running a network.
#[derive(Debug)]
pub enum RunnerError {
    /// Configuration error
    Config(String),

    /// Graph file could not be read
    Io(std::io::Error),

    /// Graph document is not valid JSON for a graph
    Document(serde_json::Error),

    /// Graph store error
    Store(StoreError),

    /// Graph is structurally invalid
    Graph(GraphError),

    /// Component registration error
    Factory(FactoryError),

    /// Network failed to start
    Network(NetworkError),
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::Document(err) => write!(f, "document error: {err}"),
            Self::Store(err) => write!(f, "store error: {err}"),
            Self::Graph(err) => write!(f, "graph error: {err}"),
            Self::Factory(err) => write!(f, "factory error: {err}"),
            Self::Network(err) => write!(f, "network error: {err}"),
        }
    }
}

impl std::error::Error for RunnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(_) => None,
            Self::Io(err) => Some(err),
            Self::Document(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Graph(err) => Some(err),
            Self::Factory(err) => Some(err),
            Self::Network(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for RunnerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for RunnerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Document(err)
    }
}

impl From<StoreError> for RunnerError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<GraphError> for RunnerError {
    fn from(err: GraphError) -> Self {
        Self::Graph(err)
    }
}

impl From<FactoryError> for RunnerError {
    fn from(err: FactoryError) -> Self {
        Self::Factory(err)
    }
}

impl From<NetworkError> for RunnerError {
    fn from(err: NetworkError) -> Self {
        Self::Network(err)
    }
}
