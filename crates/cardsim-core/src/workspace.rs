//! Directory of named networks backed by a [`GraphStore`].
//!
//! The workspace is what a UI lists: every stored graph bound to the shared
//! component factory, plus at most one open (selected) network. Closing the
//! open network stops it if it is running.

use std::{collections::BTreeMap, sync::Arc};

use thiserror::Error;

use crate::{
    document::GraphDocument,
    factory::ComponentFactory,
    graph::{Graph, GraphError},
    network::Network,
    store::{GraphStore, StoreError, is_valid_id},
};

/// Workspace errors.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored document is not a valid graph.
    #[error("graph '{id}' is invalid: {source}")]
    InvalidGraph {
        /// Graph id
        id: String,
        /// Validation error
        #[source]
        source: GraphError,
    },

    /// Name is empty or unusable.
    #[error("invalid network name '{name}'")]
    InvalidName {
        /// Rejected name
        name: String,
    },

    /// Name already used by another network.
    #[error("network name '{name}' is already taken")]
    NameTaken {
        /// Rejected name
        name: String,
    },

    /// No network with this name.
    #[error("network '{name}' not found")]
    NotFound {
        /// Requested name
        name: String,
    },
}

/// Named networks plus the currently open one.
pub struct Workspace<S> {
    store: S,
    factory: Arc<ComponentFactory>,
    networks: BTreeMap<String, Network>,
    selected: Option<String>,
}

impl<S: GraphStore> Workspace<S> {
    /// Empty workspace over `store`; call [`refresh`](Self::refresh) to load.
    pub fn new(store: S, factory: Arc<ComponentFactory>) -> Self {
        Self { store, factory, networks: BTreeMap::new(), selected: None }
    }

    /// Backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reload every graph from the store.
    ///
    /// Running networks are kept as they are; everything else is replaced by
    /// the stored version. Every document is validated before anything is
    /// replaced, so on error the workspace is unchanged. Returns the number
    /// of networks.
    pub async fn refresh(&mut self) -> Result<usize, WorkspaceError> {
        let documents = self.store.fetch_all().await?;

        let mut graphs = Vec::with_capacity(documents.len());
        for document in documents {
            let id = document.id.clone();
            if self.networks.get(&id).is_some_and(Network::is_running) {
                graphs.push((id, None));
                continue;
            }
            let graph = Graph::from_document(document)
                .map_err(|source| WorkspaceError::InvalidGraph { id: id.clone(), source })?;
            graphs.push((id, Some(graph)));
        }

        let mut loaded = BTreeMap::new();
        for (id, graph) in graphs {
            let network = match graph {
                Some(graph) => Network::new(graph, Arc::clone(&self.factory)),
                None => {
                    let Some(running) = self.networks.remove(&id) else { continue };
                    tracing::debug!(network = %id, "keeping running network on refresh");
                    running
                },
            };
            loaded.insert(id, network);
        }

        self.networks = loaded;
        if self.selected.as_ref().is_some_and(|name| !self.networks.contains_key(name)) {
            self.selected = None;
        }
        tracing::info!(networks = self.networks.len(), "workspace refreshed");
        Ok(self.networks.len())
    }

    /// Names in use, sorted.
    pub fn taken_names(&self) -> impl Iterator<Item = &str> {
        self.networks.keys().map(String::as_str)
    }

    /// Network by name.
    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks.get(name)
    }

    /// Mutable network by name.
    pub fn network_mut(&mut self, name: &str) -> Option<&mut Network> {
        self.networks.get_mut(name)
    }

    /// Create and persist an empty network.
    ///
    /// # Errors
    ///
    /// - `InvalidName` if the trimmed name is empty or unusable as an id
    /// - `NameTaken` if another network has this name
    pub async fn create_network(&mut self, name: &str) -> Result<&mut Network, WorkspaceError> {
        let name = name.trim();
        if !is_valid_id(name) {
            return Err(WorkspaceError::InvalidName { name: name.to_string() });
        }
        if self.networks.contains_key(name) {
            return Err(WorkspaceError::NameTaken { name: name.to_string() });
        }

        let document = self.store.create(GraphDocument::empty(name)).await?;
        let graph = Graph::from_document(document)
            .map_err(|source| WorkspaceError::InvalidGraph { id: name.to_string(), source })?;

        tracing::info!(network = %name, "network created");
        let network = Network::new(graph, Arc::clone(&self.factory));
        Ok(self.networks.entry(name.to_string()).or_insert(network))
    }

    /// Persist a network's current graph.
    pub async fn save(&mut self, name: &str) -> Result<(), WorkspaceError> {
        let document = self.get(name)?.to_document();
        self.store.save(document).await?;
        Ok(())
    }

    /// Unpersist, stop (if running) and forget a network.
    ///
    /// If the store refuses, the network is left untouched.
    pub async fn delete(&mut self, name: &str) -> Result<(), WorkspaceError> {
        let document = self.get(name)?.to_document();
        self.store.delete(&document).await?;

        if let Some(mut network) = self.networks.remove(name) {
            network.stop();
        }
        if self.selected.as_deref() == Some(name) {
            self.selected = None;
        }
        tracing::info!(network = %name, "network deleted");
        Ok(())
    }

    /// Select a network, closing the previously open one.
    pub fn open(&mut self, name: &str) -> Result<&mut Network, WorkspaceError> {
        if !self.networks.contains_key(name) {
            return Err(not_found(name));
        }
        if self.selected.as_deref() != Some(name) {
            self.close();
            self.selected = Some(name.to_string());
        }
        self.networks.get_mut(name).ok_or_else(|| not_found(name))
    }

    /// The open network.
    pub fn selected(&mut self) -> Option<&mut Network> {
        let name = self.selected.as_ref()?;
        self.networks.get_mut(name)
    }

    /// Deselect the open network, stopping it if running.
    pub fn close(&mut self) {
        if let Some(name) = self.selected.take() {
            if let Some(network) = self.networks.get_mut(&name) {
                if network.is_running() {
                    network.stop();
                }
            }
        }
    }

    fn get(&self, name: &str) -> Result<&Network, WorkspaceError> {
        self.networks.get(name).ok_or_else(|| not_found(name))
    }
}

fn not_found(name: &str) -> WorkspaceError {
    WorkspaceError::NotFound { name: name.to_string() }
}
