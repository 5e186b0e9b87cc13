//! Network: a graph bound to a component factory.
//!
//! ## Responsibilities
//!
//! - Instantiate one component per node and wire their endpoints
//! - Own the run state (`Idle` / `Running`) and the component instances
//! - Route structural changes to the graph, only while idle
//!
//! ## Design
//!
//! - All-or-nothing construction: instances and links are built off to the
//!   side and only installed once every node and connection checks out
//! - Start rolls back: if any component fails to start, the ones already
//!   started are stopped, every instance is dropped and the network stays
//!   idle
//! - Stop is best-effort and drops every instance, so a later start builds
//!   fresh components with no stale slot or transaction state

use std::{collections::BTreeMap, sync::Arc};

use thiserror::Error;

use crate::{
    component::{Component, ComponentConfig, ComponentError},
    diagnostics::DiagnosticsSnapshot,
    document::GraphDocument,
    endpoint::{Direction, EndPoint},
    factory::{ComponentFactory, ComponentInstance, FactoryError},
    graph::{Connection, EndpointRef, Graph, GraphError, Metadata, Node},
};

/// Network lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// Components stopped (or not instantiated)
    #[default]
    Idle,
    /// Every component started
    Running,
}

/// Network errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// Structural graph error.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A node names a type the factory does not know.
    #[error("node '{node}': unknown component type '{type_name}'")]
    UnknownComponentType {
        /// Node id
        node: String,
        /// Type name
        type_name: String,
    },

    /// A component failed to initialize or start.
    #[error("node '{node}' failed to start: {source}")]
    ComponentStart {
        /// Node id
        node: String,
        /// Component error
        #[source]
        source: ComponentError,
    },

    /// Connection joins endpoints whose directions cannot exchange data.
    #[error("cannot connect {from} ({from_direction}) to {to} ({to_direction})")]
    IncompatibleEndpointDirection {
        /// Source endpoint
        from: EndpointRef,
        /// Target endpoint
        to: EndpointRef,
        /// Source direction
        from_direction: Direction,
        /// Target direction
        to_direction: Direction,
    },

    /// Connection names an endpoint the node's component does not expose.
    #[error("endpoint {endpoint} not found")]
    EndpointNotFound {
        /// Missing endpoint
        endpoint: EndpointRef,
    },

    /// Components have not been instantiated.
    #[error("network not instantiated")]
    NotInstantiated,

    /// Operation requires the network to be idle.
    #[error("network is running")]
    Running,
}

/// UI collaborator hooks.
pub trait NetworkObserver: Send {
    /// Network entered `Running`.
    fn on_started(&mut self, _graph_id: &str) {}

    /// Network returned to `Idle`.
    fn on_stopped(&mut self, _graph_id: &str) {}
}

type Instances = BTreeMap<String, ComponentInstance>;

/// A graph plus its running components.
pub struct Network {
    graph: Graph,
    factory: Arc<ComponentFactory>,
    run_state: RunState,
    instances: Option<Instances>,
    observers: Vec<Box<dyn NetworkObserver>>,
}

impl Network {
    /// Bind `graph` to `factory`. Nothing is instantiated yet.
    pub fn new(graph: Graph, factory: Arc<ComponentFactory>) -> Self {
        Self { graph, factory, run_state: RunState::Idle, instances: None, observers: Vec::new() }
    }

    /// Underlying graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Graph id.
    pub fn id(&self) -> &str {
        self.graph.id()
    }

    /// Current run state.
    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    /// Whether the network is running.
    pub fn is_running(&self) -> bool {
        self.run_state == RunState::Running
    }

    /// Whether components currently exist.
    pub fn is_instantiated(&self) -> bool {
        self.instances.is_some()
    }

    /// Register a UI collaborator.
    pub fn add_observer(&mut self, observer: Box<dyn NetworkObserver>) {
        self.observers.push(observer);
    }

    /// Document form of the graph.
    pub fn to_document(&self) -> GraphDocument {
        self.graph.to_document()
    }

    /// Create and wire every component if not done already.
    ///
    /// # Errors
    ///
    /// - `UnknownComponentType` / `ComponentStart` from the factory
    /// - `EndpointNotFound` / `IncompatibleEndpointDirection` from wiring
    ///
    /// On error nothing is installed.
    pub fn instantiate(&mut self) -> Result<(), NetworkError> {
        if self.instances.is_some() {
            return Ok(());
        }

        let mut instances = Instances::new();
        for node in self.graph.nodes() {
            instances.insert(node.id.clone(), self.create_instance(node)?);
        }

        let links = self
            .graph
            .connections()
            .iter()
            .map(|c| resolve(&instances, c))
            .collect::<Result<Vec<_>, _>>()?;
        for (a, b) in links {
            a.link(&b);
        }

        tracing::debug!(
            graph = %self.graph.id(),
            nodes = instances.len(),
            connections = self.graph.connections().len(),
            "network instantiated"
        );
        self.instances = Some(instances);
        Ok(())
    }

    /// Start every component.
    ///
    /// Instantiates first if needed. Any failure stops what was started,
    /// drops every instance and leaves the network idle.
    pub fn start(&mut self) -> Result<(), NetworkError> {
        if self.is_running() {
            return Ok(());
        }

        self.instantiate()?;
        let Some(instances) = self.instances.as_mut() else {
            return Err(NetworkError::NotInstantiated);
        };

        let mut started: Vec<String> = Vec::new();
        let mut failure = None;
        for (node, instance) in instances.iter_mut() {
            match instance.component.start() {
                Ok(()) => started.push(node.clone()),
                Err(source) => {
                    failure = Some(NetworkError::ComponentStart { node: node.clone(), source });
                    break;
                },
            }
        }

        if let Some(err) = failure {
            tracing::error!(graph = %self.graph.id(), error = %err, "start failed, rolling back");
            for node in &started {
                if let Some(instance) = instances.get_mut(node) {
                    if let Err(e) = instance.component.stop() {
                        tracing::warn!(node = %node, error = %e, "rollback stop failed");
                    }
                }
            }
            self.teardown();
            return Err(err);
        }

        self.run_state = RunState::Running;
        tracing::info!(graph = %self.graph.id(), "network started");

        let id = self.graph.id().to_string();
        for observer in &mut self.observers {
            observer.on_started(&id);
        }
        Ok(())
    }

    /// Stop every component, best-effort, and return to idle.
    ///
    /// Individual stop failures are logged and do not prevent the others
    /// from stopping. Instances are dropped afterwards.
    pub fn stop(&mut self) {
        if !self.is_running() {
            self.teardown();
            return;
        }

        if let Some(instances) = self.instances.as_mut() {
            for (node, instance) in instances.iter_mut() {
                if let Err(e) = instance.component.stop() {
                    tracing::warn!(node = %node, error = %e, "component stop failed");
                }
            }
        }
        self.teardown();
        self.run_state = RunState::Idle;
        tracing::info!(graph = %self.graph.id(), "network stopped");

        let id = self.graph.id().to_string();
        for observer in &mut self.observers {
            observer.on_stopped(&id);
        }
    }

    /// Add a node. Rejected while running.
    pub fn add_node(&mut self, node: Node) -> Result<(), NetworkError> {
        self.ensure_idle()?;
        if self.graph.contains_node(&node.id) {
            return Err(GraphError::DuplicateNode { id: node.id }.into());
        }
        if self.instances.is_some() {
            let instance = self.create_instance(&node)?;
            if let Some(instances) = self.instances.as_mut() {
                instances.insert(node.id.clone(), instance);
            }
        }
        self.graph.add_node(node)?;
        Ok(())
    }

    /// Remove a node, its connections and its component. Rejected while
    /// running.
    pub fn remove_node(&mut self, id: &str) -> Result<Node, NetworkError> {
        self.ensure_idle()?;
        let node = self.graph.remove_node(id)?;

        if let Some(instances) = self.instances.as_mut() {
            if let Some(removed) = instances.remove(id) {
                for endpoint in &removed.endpoints {
                    endpoint.detach_all();
                    for other in instances.values().flat_map(|i| i.endpoints.iter()) {
                        other.unlink(endpoint);
                    }
                }
            }
        }
        Ok(node)
    }

    /// Connect two endpoints. Rejected while running.
    ///
    /// Endpoint existence and direction are always checked. When
    /// instantiated the link is made immediately; otherwise the two nodes
    /// are checked against scratch instances that are dropped afterwards.
    pub fn connect(&mut self, connection: Connection) -> Result<(), NetworkError> {
        self.ensure_idle()?;
        self.graph.check_connection(&connection)?;

        match self.instances.as_ref() {
            Some(instances) => {
                let (a, b) = resolve(instances, &connection)?;
                a.link(&b);
            },
            None => self.check_wiring(&connection)?,
        }
        self.graph.connect(connection)?;
        Ok(())
    }

    /// Disconnect two endpoints. Rejected while running.
    pub fn disconnect(&mut self, connection: &Connection) -> Result<(), NetworkError> {
        self.ensure_idle()?;
        let removed = self.graph.disconnect(connection)?;

        if let Some(instances) = self.instances.as_ref() {
            let ends = (lookup(instances, &removed.from), lookup(instances, &removed.to));
            if let (Some(a), Some(b)) = ends {
                a.unlink(b);
            }
        }
        Ok(())
    }

    /// Replace a node's metadata wholesale. Rejected while running.
    ///
    /// Components read their configuration at initialize, so existing
    /// instances are dropped and rebuilt on the next start.
    pub fn set_node_metadata(&mut self, id: &str, metadata: Metadata) -> Result<(), NetworkError> {
        self.ensure_idle()?;
        self.graph.set_metadata(id, metadata)?;
        self.teardown();
        Ok(())
    }

    /// Resolve an endpoint of an instantiated node.
    pub fn endpoint(&self, node: &str, name: &str) -> Result<EndPoint, NetworkError> {
        if !self.graph.contains_node(node) {
            return Err(GraphError::NodeNotFound { id: node.to_string() }.into());
        }
        let instances = self.instances.as_ref().ok_or(NetworkError::NotInstantiated)?;
        let endpoint = EndpointRef::new(node, name);
        lookup(instances, &endpoint).cloned().ok_or(NetworkError::EndpointNotFound { endpoint })
    }

    /// Component of an instantiated node.
    pub fn component(&self, node: &str) -> Option<&dyn Component> {
        self.instances.as_ref()?.get(node).map(|i| i.component.as_ref())
    }

    /// Mutable component of an instantiated node.
    pub fn component_mut(&mut self, node: &str) -> Option<&mut dyn Component> {
        self.instances.as_mut()?.get_mut(node).map(|i| i.component.as_mut())
    }

    /// Transaction diagnostics of a node's component, if it reports any.
    pub fn diagnostics(&self, node: &str) -> Option<DiagnosticsSnapshot> {
        self.component(node)?.diagnostics()
    }

    /// Diagnostics for every component that reports them, in node order.
    pub fn all_diagnostics(&self) -> Vec<(String, DiagnosticsSnapshot)> {
        self.graph
            .nodes()
            .iter()
            .filter_map(|n| Some((n.id.clone(), self.diagnostics(&n.id)?)))
            .collect()
    }

    fn ensure_idle(&self) -> Result<(), NetworkError> {
        if self.is_running() { Err(NetworkError::Running) } else { Ok(()) }
    }

    fn create_instance(&self, node: &Node) -> Result<ComponentInstance, NetworkError> {
        let config = ComponentConfig::new(
            node.id.clone(),
            node.component_type.clone(),
            node.metadata.clone(),
        );
        self.factory.create(&node.component_type, &config).map_err(|e| match e {
            FactoryError::UnknownComponentType { type_name } => {
                NetworkError::UnknownComponentType { node: node.id.clone(), type_name }
            },
            FactoryError::Initialize { source, .. } => {
                NetworkError::ComponentStart { node: node.id.clone(), source }
            },
            other @ FactoryError::AlreadyRegistered { .. } => NetworkError::ComponentStart {
                node: node.id.clone(),
                source: ComponentError::Failed { reason: other.to_string() },
            },
        })
    }

    fn check_wiring(&self, connection: &Connection) -> Result<(), NetworkError> {
        let mut scratch = Instances::new();
        for end in [&connection.from, &connection.to] {
            if scratch.contains_key(&end.node) {
                continue;
            }
            let node = self
                .graph
                .node(&end.node)
                .ok_or_else(|| GraphError::NodeNotFound { id: end.node.clone() })?;
            scratch.insert(end.node.clone(), self.create_instance(node)?);
        }
        resolve(&scratch, connection).map(|_| ())
    }

    fn teardown(&mut self) {
        if let Some(instances) = self.instances.take() {
            for endpoint in instances.values().flat_map(|i| i.endpoints.iter()) {
                endpoint.detach_all();
            }
            tracing::debug!(graph = %self.graph.id(), "instances dropped");
        }
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("graph", &self.graph.id())
            .field("run_state", &self.run_state)
            .field("instantiated", &self.instances.is_some())
            .finish_non_exhaustive()
    }
}

fn lookup<'a>(instances: &'a Instances, end: &EndpointRef) -> Option<&'a EndPoint> {
    instances.get(&end.node)?.endpoint(&end.endpoint)
}

/// Find both endpoints of `connection` and check their directions.
fn resolve(
    instances: &Instances,
    connection: &Connection,
) -> Result<(EndPoint, EndPoint), NetworkError> {
    let find = |end: &EndpointRef| {
        lookup(instances, end)
            .cloned()
            .ok_or_else(|| NetworkError::EndpointNotFound { endpoint: end.clone() })
    };
    let from = find(&connection.from)?;
    let to = find(&connection.to)?;

    if !from.direction().is_compatible_with(to.direction()) {
        return Err(NetworkError::IncompatibleEndpointDirection {
            from: connection.from.clone(),
            to: connection.to.clone(),
            from_direction: from.direction(),
            to_direction: to.direction(),
        });
    }
    Ok((from, to))
}
