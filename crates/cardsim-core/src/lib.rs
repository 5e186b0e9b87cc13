//! Component graph engine and slot protocol layer.
//!
//! A [`Graph`] of nodes is bound to a [`ComponentFactory`] to form a
//! [`Network`]. Starting the network creates one [`Component`] per node,
//! wires their [`EndPoint`]s along the graph's connections and starts them.
//! Terminal-side components talk to card-side components through a
//! [`Slot`]: `power_on` and `execute_apdu` become id-tagged request messages
//! on an INOUT endpoint and are answered by a [`SlotServer`].
//!
//! # Architecture
//!
//! ```text
//! GraphDocument ──► Graph ──► Network ──► ComponentFactory ──► Component
//!                                │                                │
//!                                └──── wires ──── EndPoint ◄──────┘
//!
//! TransactionRunner ──► SlotProtocolProxy ══ messages ══► SlotServer ──► CardBackend
//! ```
//!
//! # Execution Model
//!
//! Single-threaded cooperative: protocol work runs in tasks on the current
//! runtime and suspends only at `power_on`/`execute_apdu`. Stopping a
//! component cancels its token, so suspended operations resolve as
//! abandoned instead of completing with a stale result.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cancel;
pub mod component;
pub mod diagnostics;
pub mod document;
pub mod endpoint;
pub mod factory;
pub mod graph;
pub mod message;
pub mod network;
pub mod slot;
pub mod store;
pub mod transaction;
pub mod workspace;

pub use cancel::CancelToken;
pub use component::{Component, ComponentConfig, ComponentError, Lifecycle, spawn_protocol_task};
pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use document::{GraphDocument, NodeDocument};
pub use endpoint::{Direction, EndPoint, EndpointError};
pub use factory::{ComponentFactory, ComponentInstance, FactoryError};
pub use graph::{Connection, EndpointRef, Graph, GraphError, Metadata, Node, ViewMetadata};
pub use message::{Message, MessageKind};
pub use network::{Network, NetworkError, NetworkObserver, RunState};
pub use slot::{CardBackend, Slot, SlotError, SlotProtocolProxy, SlotServer, SlotState};
pub use store::{FsGraphStore, GraphStore, MemoryGraphStore, StoreError};
pub use transaction::{
    Exchange, StepError, TransactionPhase, TransactionRunner, TransactionScript, TransactionStep,
};
pub use workspace::{Workspace, WorkspaceError};
