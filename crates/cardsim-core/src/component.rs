//! Component contract.
//!
//! ## Responsibilities
//!
//! - Initialize: called exactly once, returns the complete endpoint set
//! - Start: begin protocol execution, only from stopped
//! - Stop: idempotent, abandons any pending exchange
//!
//! ## Design
//!
//! - Capability set as a trait object: the factory returns
//!   `Box<dyn Component>`, the network never knows concrete types
//! - Protocol work runs in tasks spawned on the current runtime; the network
//!   itself never awaits a component
//! - Configuration is the node's metadata, read through typed accessors

use std::{any::Any, future::Future};

use cardsim_proto::ByteArray;
use serde_json::Value;
use thiserror::Error;
use tokio::{runtime::Handle, task::JoinHandle};

use crate::{diagnostics::DiagnosticsSnapshot, endpoint::{EndPoint, EndpointError}, graph::Metadata};

/// Metadata key holding component settings.
pub const CONFIG_KEY: &str = "config";

/// Component lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComponentError {
    /// `initialize` was called a second time.
    #[error("component already initialized")]
    AlreadyInitialized,

    /// `start` before `initialize`.
    #[error("component not initialized")]
    NotInitialized,

    /// `start` while already running.
    #[error("component already running")]
    AlreadyRunning,

    /// Component is not running.
    #[error("component not running")]
    NotRunning,

    /// No async runtime to run protocol tasks on.
    #[error("no async runtime available for protocol task")]
    NoRuntime,

    /// A setting is present but unusable.
    #[error("invalid setting '{key}': {reason}")]
    InvalidConfig {
        /// Setting name
        key: String,
        /// What is wrong with it
        reason: String,
    },

    /// Two endpoints returned from `initialize` share a name.
    #[error("duplicate endpoint name '{name}'")]
    DuplicateEndpoint {
        /// Endpoint name
        name: String,
    },

    /// A transaction is still in flight.
    #[error("component busy: transaction in progress")]
    Busy,

    /// Endpoint operation failed.
    #[error("endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    /// Component-specific failure.
    #[error("{reason}")]
    Failed {
        /// Failure description
        reason: String,
    },
}

/// Configuration handed to [`Component::initialize`].
///
/// Settings live under the `config` key of the node metadata; view metadata
/// and anything else is visible but ignored by components.
#[derive(Debug, Clone, Default)]
pub struct ComponentConfig {
    /// Owning node id
    pub node_id: String,
    /// Registered type name
    pub component_type: String,
    /// Node metadata, copied wholesale
    pub metadata: Metadata,
}

impl ComponentConfig {
    /// Config for `node_id` of `component_type` with the given metadata.
    pub fn new(
        node_id: impl Into<String>,
        component_type: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Self { node_id: node_id.into(), component_type: component_type.into(), metadata }
    }

    /// Raw setting value.
    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.metadata.get(CONFIG_KEY)?.as_object()?.get(key)
    }

    /// String setting, `default` if absent.
    pub fn str_setting(&self, key: &str, default: &str) -> Result<String, ComponentError> {
        match self.setting(key) {
            None | Some(Value::Null) => Ok(default.to_string()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(invalid(key, format!("expected string, got {other}"))),
        }
    }

    /// Unsigned integer setting, `default` if absent.
    pub fn u64_setting(&self, key: &str, default: u64) -> Result<u64, ComponentError> {
        match self.setting(key) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => value
                .as_u64()
                .ok_or_else(|| invalid(key, format!("expected unsigned integer, got {value}"))),
        }
    }

    /// Hex byte string setting, `default` if absent.
    pub fn hex_setting(&self, key: &str, default: &[u8]) -> Result<ByteArray, ComponentError> {
        match self.setting(key) {
            None | Some(Value::Null) => Ok(ByteArray::from(default)),
            Some(Value::String(s)) => {
                ByteArray::from_hex(s).map_err(|e| invalid(key, e.to_string()))
            },
            Some(other) => Err(invalid(key, format!("expected hex string, got {other}"))),
        }
    }
}

fn invalid(key: &str, reason: String) -> ComponentError {
    ComponentError::InvalidConfig { key: key.to_string(), reason }
}

/// Pluggable simulated device.
pub trait Component: Any + Send {
    /// Create the component's endpoints. Called exactly once, before `start`.
    ///
    /// The returned set is final: endpoints are never added or removed later.
    fn initialize(&mut self, config: &ComponentConfig) -> Result<Vec<EndPoint>, ComponentError>;

    /// Begin protocol execution. Only valid from the stopped state.
    fn start(&mut self) -> Result<(), ComponentError>;

    /// Stop protocol execution, abandoning any pending exchange.
    ///
    /// Idempotent and safe at any time.
    fn stop(&mut self) -> Result<(), ComponentError>;

    /// Icon name shown by the UI.
    fn icon(&self) -> &str {
        "memory"
    }

    /// Current transaction diagnostics, for components that run transactions.
    fn diagnostics(&self) -> Option<DiagnosticsSnapshot> {
        None
    }

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast support.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Lifecycle bookkeeping shared by component implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// Constructed, `initialize` not yet called
    #[default]
    Created,
    /// Initialized and idle
    Stopped,
    /// Executing
    Running,
}

impl Lifecycle {
    /// Record `initialize`.
    pub fn initialize(&mut self) -> Result<(), ComponentError> {
        match self {
            Self::Created => {
                *self = Self::Stopped;
                Ok(())
            },
            _ => Err(ComponentError::AlreadyInitialized),
        }
    }

    /// Record `start`.
    pub fn start(&mut self) -> Result<(), ComponentError> {
        match self {
            Self::Created => Err(ComponentError::NotInitialized),
            Self::Running => Err(ComponentError::AlreadyRunning),
            Self::Stopped => {
                *self = Self::Running;
                Ok(())
            },
        }
    }

    /// Record `stop`. Returns whether the component was running.
    pub fn stop(&mut self) -> bool {
        let was_running = *self == Self::Running;
        if was_running {
            *self = Self::Stopped;
        }
        was_running
    }

    /// Whether the component is running.
    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

/// Spawn a protocol task on the current runtime.
pub fn spawn_protocol_task<F>(task: F) -> Result<JoinHandle<()>, ComponentError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = Handle::try_current().map_err(|_| ComponentError::NoRuntime)?;
    Ok(handle.spawn(task))
}
