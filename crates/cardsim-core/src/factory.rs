//! Component type registry.
//!
//! Registration is explicit: every type the engine can instantiate is added
//! with [`ComponentFactory::register`] under a string tag. There is no
//! discovery.

use std::collections::{BTreeMap, HashSet};

use thiserror::Error;

use crate::{
    component::{Component, ComponentConfig, ComponentError},
    endpoint::EndPoint,
};

/// Constructor stored in the registry.
pub type Constructor = Box<dyn Fn() -> Box<dyn Component> + Send + Sync>;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FactoryError {
    /// No constructor registered under this name.
    #[error("unknown component type '{type_name}'")]
    UnknownComponentType {
        /// Requested type name
        type_name: String,
    },

    /// Type name registered twice.
    #[error("component type '{type_name}' already registered")]
    AlreadyRegistered {
        /// Type name
        type_name: String,
    },

    /// Component was constructed but `initialize` failed; it was discarded.
    #[error("failed to initialize '{type_name}': {source}")]
    Initialize {
        /// Type name
        type_name: String,
        /// Underlying component error
        #[source]
        source: ComponentError,
    },
}

/// A freshly created, initialized component and its endpoints.
pub struct ComponentInstance {
    /// The component
    pub component: Box<dyn Component>,
    /// Endpoints returned by `initialize`
    pub endpoints: Vec<EndPoint>,
}

impl ComponentInstance {
    /// Endpoint by name.
    pub fn endpoint(&self, name: &str) -> Option<&EndPoint> {
        self.endpoints.iter().find(|ep| ep.name() == name)
    }
}

impl std::fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

/// Mapping from type name to component constructor.
#[derive(Default)]
pub struct ComponentFactory {
    constructors: BTreeMap<String, Constructor>,
}

impl ComponentFactory {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `constructor` under `type_name`.
    ///
    /// # Errors
    ///
    /// `AlreadyRegistered` if the name is taken; the existing entry is kept.
    pub fn register<F>(
        &mut self,
        type_name: impl Into<String>,
        constructor: F,
    ) -> Result<(), FactoryError>
    where
        F: Fn() -> Box<dyn Component> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        if self.constructors.contains_key(&type_name) {
            return Err(FactoryError::AlreadyRegistered { type_name });
        }
        tracing::debug!(type_name = %type_name, "component type registered");
        self.constructors.insert(type_name, Box::new(constructor));
        Ok(())
    }

    /// Whether `type_name` is registered.
    pub fn is_registered(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Construct and initialize a component of `type_name`.
    ///
    /// Nothing is constructed for an unregistered name. If `initialize` fails
    /// or returns duplicate endpoint names the component is dropped.
    pub fn create(
        &self,
        type_name: &str,
        config: &ComponentConfig,
    ) -> Result<ComponentInstance, FactoryError> {
        let constructor = self.constructors.get(type_name).ok_or_else(|| {
            FactoryError::UnknownComponentType { type_name: type_name.to_string() }
        })?;

        let mut component = constructor();
        let wrap = |source| FactoryError::Initialize { type_name: type_name.to_string(), source };

        let endpoints = component.initialize(config).map_err(wrap)?;

        let mut seen = HashSet::new();
        if let Some(dup) = endpoints.iter().find(|ep| !seen.insert(ep.name().to_string())) {
            return Err(wrap(ComponentError::DuplicateEndpoint { name: dup.name().to_string() }));
        }

        Ok(ComponentInstance { component, endpoints })
    }
}

impl std::fmt::Debug for ComponentFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentFactory")
            .field("types", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}
