//! The host-framework resource boundary.
//!
//! A host framework constructs resources from an attribute map, hands them a
//! [`Dependencies`] map of already-built resources, reconfigures them in
//! place when attributes change and closes them on shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use rosmod_types::{Attributes, BridgeError};

/// A named component the host can reconfigure and close.
pub trait Resource: Send + Sync {
    fn name(&self) -> &str;

    /// Apply new attributes.
    ///
    /// # Errors
    ///
    /// Returns the validation, connection or subscription failure that
    /// stopped the resource from becoming ready.
    fn reconfigure(&self, deps: &Dependencies, attributes: &Attributes) -> Result<(), BridgeError>;

    /// Release everything the resource holds.  Idempotent.
    fn close(&self) -> Result<(), BridgeError>;
}

/// Resources a component may look up by name at construction or
/// reconfiguration time.
///
/// Neither topic adapter uses its dependencies; the map exists so the
/// constructors match what a host passes.
#[derive(Clone, Default)]
pub struct Dependencies {
    resources: HashMap<String, Arc<dyn Resource>>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `resource` under its own name, replacing any previous entry.
    pub fn insert(&mut self, resource: Arc<dyn Resource>) {
        self.resources
            .insert(resource.name().to_string(), resource);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Resource>> {
        self.resources.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
