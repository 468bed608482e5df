//! Plugins for provider-delegated services.
//!
//! A service whose `kind` is [`ServiceKind::Provider`](crate::ServiceKind)
//! has its whole lifecycle handled by an external plugin; the container
//! executor hands it over instead of touching the runtime.

use crate::model::{Project, ServiceNode};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// External lifecycle handler for provider-delegated services
#[async_trait]
pub trait ProviderPlugin: Send + Sync {
    /// Run a lifecycle command (`up`, `down`) for a service
    async fn run(&self, project: &Project, service: &ServiceNode, command: &str) -> Result<()>;
}

/// Registry of provider plugins, keyed by name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    plugins: HashMap<String, Arc<dyn ProviderPlugin>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin
    pub fn register(&mut self, name: &str, plugin: Arc<dyn ProviderPlugin>) {
        self.plugins.insert(name.to_string(), plugin);
    }

    /// Get a plugin by name
    pub fn get(&self, name: &str) -> Result<Arc<dyn ProviderPlugin>> {
        self.plugins.get(name).cloned().ok_or_else(|| {
            warn!(
                "No provider plugin '{}', registered: {:?}",
                name,
                self.list_plugins()
            );
            Error::ProviderNotFound(name.to_string())
        })
    }

    /// List all registered plugin names
    pub fn list_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.keys().cloned().collect();
        names.sort();
        names
    }
}
