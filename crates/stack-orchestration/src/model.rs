//! Application model consumed by the teardown engine.
//!
//! The model is produced by an external loader (or reconstructed from live
//! resources, see [`crate::resources`]). The engine reads it and only ever
//! relaxes dependency edges.

use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A declarative stack: services, networks and volumes
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    /// Stack name
    pub name: String,
    /// Services keyed by name
    #[serde(default)]
    pub services: IndexMap<String, ServiceNode>,
    /// Networks keyed by model key
    #[serde(default)]
    pub networks: IndexMap<String, NetworkConfig>,
    /// Volumes keyed by model key
    #[serde(default)]
    pub volumes: IndexMap<String, VolumeConfig>,
}

impl Project {
    /// Create an empty project; the name is lower-cased
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            ..Default::default()
        }
    }

    /// Add a service
    pub fn with_service(mut self, service: ServiceNode) -> Self {
        self.services.insert(service.name.clone(), service);
        self
    }

    /// Add an owned network named `<project>_<key>`
    pub fn with_network(mut self, key: &str) -> Self {
        let name = format!("{}_{}", self.name, key);
        self.networks
            .insert(key.to_string(), NetworkConfig::owned(&name));
        self
    }

    /// Add an owned volume named `<project>_<key>`
    pub fn with_volume(mut self, key: &str) -> Self {
        let name = format!("{}_{}", self.name, key);
        self.volumes.insert(key.to_string(), VolumeConfig::owned(&name));
        self
    }

    /// Look up a service by name
    pub fn service(&self, name: &str) -> Result<&ServiceNode> {
        self.services
            .get(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))
    }

    /// Names of all services, in declaration order
    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    /// Downgrade every dependency edge to optional
    pub fn relax_dependencies(&mut self) {
        for service in self.services.values_mut() {
            for edge in service.depends_on.values_mut() {
                edge.required = false;
            }
        }
    }
}

/// A service of the stack
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceNode {
    /// Service name
    pub name: String,
    /// Services this one depends on
    #[serde(default)]
    pub depends_on: BTreeMap<String, DependencyEdge>,
    /// Who manages the lifecycle
    #[serde(default)]
    pub kind: ServiceKind,
    /// Image reference, if declared
    #[serde(default)]
    pub image: Option<String>,
    /// The image is built by this stack
    #[serde(default)]
    pub build: bool,
    /// Hooks run before the container is stopped
    #[serde(default)]
    pub pre_stop: Vec<Hook>,
}

impl ServiceNode {
    /// Create a runtime-managed service without dependencies
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            depends_on: BTreeMap::new(),
            kind: ServiceKind::Runtime,
            image: None,
            build: false,
            pre_stop: Vec::new(),
        }
    }

    /// Declare a dependency
    pub fn depends_on(mut self, service: &str, required: bool) -> Self {
        self.depends_on.insert(
            service.to_string(),
            DependencyEdge {
                required,
                condition: DependencyCondition::default(),
            },
        );
        self
    }

    /// Set the image reference
    pub fn with_image(mut self, image: &str) -> Self {
        self.image = Some(image.to_string());
        self
    }

    /// Mark the image as built by the stack
    pub fn built(mut self) -> Self {
        self.build = true;
        self
    }

    /// Delegate the lifecycle to a provider plugin
    pub fn with_provider(mut self, plugin: &str) -> Self {
        self.kind = ServiceKind::Provider(ProviderRef {
            plugin: plugin.to_string(),
            options: BTreeMap::new(),
        });
        self
    }

    /// Add a pre-stop hook
    pub fn with_pre_stop(mut self, hook: Hook) -> Self {
        self.pre_stop.push(hook);
        self
    }

    /// Image reference, defaulting to `<project>-<service>` for built images
    pub fn image_name(&self, project: &str) -> String {
        self.image
            .clone()
            .unwrap_or_else(|| format!("{}-{}", project, self.name))
    }
}

/// Dependency edge between two services
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyEdge {
    /// Whether the edge constrains ordering
    #[serde(default = "default_required")]
    pub required: bool,
    /// Readiness condition awaited at bring-up.
    ///
    /// Teardown never reads it. It is carried so that a model recovered from
    /// the `depends_on` label keeps it for a [`Direction::Up`](crate::Direction) walk.
    #[serde(default)]
    pub condition: DependencyCondition,
}

fn default_required() -> bool {
    true
}

/// Readiness condition attached to a dependency
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DependencyCondition {
    /// The dependency has been started
    #[default]
    ServiceStarted,
    /// The dependency reports healthy
    ServiceHealthy,
    /// The dependency ran to successful completion
    ServiceCompletedSuccessfully,
}

impl DependencyCondition {
    /// Parse the label form of a condition
    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            "service_started" => Some(Self::ServiceStarted),
            "service_healthy" => Some(Self::ServiceHealthy),
            "service_completed_successfully" => Some(Self::ServiceCompletedSuccessfully),
            _ => None,
        }
    }
}

/// Lifecycle owner of a service
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceKind {
    /// Containers managed through the runtime
    #[default]
    Runtime,
    /// Lifecycle handed to an external plugin
    Provider(ProviderRef),
}

/// Reference to a provider plugin
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderRef {
    /// Registered plugin name
    pub plugin: String,
    /// Plugin options
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// A command run inside a container
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hook {
    /// Command and arguments
    pub command: Vec<String>,
    /// User to run as
    #[serde(default)]
    pub user: Option<String>,
}

impl Hook {
    /// Hook running the given command
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            user: None,
        }
    }
}

/// A network of the stack
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Runtime name
    pub name: String,
    /// Managed outside this stack
    #[serde(default)]
    pub external: bool,
}

impl NetworkConfig {
    /// Network owned by the stack
    pub fn owned(name: &str) -> Self {
        Self {
            name: name.to_string(),
            external: false,
        }
    }

    /// Network managed elsewhere
    pub fn external(name: &str) -> Self {
        Self {
            name: name.to_string(),
            external: true,
        }
    }
}

/// A volume of the stack
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeConfig {
    /// Runtime name
    pub name: String,
    /// Managed outside this stack
    #[serde(default)]
    pub external: bool,
}

impl VolumeConfig {
    /// Volume owned by the stack
    pub fn owned(name: &str) -> Self {
        Self {
            name: name.to_string(),
            external: false,
        }
    }

    /// Volume managed elsewhere
    pub fn external(name: &str) -> Self {
        Self {
            name: name.to_string(),
            external: true,
        }
    }
}
