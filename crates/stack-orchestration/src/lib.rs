//! # Stack orchestration
//!
//! Dependency-ordered teardown of multi-service container stacks.
//!
//! Given a declarative [`Project`] (services, their dependency relations,
//! networks and volumes) or only a stack name, [`Teardown::down`] drives the
//! container runtime to an empty state for that stack:
//!
//! - services are torn down in reverse dependency order, independent
//!   branches concurrently;
//! - every container is stopped, then force-removed;
//! - networks, volumes and images are removed by independent operations that
//!   run concurrently once the containers are gone;
//! - "already gone" and "still in use" answers from the runtime are benign,
//!   anything else is surfaced.
//!
//! ## Example
//!
//! ```no_run
//! use stack_orchestration::{
//!     DockerCli, EngineConfig, Teardown, TeardownOptions, TracingProgress,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> stack_orchestration::Result<()> {
//! let teardown = Teardown::new(
//!     Arc::new(DockerCli::new()),
//!     Arc::new(TracingProgress),
//!     EngineConfig::default(),
//! );
//!
//! let outcome = teardown.down("demo", TeardownOptions::default()).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod aggregate;
pub mod cleanup;
mod config;
mod context;
mod docker;
mod down;
pub mod executor;
pub mod graph;
pub mod labels;
pub mod logging;
mod model;
pub mod progress;
mod provider;
pub mod resources;
mod runtime;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use aggregate::{ErrorCollector, run_all, run_operations};
pub use cleanup::Operation;
pub use config::{EngineConfig, ImageRemoval, PARALLEL_LIMIT_ENV, TeardownOptions};
pub use context::{CancellationToken, Limiter, OperationContext};
pub use docker::DockerCli;
pub use down::{Teardown, TeardownOutcome};
pub use executor::{ContainerExecutor, ContainerPhase};
pub use graph::{DependencyGraph, Direction, in_dependency_order, in_reverse_dependency_order};
pub use model::{
    DependencyCondition, DependencyEdge, Hook, NetworkConfig, Project, ProviderRef, ServiceKind,
    ServiceNode, VolumeConfig,
};
pub use progress::{Event, Phase, ProgressWriter, TracingProgress};
pub use provider::{ProviderPlugin, ProviderRegistry};
pub use resources::{OneOff, ResourceEnumerator};
pub use runtime::{
    ContainerSummary, Filter, ImageSummary, NetworkDetails, NetworkSummary, RuntimeClient,
    RuntimeError, RuntimeResult, VolumeSummary,
};

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for teardown operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Unclassified failure reported by the container runtime
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// A resource could not be removed
    #[error("failed to remove {resource}: {source}")]
    Removal {
        /// Progress identifier of the resource, e.g. `Network demo_default`
        resource: String,
        /// Underlying runtime failure
        #[source]
        source: RuntimeError,
    },

    /// A selected service does not exist in the model
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// The required dependency relation contains a cycle
    #[error("Circular dependency detected between services: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    /// The walker could not make progress
    #[error("No progress possible, blocked services: {}", .0.join(", "))]
    Stalled(Vec<String>),

    /// A node was skipped because a required predecessor failed
    #[error("Service '{service}' skipped because '{dependency}' failed")]
    DependencyFailed {
        /// Skipped service
        service: String,
        /// Failed predecessor
        dependency: String,
    },

    /// No plugin registered for a provider-delegated service
    #[error("No provider plugin registered under '{0}'")]
    ProviderNotFound(String),

    /// A provider plugin reported a failure
    #[error("Provider '{provider}' failed for service '{service}': {reason}")]
    Provider {
        /// Plugin name
        provider: String,
        /// Service the plugin was acting on
        service: String,
        /// Failure description
        reason: String,
    },

    /// The operation was cancelled before completion
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A spawned worker ended abnormally
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Whether the error stems from cancellation rather than a real failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
