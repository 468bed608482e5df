//! Live resources of a stack.
//!
//! The enumerator lists what the runtime actually holds for a stack name and,
//! when the caller has no model at hand, rebuilds a minimal [`Project`] from
//! the ownership labels. Every dependency edge of a rebuilt model is
//! optional.

use crate::context::OperationContext;
use crate::labels;
use crate::model::{
    DependencyCondition, DependencyEdge, NetworkConfig, Project, ServiceNode, VolumeConfig,
};
use crate::runtime::{ContainerSummary, RuntimeClient};
use crate::Result;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Whether one-off run containers are listed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneOff {
    /// List them too
    Include,
    /// Leave them out
    Exclude,
}

/// Queries the runtime for the resources of a stack
#[derive(Clone)]
pub struct ResourceEnumerator {
    client: Arc<dyn RuntimeClient>,
}

impl ResourceEnumerator {
    /// Create an enumerator
    pub fn new(client: Arc<dyn RuntimeClient>) -> Self {
        Self { client }
    }

    /// Containers labeled with the stack name, stopped ones included
    pub async fn list_containers(
        &self,
        ctx: &OperationContext,
        project: &str,
        one_off: OneOff,
    ) -> Result<Vec<ContainerSummary>> {
        let filter = labels::project_filter(project);
        let containers = ctx.guard(self.client.list_containers(&filter)).await??;
        let containers: Vec<ContainerSummary> = containers
            .into_iter()
            .filter(|container| one_off == OneOff::Include || !is_one_off(container))
            .collect();
        debug!(
            "Found {} containers for project '{}'",
            containers.len(),
            project
        );
        Ok(containers)
    }

    /// Networks of the stack keyed by their model key
    pub async fn actual_networks(
        &self,
        ctx: &OperationContext,
        project: &str,
    ) -> Result<IndexMap<String, NetworkConfig>> {
        let filter = labels::project_filter(project);
        let networks = ctx.guard(self.client.list_networks(&filter)).await??;
        Ok(networks
            .into_iter()
            .filter_map(|network| {
                let key = network.labels.get(labels::NETWORK)?.clone();
                Some((key, NetworkConfig::owned(&network.name)))
            })
            .collect())
    }

    /// Volumes of the stack keyed by their model key
    pub async fn actual_volumes(
        &self,
        ctx: &OperationContext,
        project: &str,
    ) -> Result<IndexMap<String, VolumeConfig>> {
        let filter = labels::project_filter(project);
        let volumes = ctx.guard(self.client.list_volumes(&filter)).await??;
        Ok(volumes
            .into_iter()
            .filter_map(|volume| {
                let key = volume.labels.get(labels::VOLUME)?.clone();
                Some((key, VolumeConfig::owned(&volume.name)))
            })
            .collect())
    }

    /// Rebuild a model for `name` from its live resources.
    ///
    /// One-off containers are ignored. Services come from the service
    /// labels, their dependencies from the `depends_on` label, downgraded to
    /// optional. Networks and volumes are the ones actually present.
    pub async fn project_from_resources(
        &self,
        ctx: &OperationContext,
        name: &str,
        containers: &[ContainerSummary],
    ) -> Result<Project> {
        let mut project = Project::new(name);

        for container in containers.iter().filter(|c| !is_one_off(c)) {
            let Some(service) = container.label(labels::SERVICE) else {
                continue;
            };
            if project.services.contains_key(service) {
                continue;
            }
            let mut node = ServiceNode::new(service).with_image(&container.image);
            if let Some(value) = container.label(labels::DEPENDS_ON) {
                node.depends_on = parse_depends_on(value);
            }
            project = project.with_service(node);
        }
        project.relax_dependencies();

        project.networks = self.actual_networks(ctx, &project.name).await?;
        project.volumes = self.actual_volumes(ctx, &project.name).await?;

        info!(
            "Recovered project '{}' from live resources: {} services, {} networks, {} volumes",
            project.name,
            project.services.len(),
            project.networks.len(),
            project.volumes.len()
        );
        Ok(project)
    }
}

/// Parse a `depends_on` label value, `name:condition:restart[,...]`.
///
/// Unknown conditions fall back to `service_started`.
pub fn parse_depends_on(value: &str) -> BTreeMap<String, DependencyEdge> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let mut parts = entry.split(':');
            let name = parts.next().filter(|name| !name.is_empty())?;
            let condition = parts
                .next()
                .and_then(DependencyCondition::from_label)
                .unwrap_or_default();
            Some((
                name.to_string(),
                DependencyEdge {
                    required: true,
                    condition,
                },
            ))
        })
        .collect()
}

/// Whether the container was created by a one-off run
pub fn is_one_off(container: &ContainerSummary) -> bool {
    container
        .label(labels::ONE_OFF)
        .is_some_and(labels::is_one_off_value)
}

/// Progress identifier of a container
pub fn progress_name(container: &ContainerSummary) -> String {
    format!("Container {}", container.name())
}

/// Containers belonging to `service`
pub fn for_service(containers: &[ContainerSummary], service: &str) -> Vec<ContainerSummary> {
    containers
        .iter()
        .filter(|container| container.label(labels::SERVICE) == Some(service))
        .cloned()
        .collect()
}

/// Containers of the stack that the model does not account for.
///
/// A one-off container is orphaned once it has exited; any other container
/// is orphaned when its service is not declared.
pub fn orphaned(containers: &[ContainerSummary], project: &Project) -> Vec<ContainerSummary> {
    containers
        .iter()
        .filter(|container| {
            if is_one_off(container) {
                return matches!(container.state.as_str(), "exited" | "dead");
            }
            container
                .label(labels::SERVICE)
                .is_none_or(|service| !project.services.contains_key(service))
        })
        .cloned()
        .collect()
}
