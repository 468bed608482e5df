//! Stack teardown entry point.

use crate::aggregate::run_operations;
use crate::cleanup::{self, Operation};
use crate::config::{EngineConfig, ImageRemoval, TeardownOptions};
use crate::context::OperationContext;
use crate::executor::ContainerExecutor;
use crate::graph::in_reverse_dependency_order;
use crate::model::Project;
use crate::progress::ProgressWriter;
use crate::provider::ProviderRegistry;
use crate::resources::{self, OneOff, ResourceEnumerator};
use crate::runtime::RuntimeClient;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// How a teardown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// Resources were found and processed
    Completed,
    /// The stack had nothing left to remove
    NothingToRemove,
}

/// Tears stacks down against a container runtime
pub struct Teardown {
    client: Arc<dyn RuntimeClient>,
    progress: Arc<dyn ProgressWriter>,
    providers: Arc<ProviderRegistry>,
    config: EngineConfig,
}

impl Teardown {
    /// Create a teardown engine without provider plugins
    pub fn new(
        client: Arc<dyn RuntimeClient>,
        progress: Arc<dyn ProgressWriter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            client,
            progress,
            providers: Arc::new(ProviderRegistry::new()),
            config,
        }
    }

    /// Use the given provider plugins for provider-delegated services
    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = Arc::new(providers);
        self
    }

    /// A fresh context for one teardown
    pub fn context(&self) -> OperationContext {
        OperationContext::new(self.progress.clone(), &self.config)
    }

    /// Tear the stack `name` down
    pub async fn down(&self, name: &str, options: TeardownOptions) -> Result<TeardownOutcome> {
        self.down_with_context(&self.context(), name, options).await
    }

    /// Tear the stack `name` down under a caller-owned context, e.g. one
    /// sharing a [`crate::CancellationToken`] with a signal handler
    pub async fn down_with_context(
        &self,
        ctx: &OperationContext,
        name: &str,
        options: TeardownOptions,
    ) -> Result<TeardownOutcome> {
        let name = name.to_lowercase();
        let enumerator = ResourceEnumerator::new(self.client.clone());

        let one_off = if options.remove_orphans {
            OneOff::Include
        } else {
            OneOff::Exclude
        };
        let containers = enumerator.list_containers(ctx, &name, one_off).await?;

        let explicit = options.project.is_some();
        let project = match options.project.clone() {
            Some(project) => project,
            None => {
                enumerator
                    .project_from_resources(ctx, &name, &containers)
                    .await?
            }
        };

        let services = check_selected_services(&options.services, &project, explicit)?;
        if !options.services.is_empty() && services.is_empty() {
            info!(
                "Any of the services {:?} not running in project \"{}\"",
                options.services, name
            );
            return Ok(TeardownOutcome::NothingToRemove);
        }

        let timeout = options.timeout.or(self.config.default_stop_timeout);
        let executor = ContainerExecutor::new(self.client.clone(), self.providers.clone());
        let shared_project = Arc::new(project.clone());
        let shared_containers = Arc::new(containers.clone());

        info!("Tearing down project '{}'", name);
        in_reverse_dependency_order(ctx, &project, &services, |service| {
            let ctx = ctx.clone();
            let executor = executor.clone();
            let project = shared_project.clone();
            let containers = shared_containers.clone();
            let volumes = options.volumes;
            async move {
                let node = project.service(&service)?;
                let own = resources::for_service(&containers, &service);
                executor
                    .down_service(&ctx, &project, node, own, timeout, volumes)
                    .await
            }
        })
        .await?;

        if options.remove_orphans {
            let orphans = resources::orphaned(&containers, &project);
            if !orphans.is_empty() {
                info!("Removing {} orphan containers", orphans.len());
                executor
                    .remove_containers(ctx, orphans, &[], timeout, false)
                    .await?;
            }
        }

        let operations = self.plan(ctx, &project, &options).await?;

        if containers.is_empty() && operations.is_empty() {
            warn!("Warning: No resource found to remove for project \"{}\".", name);
            return Ok(TeardownOutcome::NothingToRemove);
        }

        run_operations(ctx, self.client.clone(), operations).await?;
        info!("Project '{}' torn down", name);
        Ok(TeardownOutcome::Completed)
    }

    async fn plan(
        &self,
        ctx: &OperationContext,
        project: &Project,
        options: &TeardownOptions,
    ) -> Result<Vec<Operation>> {
        let mut operations = cleanup::network::plan(project);
        if options.images != ImageRemoval::None {
            operations.extend(
                cleanup::image::plan(
                    ctx,
                    self.client.as_ref(),
                    project,
                    options.images,
                    options.remove_orphans,
                )
                .await?,
            );
        }
        if options.volumes {
            operations.extend(cleanup::volume::plan(project));
        }
        Ok(operations)
    }
}

/// Keep the selected services that exist in the model.
///
/// A missing service is an error only for an explicit model: without one, a
/// typo cannot be told apart from a service that is already gone.
fn check_selected_services(
    selected: &[String],
    project: &Project,
    explicit: bool,
) -> Result<Vec<String>> {
    let mut services = Vec::new();
    for service in selected {
        match project.service(service) {
            Ok(_) => services.push(service.clone()),
            Err(e @ Error::ServiceNotFound(_)) if explicit => return Err(e),
            Err(_) => {}
        }
    }
    Ok(services)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceNode;

    fn project() -> Project {
        Project::new("demo")
            .with_service(ServiceNode::new("web"))
            .with_service(ServiceNode::new("db"))
    }

    #[test]
    fn test_check_selected_services_explicit() {
        let selected = vec!["web".to_string(), "typo".to_string()];
        assert!(matches!(
            check_selected_services(&selected, &project(), true),
            Err(Error::ServiceNotFound(name)) if name == "typo"
        ));
    }

    #[test]
    fn test_check_selected_services_recovered() {
        let selected = vec!["web".to_string(), "typo".to_string()];
        assert_eq!(
            check_selected_services(&selected, &project(), false).unwrap(),
            vec!["web"]
        );
        assert!(check_selected_services(&[], &project(), false)
            .unwrap()
            .is_empty());
    }
}
