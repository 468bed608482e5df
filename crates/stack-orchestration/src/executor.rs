//! Container stop/remove executor.
//!
//! Every container goes through `Running -> Stopping -> Stopped -> Removing
//! -> Removed`, or ends in `Failed` when the runtime reports a real error.
//! Containers of one call are processed concurrently; for a given container
//! the stop always precedes the remove.

use crate::aggregate::run_all;
use crate::context::OperationContext;
use crate::model::{Hook, Project, ServiceKind, ServiceNode};
use crate::progress::Event;
use crate::provider::ProviderRegistry;
use crate::resources::progress_name;
use crate::runtime::{ContainerSummary, RuntimeClient};
use crate::{Error, Result};
use futures::future::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Lifecycle phase of a container during teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerPhase {
    /// Not yet touched
    Running,
    /// Hooks and stop in progress
    Stopping,
    /// Stopped, not yet removed
    Stopped,
    /// Remove in progress
    Removing,
    /// Gone
    Removed,
    /// A non-benign runtime error occurred
    Failed,
}

/// Tears down the containers of a service, or hands provider-delegated
/// services over to their plugin
#[derive(Clone)]
pub struct ContainerExecutor {
    client: Arc<dyn RuntimeClient>,
    providers: Arc<ProviderRegistry>,
}

impl ContainerExecutor {
    /// Create an executor
    pub fn new(client: Arc<dyn RuntimeClient>, providers: Arc<ProviderRegistry>) -> Self {
        Self { client, providers }
    }

    /// Tear down one service
    pub async fn down_service(
        &self,
        ctx: &OperationContext,
        project: &Project,
        service: &ServiceNode,
        containers: Vec<ContainerSummary>,
        timeout: Option<Duration>,
        volumes: bool,
    ) -> Result<()> {
        match &service.kind {
            ServiceKind::Provider(provider) => {
                let _permit = ctx.limiter().acquire().await;
                ctx.ensure_active()?;
                let plugin = self.providers.get(&provider.plugin)?;
                info!(
                    "Delegating teardown of '{}' to provider '{}'",
                    service.name, provider.plugin
                );
                plugin.run(project, service, "down").await
            }
            ServiceKind::Runtime => {
                self.remove_containers(ctx, containers, &service.pre_stop, timeout, volumes)
                    .await
            }
        }
    }

    /// Stop and remove containers concurrently, running `hooks` before each
    /// stop. Returns the first failure once every container was processed.
    pub async fn remove_containers(
        &self,
        ctx: &OperationContext,
        containers: Vec<ContainerSummary>,
        hooks: &[Hook],
        timeout: Option<Duration>,
        volumes: bool,
    ) -> Result<()> {
        if containers.is_empty() {
            return Ok(());
        }
        let hooks: Arc<[Hook]> = hooks.into();

        let tasks = containers.into_iter().map(|container| {
            let ctx = ctx.clone();
            let client = self.client.clone();
            let hooks = hooks.clone();
            async move {
                stop_and_remove(&ctx, client.as_ref(), &container, &hooks, timeout, volumes)
                    .await
                    .map(|_| ())
            }
            .boxed()
        });
        run_all(ctx, tasks).await
    }
}

/// Drive one container to `Removed`.
///
/// Returns the terminal phase reached; `Failed` is reported as an error.
pub async fn stop_and_remove(
    ctx: &OperationContext,
    client: &dyn RuntimeClient,
    container: &ContainerSummary,
    hooks: &[Hook],
    timeout: Option<Duration>,
    volumes: bool,
) -> Result<ContainerPhase> {
    let id = progress_name(container);

    if stop(ctx, client, container, hooks, timeout).await? == ContainerPhase::Removed {
        return Ok(ContainerPhase::Removed);
    }

    debug!("{} -> {:?}", id, ContainerPhase::Removing);
    ctx.event(Event::removing(&id));
    match ctx
        .guard(client.remove_container(&container.id, true, volumes))
        .await?
    {
        Ok(()) => {}
        Err(e) if e.is_not_found() || e.is_conflict() => {
            debug!("{} already being removed: {}", id, e);
        }
        Err(e) => {
            debug!("{} -> {:?}", id, ContainerPhase::Failed);
            ctx.event(Event::error(&id, "Error while Removing"));
            return Err(Error::Removal {
                resource: id,
                source: e,
            });
        }
    }
    ctx.event(Event::removed(&id));
    Ok(ContainerPhase::Removed)
}

async fn stop(
    ctx: &OperationContext,
    client: &dyn RuntimeClient,
    container: &ContainerSummary,
    hooks: &[Hook],
    timeout: Option<Duration>,
) -> Result<ContainerPhase> {
    let id = progress_name(container);
    debug!("{} -> {:?}", id, ContainerPhase::Stopping);
    ctx.event(Event::stopping(&id));

    for hook in hooks {
        match ctx.guard(client.exec_hook(&container.id, hook)).await? {
            Ok(()) => {}
            Err(e) if e.is_not_found() || e.is_conflict() => {
                // The container is already stopped or gone.
                debug!("Pre-stop hook skipped for {}: {}", id, e);
                ctx.event(Event::stopped(&id));
                return Ok(ContainerPhase::Stopped);
            }
            Err(e) => {
                ctx.event(Event::error(&id, "Error while Stopping"));
                return Err(e.into());
            }
        }
    }

    match ctx.guard(client.stop_container(&container.id, timeout)).await? {
        Ok(()) => {
            ctx.event(Event::stopped(&id));
            Ok(ContainerPhase::Stopped)
        }
        Err(e) if e.is_not_found() => {
            ctx.event(Event::removed(&id));
            Ok(ContainerPhase::Removed)
        }
        Err(e) => {
            debug!("{} -> {:?}", id, ContainerPhase::Failed);
            ctx.event(Event::error(&id, "Error while Stopping"));
            Err(e.into())
        }
    }
}
