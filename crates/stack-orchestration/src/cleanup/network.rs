//! Network cleanup.

use super::Operation;
use crate::context::OperationContext;
use crate::labels;
use crate::model::Project;
use crate::progress::{Event, NOTHING_TO_REMOVE, STILL_IN_USE};
use crate::runtime::RuntimeClient;
use crate::{Error, Result};
use tracing::debug;

/// One removal per network owned by the stack; external networks are skipped
pub fn plan(project: &Project) -> Vec<Operation> {
    project
        .networks
        .iter()
        .filter(|(key, network)| {
            if network.external {
                debug!("Skipping external network '{}' ({})", key, network.name);
            }
            !network.external
        })
        .map(|(key, network)| Operation::RemoveNetwork {
            key: key.clone(),
            project: project.name.clone(),
            name: network.name.clone(),
        })
        .collect()
}

/// Remove the live networks created for model network `key`.
///
/// Networks with containers still attached are left in place with a
/// warning. A network vanishing in between is not an error.
pub async fn remove_network(
    ctx: &OperationContext,
    client: &dyn RuntimeClient,
    key: &str,
    project: &str,
    name: &str,
) -> Result<()> {
    let filter = labels::network_filter(project, key);
    let networks = ctx.guard(client.list_networks(&filter)).await??;
    if networks.is_empty() {
        debug!("Network '{}' not found, nothing to remove", name);
        return Ok(());
    }

    let id = format!("Network {name}");
    ctx.event(Event::removing(&id));

    let mut handled = 0;
    for network in networks.iter().filter(|network| network.name == name) {
        let details = match ctx.guard(client.inspect_network(&network.id)).await? {
            Ok(details) => details,
            Err(e) if e.is_not_found() => {
                ctx.event(Event::warning(&id, NOTHING_TO_REMOVE));
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if !details.containers.is_empty() {
            debug!(
                "Network '{}' still has {} attached containers",
                name,
                details.containers.len()
            );
            ctx.event(Event::warning(&id, STILL_IN_USE));
            handled += 1;
            continue;
        }

        match ctx.guard(client.remove_network(&network.id)).await? {
            Ok(()) => {}
            Err(e) if e.is_not_found() => continue,
            Err(e) => {
                ctx.event(Event::error(&id, "Error while Removing"));
                return Err(Error::Removal {
                    resource: id,
                    source: e,
                });
            }
        }
        ctx.event(Event::removed(&id));
        handled += 1;
    }

    if handled == 0 {
        // Listed at first, then removed by someone else.
        ctx.event(Event::warning(&id, NOTHING_TO_REMOVE));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::model::NetworkConfig;
    use crate::progress::Phase;
    use crate::runtime::RuntimeError;
    use crate::test_support::{FakeRuntime, RecordingProgress};
    use std::sync::Arc;

    fn context(progress: &Arc<RecordingProgress>) -> OperationContext {
        OperationContext::new(progress.clone(), &EngineConfig::default())
    }

    #[test]
    fn test_plan_skips_external() {
        let mut project = Project::new("demo").with_network("default");
        project
            .networks
            .insert("shared".to_string(), NetworkConfig::external("shared"));

        assert_eq!(
            plan(&project),
            vec![Operation::RemoveNetwork {
                key: "default".to_string(),
                project: "demo".to_string(),
                name: "demo_default".to_string(),
            }]
        );
    }

    #[smol_potat::test]
    async fn test_remove_network() {
        let runtime = FakeRuntime::new();
        runtime.add_network("demo", "default");
        let progress = Arc::new(RecordingProgress::new());

        remove_network(&context(&progress), &runtime, "default", "demo", "demo_default")
            .await
            .unwrap();

        assert!(runtime.networks().is_empty());
        assert_eq!(
            progress.phases("Network demo_default"),
            vec![
                (Phase::Working, "Removing".to_string()),
                (Phase::Done, "Removed".to_string()),
            ]
        );
    }

    #[smol_potat::test]
    async fn test_network_in_use_is_kept() {
        let runtime = FakeRuntime::new();
        runtime.add_network("demo", "default");
        let web = runtime.add_container("demo", "web");
        runtime.attach("demo_default", &web);
        let progress = Arc::new(RecordingProgress::new());

        remove_network(&context(&progress), &runtime, "default", "demo", "demo_default")
            .await
            .unwrap();

        assert_eq!(runtime.networks(), vec!["demo_default"]);
        assert!(!runtime.called("remove_network:demo_default"));
        assert!(progress.has("Network demo_default", Phase::Warning, STILL_IN_USE));
    }

    #[smol_potat::test]
    async fn test_missing_network_is_noop() {
        let runtime = FakeRuntime::new();
        let progress = Arc::new(RecordingProgress::new());

        remove_network(&context(&progress), &runtime, "default", "demo", "demo_default")
            .await
            .unwrap();

        assert!(progress.events().is_empty());
    }

    #[smol_potat::test]
    async fn test_network_vanishing_during_inspect() {
        let runtime = FakeRuntime::new();
        runtime.add_network("demo", "default");
        runtime.fail(
            "inspect_network:demo_default",
            RuntimeError::NotFound("network demo_default".into()),
        );
        let progress = Arc::new(RecordingProgress::new());

        remove_network(&context(&progress), &runtime, "default", "demo", "demo_default")
            .await
            .unwrap();

        assert!(progress.has("Network demo_default", Phase::Warning, NOTHING_TO_REMOVE));
    }

    #[smol_potat::test]
    async fn test_network_vanishing_during_remove() {
        let runtime = FakeRuntime::new();
        runtime.add_network("demo", "default");
        runtime.fail(
            "remove_network:demo_default",
            RuntimeError::NotFound("network demo_default".into()),
        );
        let progress = Arc::new(RecordingProgress::new());

        remove_network(&context(&progress), &runtime, "default", "demo", "demo_default")
            .await
            .unwrap();

        assert!(progress.has("Network demo_default", Phase::Warning, NOTHING_TO_REMOVE));
    }

    #[smol_potat::test]
    async fn test_network_removal_failure() {
        let runtime = FakeRuntime::new();
        runtime.add_network("demo", "default");
        runtime.fail(
            "remove_network:demo_default",
            RuntimeError::Other("daemon unavailable".into()),
        );
        let progress = Arc::new(RecordingProgress::new());

        let result =
            remove_network(&context(&progress), &runtime, "default", "demo", "demo_default").await;

        assert!(matches!(
            result,
            Err(Error::Removal { resource, .. }) if resource == "Network demo_default"
        ));
        assert!(progress.has("Network demo_default", Phase::Error, "Error while Removing"));
    }
}
