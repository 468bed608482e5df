//! In-memory runtime and progress recorder for tests.
//!
//! [`FakeRuntime`] keeps containers, networks, images and volumes in memory
//! and logs every call as `op:target` (e.g. `stop:demo-web-1`). Failures and
//! delays can be injected per `op:target` key. Container IDs equal their
//! names.

use crate::cleanup::image::normalize_reference;
use crate::labels;
use crate::model::Hook;
use crate::progress::{Event, Phase, ProgressWriter};
use crate::runtime::{
    ContainerSummary, Filter, ImageSummary, NetworkDetails, NetworkSummary, RuntimeClient,
    RuntimeError, RuntimeResult, VolumeSummary,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

struct FakeNetwork {
    summary: NetworkSummary,
    attached: Vec<String>,
}

#[derive(Default)]
struct State {
    containers: Vec<ContainerSummary>,
    networks: Vec<FakeNetwork>,
    images: Vec<ImageSummary>,
    volumes: Vec<VolumeSummary>,
    failures: HashMap<String, RuntimeError>,
    delays: HashMap<String, Duration>,
    stop_timeouts: HashMap<String, Option<Duration>>,
    calls: Vec<String>,
}

/// In-memory [`RuntimeClient`]
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn stack_labels(project: &str, pairs: &[(&str, &str)]) -> HashMap<String, String> {
    let mut labels: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    labels.insert(labels::PROJECT.to_string(), project.to_string());
    labels
}

impl FakeRuntime {
    /// Empty runtime
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_number(&self, prefix: &str) -> usize {
        self.lock()
            .containers
            .iter()
            .filter(|c| {
                c.id.strip_prefix(prefix)
                    .is_some_and(|rest| rest.parse::<usize>().is_ok())
            })
            .count()
            + 1
    }

    fn insert_container(&self, name: String, image: String, labels: HashMap<String, String>) {
        self.lock().containers.push(ContainerSummary {
            id: name.clone(),
            names: vec![format!("/{name}")],
            image,
            labels,
            state: "running".to_string(),
        });
    }

    /// Add a running service container named `<project>-<service>-<n>`
    pub fn add_container(&self, project: &str, service: &str) -> String {
        self.add_container_labeled(project, service, &[])
    }

    /// Add a service container carrying a `depends_on` label
    pub fn add_container_with_dependencies(
        &self,
        project: &str,
        service: &str,
        depends_on: &str,
    ) -> String {
        self.add_container_labeled(project, service, &[(labels::DEPENDS_ON, depends_on)])
    }

    fn add_container_labeled(&self, project: &str, service: &str, extra: &[(&str, &str)]) -> String {
        let prefix = format!("{project}-{service}-");
        let name = format!("{prefix}{}", self.next_number(&prefix));
        let mut labels = stack_labels(
            project,
            &[(labels::SERVICE, service), (labels::ONE_OFF, "False")],
        );
        labels.extend(
            extra
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        );
        self.insert_container(name.clone(), format!("{project}-{service}"), labels);
        name
    }

    /// Add a one-off container named `<project>-<service>-run-<n>`
    pub fn add_one_off(&self, project: &str, service: &str) -> String {
        let prefix = format!("{project}-{service}-run-");
        let name = format!("{prefix}{}", self.next_number(&prefix));
        let labels = stack_labels(
            project,
            &[(labels::SERVICE, service), (labels::ONE_OFF, "True")],
        );
        self.insert_container(name.clone(), format!("{project}-{service}"), labels);
        name
    }

    /// Change the state of a container
    pub fn set_state(&self, id: &str, state: &str) {
        let mut guard = self.lock();
        if let Some(container) = guard.containers.iter_mut().find(|c| c.id == id) {
            container.state = state.to_string();
        }
    }

    /// Add a network named `<project>_<key>`
    pub fn add_network(&self, project: &str, key: &str) -> String {
        let name = format!("{project}_{key}");
        self.lock().networks.push(FakeNetwork {
            summary: NetworkSummary {
                id: name.clone(),
                name: name.clone(),
                labels: stack_labels(project, &[(labels::NETWORK, key)]),
            },
            attached: Vec::new(),
        });
        name
    }

    /// Attach a container to a network
    pub fn attach(&self, network: &str, container: &str) {
        let mut guard = self.lock();
        if let Some(network) = guard.networks.iter_mut().find(|n| n.summary.name == network) {
            network.attached.push(container.to_string());
        }
    }

    /// Add an image tagged `reference` (normalized to an explicit tag)
    pub fn add_image(&self, reference: &str, image_labels: &[(&str, &str)]) {
        let tag = normalize_reference(reference);
        self.lock().images.push(ImageSummary {
            id: format!("sha256:{tag}"),
            repo_tags: vec![tag],
            labels: image_labels
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        });
    }

    /// Add a volume named `<project>_<key>`
    pub fn add_volume(&self, project: &str, key: &str) -> String {
        let name = format!("{project}_{key}");
        self.lock().volumes.push(VolumeSummary {
            name: name.clone(),
            labels: stack_labels(project, &[(labels::VOLUME, key)]),
        });
        name
    }

    /// Fail every call matching `op:target` with `error`
    pub fn fail(&self, key: &str, error: RuntimeError) {
        self.lock().failures.insert(key.to_string(), error);
    }

    /// Delay every call matching `op:target`
    pub fn delay(&self, key: &str, duration: Duration) {
        self.lock().delays.insert(key.to_string(), duration);
    }

    /// Calls issued so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Whether a call was issued
    pub fn called(&self, call: &str) -> bool {
        self.lock().calls.iter().any(|c| c == call)
    }

    /// Index of the first matching call
    pub fn position(&self, call: &str) -> Option<usize> {
        self.lock().calls.iter().position(|c| c == call)
    }

    /// Timeout passed to the last stop of a container
    pub fn stop_timeout(&self, id: &str) -> Option<Option<Duration>> {
        self.lock().stop_timeouts.get(id).copied()
    }

    /// Largest number of calls observed in flight at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// All containers
    pub fn snapshot(&self) -> Vec<ContainerSummary> {
        self.lock().containers.clone()
    }

    /// Containers of a service
    pub fn containers_of(&self, project: &str, service: &str) -> Vec<ContainerSummary> {
        self.snapshot()
            .into_iter()
            .filter(|c| {
                c.label(labels::PROJECT) == Some(project) && c.label(labels::SERVICE) == Some(service)
            })
            .collect()
    }

    /// Names of the remaining containers
    pub fn containers(&self) -> Vec<String> {
        self.lock().containers.iter().map(|c| c.id.clone()).collect()
    }

    /// Names of the remaining networks
    pub fn networks(&self) -> Vec<String> {
        self.lock()
            .networks
            .iter()
            .map(|n| n.summary.name.clone())
            .collect()
    }

    /// Tags of the remaining images
    pub fn images(&self) -> Vec<String> {
        self.lock()
            .images
            .iter()
            .flat_map(|i| i.repo_tags.clone())
            .collect()
    }

    /// Names of the remaining volumes
    pub fn volumes(&self) -> Vec<String> {
        self.lock().volumes.iter().map(|v| v.name.clone()).collect()
    }

    /// Log a call, apply its delay and injected failure
    async fn enter(&self, op: &str, target: &str, detail: Option<&str>) -> RuntimeResult<InFlight<'_>> {
        let key = if target.is_empty() {
            op.to_string()
        } else {
            format!("{op}:{target}")
        };
        let delay = {
            let mut guard = self.lock();
            guard.calls.push(match detail {
                Some(detail) => format!("{key}:{detail}"),
                None => key.clone(),
            });
            guard.delays.get(&key).or_else(|| guard.delays.get(op)).copied()
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let in_flight = InFlight(&self.in_flight);

        if let Some(delay) = delay {
            smol::Timer::after(delay).await;
        }
        match self.lock().failures.get(&key) {
            Some(error) => Err(error.clone()),
            None => Ok(in_flight),
        }
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn list_containers(&self, filter: &Filter) -> RuntimeResult<Vec<ContainerSummary>> {
        let _call = self.enter("list_containers", "", None).await?;
        Ok(self
            .lock()
            .containers
            .iter()
            .filter(|c| filter.matches_labels(&c.labels))
            .cloned()
            .collect())
    }

    async fn stop_container(&self, id: &str, timeout: Option<Duration>) -> RuntimeResult<()> {
        let _call = self.enter("stop", id, None).await?;
        let mut guard = self.lock();
        guard.stop_timeouts.insert(id.to_string(), timeout);
        let container = guard
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| RuntimeError::NotFound(format!("No such container: {id}")))?;
        container.state = "exited".to_string();
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool, _volumes: bool) -> RuntimeResult<()> {
        let _call = self.enter("remove", id, None).await?;
        let mut guard = self.lock();
        let before = guard.containers.len();
        guard.containers.retain(|c| c.id != id);
        if guard.containers.len() == before {
            return Err(RuntimeError::NotFound(format!("No such container: {id}")));
        }
        for network in guard.networks.iter_mut() {
            network.attached.retain(|attached| attached != id);
        }
        Ok(())
    }

    async fn exec_hook(&self, id: &str, hook: &Hook) -> RuntimeResult<()> {
        let command = hook.command.join(" ");
        let _call = self.enter("hook", id, Some(&command)).await?;
        if self.lock().containers.iter().any(|c| c.id == id) {
            Ok(())
        } else {
            Err(RuntimeError::NotFound(format!("No such container: {id}")))
        }
    }

    async fn list_networks(&self, filter: &Filter) -> RuntimeResult<Vec<NetworkSummary>> {
        let _call = self.enter("list_networks", "", None).await?;
        Ok(self
            .lock()
            .networks
            .iter()
            .filter(|n| filter.matches_labels(&n.summary.labels))
            .map(|n| n.summary.clone())
            .collect())
    }

    async fn inspect_network(&self, id: &str) -> RuntimeResult<NetworkDetails> {
        let _call = self.enter("inspect_network", id, None).await?;
        self.lock()
            .networks
            .iter()
            .find(|n| n.summary.id == id)
            .map(|n| NetworkDetails {
                id: n.summary.id.clone(),
                name: n.summary.name.clone(),
                containers: n.attached.clone(),
            })
            .ok_or_else(|| RuntimeError::NotFound(format!("network {id} not found")))
    }

    async fn remove_network(&self, id: &str) -> RuntimeResult<()> {
        let _call = self.enter("remove_network", id, None).await?;
        let mut guard = self.lock();
        let index = guard
            .networks
            .iter()
            .position(|n| n.summary.id == id)
            .ok_or_else(|| RuntimeError::NotFound(format!("network {id} not found")))?;
        if !guard.networks[index].attached.is_empty() {
            return Err(RuntimeError::Conflict(format!(
                "network {id} has active endpoints"
            )));
        }
        guard.networks.remove(index);
        Ok(())
    }

    async fn list_images(&self, filter: &Filter) -> RuntimeResult<Vec<ImageSummary>> {
        let _call = self.enter("list_images", "", None).await?;
        let references: Vec<String> = filter
            .references
            .iter()
            .map(|r| normalize_reference(r))
            .collect();
        Ok(self
            .lock()
            .images
            .iter()
            .filter(|i| filter.matches_labels(&i.labels))
            .filter(|i| {
                references.is_empty() || i.repo_tags.iter().any(|tag| references.contains(tag))
            })
            .cloned()
            .collect())
    }

    async fn remove_image(&self, reference: &str) -> RuntimeResult<()> {
        let _call = self.enter("remove_image", reference, None).await?;
        let tag = normalize_reference(reference);
        let mut guard = self.lock();
        let index = guard
            .images
            .iter()
            .position(|i| i.id == reference || i.repo_tags.contains(&tag))
            .ok_or_else(|| RuntimeError::NotFound(format!("No such image: {reference}")))?;
        let in_use = guard
            .containers
            .iter()
            .any(|c| normalize_reference(&c.image) == tag);
        if in_use {
            return Err(RuntimeError::Conflict(format!(
                "image {reference} is being used by a container"
            )));
        }
        guard.images.remove(index);
        Ok(())
    }

    async fn list_volumes(&self, filter: &Filter) -> RuntimeResult<Vec<VolumeSummary>> {
        let _call = self.enter("list_volumes", "", None).await?;
        Ok(self
            .lock()
            .volumes
            .iter()
            .filter(|v| filter.matches_labels(&v.labels))
            .cloned()
            .collect())
    }

    async fn inspect_volume(&self, name: &str) -> RuntimeResult<VolumeSummary> {
        let _call = self.enter("inspect_volume", name, None).await?;
        self.lock()
            .volumes
            .iter()
            .find(|v| v.name == name)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("No such volume: {name}")))
    }

    async fn remove_volume(&self, name: &str, _force: bool) -> RuntimeResult<()> {
        let _call = self.enter("remove_volume", name, None).await?;
        let mut guard = self.lock();
        let before = guard.volumes.len();
        guard.volumes.retain(|v| v.name != name);
        if guard.volumes.len() == before {
            return Err(RuntimeError::NotFound(format!("No such volume: {name}")));
        }
        Ok(())
    }
}

/// Progress sink that keeps every event
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<Event>>,
}

impl RecordingProgress {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// All events, in emission order
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// `(phase, message)` pairs recorded for a resource
    pub fn phases(&self, id: &str) -> Vec<(Phase, String)> {
        self.events()
            .into_iter()
            .filter(|event| event.id == id)
            .map(|event| (event.phase, event.message))
            .collect()
    }

    /// Whether a given event was recorded
    pub fn has(&self, id: &str, phase: Phase, message: &str) -> bool {
        self.position(id, phase, message).is_some()
    }

    /// Index of the first matching event
    pub fn position(&self, id: &str, phase: Phase, message: &str) -> Option<usize> {
        self.events()
            .iter()
            .position(|e| e.id == id && e.phase == phase && e.message == message)
    }
}

impl ProgressWriter for RecordingProgress {
    fn event(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
