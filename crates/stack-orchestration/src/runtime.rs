//! Container runtime client seam.
//!
//! The teardown engine talks to the runtime only through [`RuntimeClient`].
//! Every call either succeeds or fails with a [`RuntimeError`], which already
//! carries the classification the engine needs: the target is gone, the
//! target is busy, or something else went wrong.

use crate::model::Hook;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Failure vocabulary of the container runtime
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The target does not exist (any more)
    #[error("not found: {0}")]
    NotFound(String),

    /// The target is in use or already being acted upon
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other failure
    #[error("{0}")]
    Other(String),
}

impl RuntimeError {
    /// The target is already absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }

    /// The target is still in use
    pub fn is_conflict(&self) -> bool {
        matches!(self, RuntimeError::Conflict(_))
    }
}

/// Result of a single runtime call
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Selection criteria for list calls.
///
/// Label constraints are AND-ed, references are OR-ed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// `(key, value)` label constraints; a `None` value only requires presence
    pub labels: Vec<(String, Option<String>)>,
    /// Image references
    pub references: Vec<String>,
}

impl Filter {
    /// Empty filter matching everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a label with the given value
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.push((key.to_string(), Some(value.to_string())));
        self
    }

    /// Require a label to be present
    pub fn label_present(mut self, key: &str) -> Self {
        self.labels.push((key.to_string(), None));
        self
    }

    /// Accept an image reference
    pub fn reference(mut self, reference: &str) -> Self {
        self.references.push(reference.to_string());
        self
    }

    /// Check a label set against the label constraints
    pub fn matches_labels(&self, labels: &HashMap<String, String>) -> bool {
        self.labels.iter().all(|(key, expected)| match expected {
            Some(value) => labels.get(key) == Some(value),
            None => labels.contains_key(key),
        })
    }

    /// Render as `--filter` arguments for the docker CLI
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (key, value) in &self.labels {
            args.push("--filter".to_string());
            match value {
                Some(value) => args.push(format!("label={key}={value}")),
                None => args.push(format!("label={key}")),
            }
        }
        for reference in &self.references {
            args.push("--filter".to_string());
            args.push(format!("reference={reference}"));
        }
        args
    }
}

/// A container as returned by a list call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    /// Container ID
    pub id: String,
    /// Container names, possibly with a leading `/`
    pub names: Vec<String>,
    /// Image the container was created from
    pub image: String,
    /// Container labels
    pub labels: HashMap<String, String>,
    /// Runtime state, e.g. `running` or `exited`
    pub state: String,
}

impl ContainerSummary {
    /// Look up a label value
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Primary container name without the leading `/`
    pub fn name(&self) -> &str {
        self.names
            .first()
            .map(|name| name.trim_start_matches('/'))
            .unwrap_or(&self.id)
    }
}

/// A network as returned by a list call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSummary {
    /// Network ID
    pub id: String,
    /// Network name
    pub name: String,
    /// Network labels
    pub labels: HashMap<String, String>,
}

/// Inspected network state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDetails {
    /// Network ID
    pub id: String,
    /// Network name
    pub name: String,
    /// IDs of containers still attached
    pub containers: Vec<String>,
}

/// A local image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    /// Image ID
    pub id: String,
    /// Tags pointing at the image
    pub repo_tags: Vec<String>,
    /// Image labels
    pub labels: HashMap<String, String>,
}

/// A volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSummary {
    /// Volume name
    pub name: String,
    /// Volume labels
    pub labels: HashMap<String, String>,
}

/// Remote API of the container runtime
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// List containers, including stopped ones
    async fn list_containers(&self, filter: &Filter) -> RuntimeResult<Vec<ContainerSummary>>;

    /// Stop a container; the runtime kills it once the timeout elapses
    async fn stop_container(&self, id: &str, timeout: Option<Duration>) -> RuntimeResult<()>;

    /// Remove a container
    async fn remove_container(&self, id: &str, force: bool, volumes: bool) -> RuntimeResult<()>;

    /// Run a lifecycle hook inside a container
    async fn exec_hook(&self, id: &str, hook: &Hook) -> RuntimeResult<()>;

    /// List networks
    async fn list_networks(&self, filter: &Filter) -> RuntimeResult<Vec<NetworkSummary>>;

    /// Inspect a network
    async fn inspect_network(&self, id: &str) -> RuntimeResult<NetworkDetails>;

    /// Remove a network
    async fn remove_network(&self, id: &str) -> RuntimeResult<()>;

    /// List local images
    async fn list_images(&self, filter: &Filter) -> RuntimeResult<Vec<ImageSummary>>;

    /// Remove an image by reference
    async fn remove_image(&self, reference: &str) -> RuntimeResult<()>;

    /// List volumes
    async fn list_volumes(&self, filter: &Filter) -> RuntimeResult<Vec<VolumeSummary>>;

    /// Inspect a volume
    async fn inspect_volume(&self, name: &str) -> RuntimeResult<VolumeSummary>;

    /// Remove a volume
    async fn remove_volume(&self, name: &str, force: bool) -> RuntimeResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches_labels() {
        let filter = Filter::new()
            .label("com.docker.compose.project", "demo")
            .label_present("com.docker.compose.service");

        let mut labels = HashMap::new();
        labels.insert("com.docker.compose.project".to_string(), "demo".to_string());
        assert!(!filter.matches_labels(&labels));

        labels.insert("com.docker.compose.service".to_string(), "web".to_string());
        assert!(filter.matches_labels(&labels));

        labels.insert("com.docker.compose.project".to_string(), "other".to_string());
        assert!(!filter.matches_labels(&labels));
    }

    #[test]
    fn test_filter_cli_args() {
        let filter = Filter::new()
            .label("com.docker.compose.project", "demo")
            .label_present("com.docker.compose.volume")
            .reference("demo-web");

        assert_eq!(
            filter.to_cli_args(),
            vec![
                "--filter",
                "label=com.docker.compose.project=demo",
                "--filter",
                "label=com.docker.compose.volume",
                "--filter",
                "reference=demo-web",
            ]
        );
    }

    #[test]
    fn test_container_name_strips_slash() {
        let container = ContainerSummary {
            id: "abc123".to_string(),
            names: vec!["/demo-web-1".to_string()],
            image: "nginx".to_string(),
            labels: HashMap::new(),
            state: "running".to_string(),
        };
        assert_eq!(container.name(), "demo-web-1");

        let unnamed = ContainerSummary {
            names: vec![],
            ..container
        };
        assert_eq!(unnamed.name(), "abc123");
    }

    #[test]
    fn test_error_classification() {
        assert!(RuntimeError::NotFound("x".into()).is_not_found());
        assert!(!RuntimeError::NotFound("x".into()).is_conflict());
        assert!(RuntimeError::Conflict("x".into()).is_conflict());
        assert!(!RuntimeError::Other("x".into()).is_not_found());
    }
}
