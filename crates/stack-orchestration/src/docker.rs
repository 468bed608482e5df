//! [`RuntimeClient`] backed by the `docker` command line.
//!
//! List calls fetch IDs with `-q` and then `inspect` them, since label values
//! (e.g. the dependency list) may contain the separators of the tabular
//! formats. Daemon errors are classified from stderr.

use crate::model::Hook;
use crate::runtime::{
    ContainerSummary, Filter, ImageSummary, NetworkDetails, NetworkSummary, RuntimeClient,
    RuntimeError, RuntimeResult, VolumeSummary,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use smol::process::Command;
use std::collections::HashMap;
use std::process::Output;
use std::time::Duration;
use tracing::debug;

/// Docker CLI client
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    /// Use `docker` from `PATH`
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a specific binary, e.g. `podman`
    pub fn with_binary(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }

    async fn output(&self, args: &[String]) -> RuntimeResult<Output> {
        debug!("Running {} {}", self.binary, args.join(" "));
        Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| RuntimeError::Other(format!("failed to run {}: {}", self.binary, e)))
    }

    async fn run(&self, args: &[String]) -> RuntimeResult<String> {
        let output = self.output(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(classify(String::from_utf8_lossy(&output.stderr).trim()))
        }
    }

    async fn ids(&self, mut args: Vec<String>, filter: &Filter) -> RuntimeResult<Vec<String>> {
        args.extend(filter.to_cli_args());
        let output = self.run(&args).await?;
        let mut ids: Vec<String> = Vec::new();
        for id in output.lines().map(str::trim).filter(|id| !id.is_empty()) {
            if !ids.iter().any(|known| known == id) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    async fn inspect<T: DeserializeOwned>(
        &self,
        command: &[&str],
        ids: &[String],
    ) -> RuntimeResult<Vec<T>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut args: Vec<String> = command.iter().map(|arg| arg.to_string()).collect();
        args.extend(ids.iter().cloned());
        let output = self.output(&args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() {
            return parse(&stdout);
        }

        // Objects removed since they were listed are reported on stderr while
        // the others are still printed.
        let error = classify(String::from_utf8_lossy(&output.stderr).trim());
        if !error.is_not_found() {
            return Err(error);
        }
        debug!("Some of {:?} vanished before inspect: {}", ids, error);
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        parse(&stdout)
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

/// Map daemon error text onto the runtime failure vocabulary
pub(crate) fn classify(stderr: &str) -> RuntimeError {
    let lower = stderr.to_lowercase();
    let message = stderr.to_string();
    if lower.contains("executable file not found") {
        // A broken hook command, not a missing container.
        RuntimeError::Other(message)
    } else if lower.contains("no such") || lower.contains("not found") {
        RuntimeError::NotFound(message)
    } else if lower.contains("in use")
        || lower.contains("conflict")
        || lower.contains("already in progress")
        || lower.contains("active endpoints")
        || lower.contains("is not running")
    {
        RuntimeError::Conflict(message)
    } else {
        RuntimeError::Other(message)
    }
}

fn parse<T: DeserializeOwned>(json: &str) -> RuntimeResult<Vec<T>> {
    serde_json::from_str(json)
        .map_err(|e| RuntimeError::Other(format!("unexpected docker output: {e}")))
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerJson {
    id: String,
    name: String,
    config: ContainerConfigJson,
    state: ContainerStateJson,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerConfigJson {
    image: String,
    labels: Option<HashMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerStateJson {
    status: String,
}

impl From<ContainerJson> for ContainerSummary {
    fn from(json: ContainerJson) -> Self {
        Self {
            id: json.id,
            names: vec![json.name],
            image: json.config.image,
            labels: json.config.labels.unwrap_or_default(),
            state: json.state.status,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkJson {
    id: String,
    name: String,
    labels: Option<HashMap<String, String>>,
    containers: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageJson {
    id: String,
    repo_tags: Option<Vec<String>>,
    config: Option<ImageConfigJson>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageConfigJson {
    labels: Option<HashMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeJson {
    name: String,
    labels: Option<HashMap<String, String>>,
}

impl From<VolumeJson> for VolumeSummary {
    fn from(json: VolumeJson) -> Self {
        Self {
            name: json.name,
            labels: json.labels.unwrap_or_default(),
        }
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

#[async_trait]
impl RuntimeClient for DockerCli {
    async fn list_containers(&self, filter: &Filter) -> RuntimeResult<Vec<ContainerSummary>> {
        let ids = self
            .ids(args(&["ps", "-a", "-q", "--no-trunc"]), filter)
            .await?;
        let containers: Vec<ContainerJson> = self.inspect(&["container", "inspect"], &ids).await?;
        Ok(containers.into_iter().map(Into::into).collect())
    }

    async fn stop_container(&self, id: &str, timeout: Option<Duration>) -> RuntimeResult<()> {
        let mut command = args(&["stop"]);
        if let Some(timeout) = timeout {
            command.push("-t".to_string());
            command.push(timeout.as_secs().to_string());
        }
        command.push(id.to_string());
        self.run(&command).await.map(|_| ())
    }

    async fn remove_container(&self, id: &str, force: bool, volumes: bool) -> RuntimeResult<()> {
        let mut command = args(&["rm"]);
        if force {
            command.push("-f".to_string());
        }
        if volumes {
            command.push("-v".to_string());
        }
        command.push(id.to_string());
        self.run(&command).await.map(|_| ())
    }

    async fn exec_hook(&self, id: &str, hook: &Hook) -> RuntimeResult<()> {
        let mut command = args(&["exec"]);
        if let Some(user) = &hook.user {
            command.push("-u".to_string());
            command.push(user.clone());
        }
        command.push(id.to_string());
        command.extend(hook.command.iter().cloned());
        self.run(&command).await.map(|_| ())
    }

    async fn list_networks(&self, filter: &Filter) -> RuntimeResult<Vec<NetworkSummary>> {
        let ids = self
            .ids(args(&["network", "ls", "-q", "--no-trunc"]), filter)
            .await?;
        let networks: Vec<NetworkJson> = self.inspect(&["network", "inspect"], &ids).await?;
        Ok(networks
            .into_iter()
            .map(|network| NetworkSummary {
                id: network.id,
                name: network.name,
                labels: network.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect_network(&self, id: &str) -> RuntimeResult<NetworkDetails> {
        let networks: Vec<NetworkJson> = self
            .inspect(&["network", "inspect"], &[id.to_string()])
            .await?;
        let network = networks
            .into_iter()
            .next()
            .ok_or_else(|| RuntimeError::NotFound(format!("network {id}")))?;
        Ok(NetworkDetails {
            id: network.id,
            name: network.name,
            containers: network
                .containers
                .unwrap_or_default()
                .into_keys()
                .collect(),
        })
    }

    async fn remove_network(&self, id: &str) -> RuntimeResult<()> {
        self.run(&args(&["network", "rm", id])).await.map(|_| ())
    }

    async fn list_images(&self, filter: &Filter) -> RuntimeResult<Vec<ImageSummary>> {
        let ids = self
            .ids(args(&["image", "ls", "-q", "--no-trunc"]), filter)
            .await?;
        let images: Vec<ImageJson> = self.inspect(&["image", "inspect"], &ids).await?;
        Ok(images
            .into_iter()
            .map(|image| ImageSummary {
                id: image.id,
                repo_tags: image.repo_tags.unwrap_or_default(),
                labels: image
                    .config
                    .and_then(|config| config.labels)
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn remove_image(&self, reference: &str) -> RuntimeResult<()> {
        self.run(&args(&["image", "rm", reference])).await.map(|_| ())
    }

    async fn list_volumes(&self, filter: &Filter) -> RuntimeResult<Vec<VolumeSummary>> {
        let names = self.ids(args(&["volume", "ls", "-q"]), filter).await?;
        let volumes: Vec<VolumeJson> = self.inspect(&["volume", "inspect"], &names).await?;
        Ok(volumes.into_iter().map(Into::into).collect())
    }

    async fn inspect_volume(&self, name: &str) -> RuntimeResult<VolumeSummary> {
        let volumes: Vec<VolumeJson> = self
            .inspect(&["volume", "inspect"], &[name.to_string()])
            .await?;
        volumes
            .into_iter()
            .next()
            .map(Into::into)
            .ok_or_else(|| RuntimeError::NotFound(format!("volume {name}")))
    }

    async fn remove_volume(&self, name: &str, force: bool) -> RuntimeResult<()> {
        let mut command = args(&["volume", "rm"]);
        if force {
            command.push("-f".to_string());
        }
        command.push(name.to_string());
        self.run(&command).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert!(classify("Error response from daemon: No such container: abc").is_not_found());
        assert!(classify("Error: network demo_default not found").is_not_found());
        assert!(
            classify("Error response from daemon: remove demo_data: volume is in use - [abc]")
                .is_conflict()
        );
        assert!(
            classify("error while removing network: network demo_default has active endpoints")
                .is_conflict()
        );
        assert!(
            classify("Error response from daemon: removal of container abc is already in progress")
                .is_conflict()
        );
        assert!(matches!(
            classify("OCI runtime exec failed: exec: \"drain\": executable file not found in $PATH"),
            RuntimeError::Other(_)
        ));
        assert!(matches!(
            classify("Cannot connect to the Docker daemon"),
            RuntimeError::Other(_)
        ));
    }

    #[test]
    fn test_parse_container_inspect() {
        let json = r#"[{
            "Id": "abc123",
            "Name": "/demo-web-1",
            "Config": {
                "Image": "demo-web",
                "Labels": {
                    "com.docker.compose.project": "demo",
                    "com.docker.compose.depends_on": "db:service_started:false,cache:service_healthy:true"
                }
            },
            "State": { "Status": "running" }
        }]"#;

        let containers: Vec<ContainerJson> = parse(json).unwrap();
        let container: ContainerSummary = containers.into_iter().next().unwrap().into();
        assert_eq!(container.name(), "demo-web-1");
        assert_eq!(container.state, "running");
        assert_eq!(
            container.label("com.docker.compose.depends_on"),
            Some("db:service_started:false,cache:service_healthy:true")
        );
    }

    #[test]
    fn test_parse_network_and_volume_with_null_fields() {
        let networks: Vec<NetworkJson> =
            parse(r#"[{"Id": "n1", "Name": "demo_default", "Labels": null, "Containers": {"c1": {}}}]"#)
                .unwrap();
        assert_eq!(networks[0].containers.as_ref().map(|c| c.len()), Some(1));
        assert!(networks[0].labels.is_none());

        let volumes: Vec<VolumeJson> = parse(r#"[{"Name": "demo_data", "Labels": null}]"#).unwrap();
        let volume: VolumeSummary = volumes.into_iter().next().unwrap().into();
        assert!(volume.labels.is_empty());
    }

    #[test]
    fn test_parse_image_inspect() {
        let images: Vec<ImageJson> = parse(
            r#"[{"Id": "sha256:1", "RepoTags": ["demo-web:latest"], "Config": {"Labels": {"a": "b"}}}]"#,
        )
        .unwrap();
        assert_eq!(images[0].repo_tags.as_deref(), Some(&["demo-web:latest".to_string()][..]));
    }

    /// Write an executable shell script standing in for the docker binary
    #[cfg(unix)]
    fn stub_binary(dir: &tempfile::TempDir, script: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("docker");
        std::fs::write(&path, format!("#!/bin/sh\n{script}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[smol_potat::test]
    async fn test_list_skips_containers_removed_before_inspect() {
        let dir = tempfile::tempdir().unwrap();
        let binary = stub_binary(
            &dir,
            r#"case "$1" in
  ps) printf 'aaa\nbbb\n' ;;
  container)
    printf '[{"Id":"aaa","Name":"/demo-web-1","Config":{"Image":"demo-web","Labels":null},"State":{"Status":"running"}}]\n'
    echo 'Error: No such object: bbb' >&2
    exit 1 ;;
esac
"#,
        );

        let containers = DockerCli::with_binary(&binary)
            .list_containers(&Filter::new())
            .await
            .unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name(), "demo-web-1");
    }

    #[cfg(unix)]
    #[smol_potat::test]
    async fn test_list_with_every_object_gone() {
        let dir = tempfile::tempdir().unwrap();
        let binary = stub_binary(
            &dir,
            r#"case "$1" in
  volume)
    if [ "$2" = "ls" ]; then echo demo_data; exit 0; fi
    echo '[]'
    echo 'Error: No such volume: demo_data' >&2
    exit 1 ;;
esac
"#,
        );

        let cli = DockerCli::with_binary(&binary);
        assert!(cli.list_volumes(&Filter::new()).await.unwrap().is_empty());
        assert!(cli.inspect_volume("demo_data").await.unwrap_err().is_not_found());
    }

    #[cfg(unix)]
    #[smol_potat::test]
    async fn test_inspect_daemon_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let binary = stub_binary(
            &dir,
            r#"case "$1" in
  network)
    if [ "$2" = "ls" ]; then echo n1; exit 0; fi
    echo 'Cannot connect to the Docker daemon' >&2
    exit 1 ;;
esac
"#,
        );

        let result = DockerCli::with_binary(&binary)
            .list_networks(&Filter::new())
            .await;
        assert!(matches!(result, Err(RuntimeError::Other(_))));
    }

    #[test]
    fn test_malformed_output() {
        assert!(matches!(
            parse::<VolumeJson>("not json"),
            Err(RuntimeError::Other(_))
        ));
    }
}
