//! Engine configuration and teardown options.
//!
//! Both are plain values: the engine never reads global state, so several
//! teardowns can run side by side with different limits.

use crate::model::Project;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable overriding [`EngineConfig::max_parallelism`]
pub const PARALLEL_LIMIT_ENV: &str = "COMPOSE_PARALLEL_LIMIT";

/// Engine-wide settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of workers issuing remote calls at once
    pub max_parallelism: Option<usize>,
    /// Stop timeout used when the options carry none, in seconds in YAML
    #[serde(with = "optional_secs")]
    pub default_stop_timeout: Option<Duration>,
}

impl EngineConfig {
    /// Parse from YAML
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Apply [`PARALLEL_LIMIT_ENV`] if set
    pub fn with_env_overrides(self) -> Result<Self> {
        match std::env::var(PARALLEL_LIMIT_ENV) {
            Ok(value) => self.with_parallel_limit(&value),
            Err(_) => Ok(self),
        }
    }

    /// Apply a textual parallelism limit
    pub fn with_parallel_limit(mut self, value: &str) -> Result<Self> {
        let limit: usize = value.trim().parse().map_err(|_| {
            Error::Config(format!("{PARALLEL_LIMIT_ENV} must be a number, got '{value}'"))
        })?;
        if limit == 0 {
            return Err(Error::Config(format!(
                "{PARALLEL_LIMIT_ENV} must be greater than zero"
            )));
        }
        self.max_parallelism = Some(limit);
        Ok(self)
    }
}

/// Which images a teardown removes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageRemoval {
    /// Keep all images
    #[default]
    None,
    /// Images built by the stack
    Local,
    /// Built and pulled images used by the stack
    All,
}

impl FromStr for ImageRemoval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "none" => Ok(Self::None),
            "local" => Ok(Self::Local),
            "all" => Ok(Self::All),
            other => Err(Error::Config(format!(
                "invalid image removal mode '{other}', expected 'local' or 'all'"
            ))),
        }
    }
}

/// Options of a single teardown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeardownOptions {
    /// Explicit model; `None` recovers the model from live resources
    pub project: Option<Project>,
    /// Services to tear down; empty means all
    pub services: Vec<String>,
    /// Image removal policy
    pub images: ImageRemoval,
    /// Remove named volumes
    pub volumes: bool,
    /// Remove resources of the stack that the model no longer declares
    pub remove_orphans: bool,
    /// Per-container stop timeout, in seconds in YAML
    #[serde(with = "optional_secs")]
    pub timeout: Option<Duration>,
}

mod optional_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}
