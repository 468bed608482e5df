//! Ownership labels attached to stack resources.

use crate::runtime::Filter;

/// Stack (project) name
pub const PROJECT: &str = "com.docker.compose.project";
/// Service name
pub const SERVICE: &str = "com.docker.compose.service";
/// `True` for containers created by a one-off run
pub const ONE_OFF: &str = "com.docker.compose.oneoff";
/// Model key of a network
pub const NETWORK: &str = "com.docker.compose.network";
/// Model key of a volume
pub const VOLUME: &str = "com.docker.compose.volume";
/// Serialized dependency list, `name:condition:restart[,...]`
pub const DEPENDS_ON: &str = "com.docker.compose.depends_on";

/// Resources of a stack
pub fn project_filter(project: &str) -> Filter {
    Filter::new().label(PROJECT, project)
}

/// Networks declared under `key` in a stack
pub fn network_filter(project: &str, key: &str) -> Filter {
    project_filter(project).label(NETWORK, key)
}

/// Whether a one-off label value marks an ephemeral container
pub fn is_one_off_value(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}
