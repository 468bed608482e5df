//! Resource-class cleanup planners.
//!
//! Each planner inspects the model (and, for images, the live runtime) and
//! returns [`Operation`] values. Planning never removes anything; the
//! operations are executed later by [`crate::aggregate::run_operations`].

pub mod image;
pub mod network;
pub mod volume;

use crate::context::OperationContext;
use crate::runtime::RuntimeClient;
use crate::Result;
use std::fmt;

/// Deferred removal of exactly one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Remove the networks created for a model network
    RemoveNetwork {
        /// Key of the network in the model
        key: String,
        /// Stack name
        project: String,
        /// Runtime name of the network
        name: String,
    },
    /// Remove an image
    RemoveImage {
        /// Image reference
        reference: String,
    },
    /// Remove a named volume
    RemoveVolume {
        /// Runtime name of the volume
        name: String,
    },
}

impl Operation {
    /// Progress identifier of the targeted resource
    pub fn resource_id(&self) -> String {
        match self {
            Operation::RemoveNetwork { name, .. } => format!("Network {name}"),
            Operation::RemoveImage { reference } => format!("Image {reference}"),
            Operation::RemoveVolume { name } => format!("Volume {name}"),
        }
    }

    /// Execute the removal once
    pub async fn run(&self, ctx: &OperationContext, client: &dyn RuntimeClient) -> Result<()> {
        match self {
            Operation::RemoveNetwork { key, project, name } => {
                network::remove_network(ctx, client, key, project, name).await
            }
            Operation::RemoveImage { reference } => {
                image::remove_image(ctx, client, reference).await
            }
            Operation::RemoveVolume { name } => volume::remove_volume(ctx, client, name).await,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remove {}", self.resource_id())
    }
}
