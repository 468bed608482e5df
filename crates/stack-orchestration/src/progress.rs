//! Progress events emitted while a stack is torn down.

use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Notice attached to resources that were already absent
pub const NOTHING_TO_REMOVE: &str = "No resource found to remove";

/// Notice attached to resources that are still in use
pub const STILL_IN_USE: &str = "Resource is still in use";

/// Lifecycle phase of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Work in progress
    Working,
    /// Finished successfully
    Done,
    /// Finished without effect
    Warning,
    /// Failed
    Error,
}

/// A progress event for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Human readable resource identifier, e.g. `Container demo-web-1`
    pub id: String,
    /// Phase reached
    pub phase: Phase,
    /// Short message
    pub message: String,
}

impl Event {
    /// Create an event
    pub fn new(id: &str, phase: Phase, message: &str) -> Self {
        Self {
            id: id.to_string(),
            phase,
            message: message.to_string(),
        }
    }

    /// `Stopping` in progress
    pub fn stopping(id: &str) -> Self {
        Self::new(id, Phase::Working, "Stopping")
    }

    /// `Stopped`
    pub fn stopped(id: &str) -> Self {
        Self::new(id, Phase::Done, "Stopped")
    }

    /// `Removing` in progress
    pub fn removing(id: &str) -> Self {
        Self::new(id, Phase::Working, "Removing")
    }

    /// `Removed`
    pub fn removed(id: &str) -> Self {
        Self::new(id, Phase::Done, "Removed")
    }

    /// Warning with a message
    pub fn warning(id: &str, message: &str) -> Self {
        Self::new(id, Phase::Warning, message)
    }

    /// Error with a message
    pub fn error(id: &str, message: &str) -> Self {
        Self::new(id, Phase::Error, message)
    }
}

/// Write-only sink for progress events
pub trait ProgressWriter: Send + Sync {
    /// Record an event
    fn event(&self, event: Event);
}

/// Forwards progress events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressWriter for TracingProgress {
    fn event(&self, event: Event) {
        match event.phase {
            Phase::Working => debug!("{} {}", event.id, event.message),
            Phase::Done => info!("{} {}", event.id, event.message),
            Phase::Warning => warn!("{} {}", event.id, event.message),
            Phase::Error => error!("{} {}", event.id, event.message),
        }
    }
}
