//! Common test utilities

#![allow(dead_code)]

use stack_orchestration::test_support::{FakeRuntime, RecordingProgress};
use stack_orchestration::{EngineConfig, Project, ServiceNode, Teardown};
use std::sync::Arc;

/// Runtime, progress recorder and engine wired together
pub struct Fixture {
    pub runtime: Arc<FakeRuntime>,
    pub progress: Arc<RecordingProgress>,
    pub teardown: Teardown,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let runtime = Arc::new(FakeRuntime::new());
        let progress = Arc::new(RecordingProgress::new());
        let teardown = Teardown::new(runtime.clone(), progress.clone(), config);
        Self {
            runtime,
            progress,
            teardown,
        }
    }
}

/// `web` requires `db`, one network
pub fn web_and_db() -> Project {
    Project::new("demo")
        .with_service(ServiceNode::new("db").with_image("postgres:16"))
        .with_service(ServiceNode::new("web").built().depends_on("db", true))
        .with_network("default")
}
