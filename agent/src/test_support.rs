//! Shared fixtures for unit tests

use std::sync::Arc;

use flow_engine::{EngineOptions, StepRegistry};

use crate::host::{EngineHost, HostServices, LogNotifier, SnapshotCache};
use crate::results::{DrainOptions, LogResultTransport, ResultDrain};

/// Host with the built-in steps whose collaborators only log
pub fn log_host() -> EngineHost {
    let drain = ResultDrain::start(
        DrainOptions {
            agent_id: "test-agent".to_string(),
            chunk_bytes: 1024,
            preview_max_pixels: 0,
        },
        Arc::new(LogResultTransport),
    );
    EngineHost::new(HostServices {
        registry: Arc::new(StepRegistry::with_builtin_steps()),
        drain: Arc::new(drain),
        notifier: Arc::new(LogNotifier),
        cache: Arc::new(SnapshotCache::new(4)),
        engine_options: EngineOptions::default(),
    })
}
