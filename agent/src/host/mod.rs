//! Engine hosting and its collaborators

mod cache;
mod engine_host;
mod notifier;

pub use cache::{CacheError, SnapshotCache};
pub use engine_host::{EngineHost, HostError, HostServices};
pub use notifier::{HttpNotifier, LogNotifier, Notifier};
