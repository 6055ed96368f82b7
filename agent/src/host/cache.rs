//! Snapshot cache of the project state per iteration
//!
//! Keeps the project definition as it stood when each iteration finished,
//! compressed with zstd, in a bounded ring. The oldest snapshot is evicted
//! first.

use std::collections::VecDeque;

use flow_engine::{IterationId, ProjectDefinition};
use parking_lot::Mutex;
use thiserror::Error;

use crate::constants::defaults;

/// Errors storing or reading snapshots
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Compression error: {0}")]
    Compression(String),
}

/// Collaborator keeping per-iteration project snapshots
pub trait ResultCache: Send + Sync {
    fn store(&self, iteration_id: IterationId, project: &ProjectDefinition) -> Result<(), CacheError>;

    /// Snapshot of an iteration, if still cached
    fn get(&self, iteration_id: IterationId) -> Option<Result<ProjectDefinition, CacheError>>;

    /// Iterations currently cached, oldest first
    fn iterations(&self) -> Vec<IterationId>;
}

/// In-memory ring of compressed project snapshots
pub struct SnapshotCache {
    /// (iteration, zstd-compressed JSON), oldest first
    snapshots: Mutex<VecDeque<(IterationId, Vec<u8>)>>,
    capacity: usize,
}

impl SnapshotCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            snapshots: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }
}

impl ResultCache for SnapshotCache {
    fn store(&self, iteration_id: IterationId, project: &ProjectDefinition) -> Result<(), CacheError> {
        let json = serde_json::to_vec(project)?;
        let compressed = zstd::encode_all(&json[..], defaults::SNAPSHOT_COMPRESSION_LEVEL)
            .map_err(|e| CacheError::Compression(e.to_string()))?;

        let mut snapshots = self.snapshots.lock();
        snapshots.retain(|(id, _)| *id != iteration_id);
        snapshots.push_back((iteration_id, compressed));
        while snapshots.len() > self.capacity {
            snapshots.pop_front();
        }
        Ok(())
    }

    fn get(&self, iteration_id: IterationId) -> Option<Result<ProjectDefinition, CacheError>> {
        let snapshots = self.snapshots.lock();
        let (_, compressed) = snapshots.iter().find(|(id, _)| *id == iteration_id)?;
        Some(decompress(compressed))
    }

    fn iterations(&self) -> Vec<IterationId> {
        self.snapshots.lock().iter().map(|(id, _)| *id).collect()
    }
}

fn decompress(compressed: &[u8]) -> Result<ProjectDefinition, CacheError> {
    let json = zstd::decode_all(compressed).map_err(|e| CacheError::Compression(e.to_string()))?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_engine::ProjectBuilder;

    fn definition(name: &str) -> ProjectDefinition {
        ProjectBuilder::new("p", name)
            .add_step("a", "constant", (0.0, 0.0))
            .build()
    }

    #[test]
    fn test_store_and_get() {
        let cache = SnapshotCache::new(4);
        let id = uuid::Uuid::new_v4();
        cache.store(id, &definition("first")).unwrap();

        let restored = cache.get(id).unwrap().unwrap();
        assert_eq!(restored.name, "first");
        assert_eq!(restored.steps.len(), 1);
        assert!(cache.get(uuid::Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_oldest_snapshot_is_evicted() {
        let cache = SnapshotCache::new(2);
        let ids: Vec<_> = (0..3).map(|_| uuid::Uuid::new_v4()).collect();
        for id in &ids {
            cache.store(*id, &definition("p")).unwrap();
        }
        assert_eq!(cache.iterations(), vec![ids[1], ids[2]]);
        assert!(cache.get(ids[0]).is_none());
    }

    #[test]
    fn test_restore_replaces_entry() {
        let cache = SnapshotCache::new(4);
        let id = uuid::Uuid::new_v4();
        cache.store(id, &definition("old")).unwrap();
        cache.store(id, &definition("new")).unwrap();
        assert_eq!(cache.iterations(), vec![id]);
        assert_eq!(cache.get(id).unwrap().unwrap().name, "new");
    }
}
