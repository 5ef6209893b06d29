use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{SnapshotSource, ViewQuery};
use crate::error::{SyncError, SyncResult};
use crate::model::{Entity, Snapshot};

#[derive(Default)]
struct MemoryState {
    snapshots: HashMap<String, Snapshot>,
    fallback: Option<Snapshot>,
    failures: VecDeque<String>,
    latency: Duration,
    calls: Vec<ViewQuery>,
}

/// Simple in-memory snapshot source for testing and demos.
#[derive(Clone, Default)]
pub struct MemorySource {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot returned for every path without a specific one.
    pub fn set_snapshot(&self, snapshot: Snapshot) {
        self.state.lock().fallback = Some(snapshot);
    }

    pub fn set_snapshot_for(&self, path: impl Into<String>, snapshot: Snapshot) {
        self.state.lock().snapshots.insert(path.into(), snapshot);
    }

    /// Convenience for tests: a snapshot made of bare ids.
    pub fn set_ids(&self, revision: u64, ids: &[&str]) {
        let entities = ids
            .iter()
            .enumerate()
            .map(|(idx, id)| Entity::new(*id, idx as u64, serde_json::Value::Null))
            .collect();
        self.set_snapshot(Snapshot::new(revision, entities));
    }

    /// The next fetch fails with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.state.lock().failures.push_back(reason.into());
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    pub fn calls(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn queries(&self) -> Vec<ViewQuery> {
        self.state.lock().calls.clone()
    }
}

#[async_trait]
impl SnapshotSource for MemorySource {
    async fn fetch(&self, query: &ViewQuery) -> SyncResult<Snapshot> {
        let (latency, result) = {
            let mut state = self.state.lock();
            state.calls.push(query.clone());
            let result = match state.failures.pop_front() {
                Some(reason) => Err(SyncError::Transport(reason)),
                None => state
                    .snapshots
                    .get(&query.path)
                    .or(state.fallback.as_ref())
                    .cloned()
                    .ok_or_else(|| SyncError::Malformed(format!("no snapshot for {query}"))),
            };
            (state.latency, result)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        result
    }
}
