//! Pull side: where view snapshots come from.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::model::Snapshot;

pub mod http;
pub mod memory;

pub use http::HttpSnapshotSource;
pub use memory::MemorySource;

/// The read a view issues on every refresh: a path plus query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ViewQuery {
    pub path: String,
    pub params: BTreeMap<String, String>,
}

impl ViewQuery {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ViewQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        for (idx, (key, value)) in self.params.iter().enumerate() {
            let sep = if idx == 0 { '?' } else { '&' };
            write!(f, "{sep}{key}={value}")?;
        }
        Ok(())
    }
}

/// Idempotent snapshot read. Implementations must be safe to call repeatedly.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, query: &ViewQuery) -> SyncResult<Snapshot>;
}
