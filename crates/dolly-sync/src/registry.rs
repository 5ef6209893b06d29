use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::debounce::{Trigger, ViewHandle};
use crate::fetch::ViewQuery;
use crate::model::ViewId;
use crate::router::PushKind;

/// Which push kinds make a view refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interest {
    /// Every refreshing kind.
    All,
    Kinds(HashSet<PushKind>),
}

impl Interest {
    pub fn kinds<I>(kinds: I) -> Self
    where
        I: IntoIterator<Item = PushKind>,
    {
        Interest::Kinds(kinds.into_iter().collect())
    }

    /// Unknown kinds match every view; informational kinds match none.
    pub fn matches(&self, kind: &PushKind) -> bool {
        if !kind.class().triggers_refresh() {
            return false;
        }
        match (self, kind) {
            (_, PushKind::Unknown(_)) => true,
            (Interest::All, _) => true,
            (Interest::Kinds(kinds), kind) => kinds.contains(kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSpec {
    pub id: ViewId,
    pub query: ViewQuery,
    pub interests: Interest,
}

impl ViewSpec {
    pub fn new(id: impl Into<ViewId>, query: ViewQuery) -> Self {
        Self {
            id: id.into(),
            query,
            interests: Interest::All,
        }
    }

    pub fn with_interests(mut self, interests: Interest) -> Self {
        self.interests = interests;
        self
    }
}

struct ViewEntry {
    spec: ViewSpec,
    handle: ViewHandle,
    task: JoinHandle<()>,
}

/// Mounted views of a session, keyed by id.
#[derive(Default)]
pub struct ViewRegistry {
    views: RwLock<HashMap<ViewId, ViewEntry>>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a view with its debouncer task. A view already mounted under
    /// the same id is unmounted first.
    pub fn insert(&self, spec: ViewSpec, handle: ViewHandle, task: JoinHandle<()>) {
        let id = spec.id.clone();
        let previous = self
            .views
            .write()
            .insert(id, ViewEntry { spec, handle, task });
        if let Some(previous) = previous {
            previous.task.abort();
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        match self.views.write().remove(id) {
            Some(entry) => {
                entry.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn handle(&self, id: &str) -> Option<ViewHandle> {
        self.views.read().get(id).map(|entry| entry.handle.clone())
    }

    pub fn spec(&self, id: &str) -> Option<ViewSpec> {
        self.views.read().get(id).map(|entry| entry.spec.clone())
    }

    /// Ids of views listening for `kind`, sorted.
    pub fn interested_in(&self, kind: &PushKind) -> Vec<ViewId> {
        let mut ids: Vec<ViewId> = self
            .views
            .read()
            .values()
            .filter(|entry| entry.spec.interests.matches(kind))
            .map(|entry| entry.spec.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn trigger(&self, id: &str, trigger: Trigger) -> bool {
        self.views
            .read()
            .get(id)
            .map(|entry| entry.handle.trigger().fire(trigger))
            .unwrap_or(false)
    }

    /// Returns how many views accepted the trigger.
    pub fn trigger_all(&self, trigger: Trigger) -> usize {
        self.views
            .read()
            .values()
            .filter(|entry| entry.handle.trigger().fire(trigger))
            .count()
    }

    pub fn ids(&self) -> Vec<ViewId> {
        let mut ids: Vec<ViewId> = self.views.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.views.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.read().is_empty()
    }

    pub fn clear(&self) {
        let drained: Vec<ViewEntry> = self.views.write().drain().map(|(_, entry)| entry).collect();
        for entry in drained {
            entry.task.abort();
        }
    }
}

impl Drop for ViewRegistry {
    fn drop(&mut self) {
        for entry in self.views.get_mut().values() {
            entry.task.abort();
        }
    }
}
