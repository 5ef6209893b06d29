use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::autoscroll::Fingerprint;

pub type EntityId = String;
pub type ViewId = String;

/// A displayable row or card (a dolly, a task, a shipment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    /// Arrival order; only used to break display ties.
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Entity {
    pub fn new(id: impl Into<EntityId>, sequence: u64, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            sequence,
            payload,
        }
    }
}

/// Client-only interaction flags for one entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickyFlags {
    pub selected: bool,
    pub expanded: bool,
}

impl StickyFlags {
    pub fn is_empty(&self) -> bool {
        !self.selected && !self.expanded
    }
}

/// Authoritative listing of one view as returned by the read endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Monotonic marker supplied by the upstream fetch.
    pub revision: u64,
    pub entities: Vec<Entity>,
}

impl Snapshot {
    pub fn new(revision: u64, entities: Vec<Entity>) -> Self {
        Self { revision, entities }
    }
}

/// Local view model: server-ordered entities plus the sticky flags that only
/// the client knows about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewModel {
    entities: Vec<Entity>,
    sticky: HashMap<EntityId, StickyFlags>,
    version: u64,
    applied_revision: Option<u64>,
}

impl ViewModel {
    pub(crate) fn from_parts(
        entities: Vec<Entity>,
        sticky: HashMap<EntityId, StickyFlags>,
        version: u64,
        applied_revision: Option<u64>,
    ) -> Self {
        Self {
            entities,
            sticky,
            version,
            applied_revision,
        }
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Incremented on every applied reconciliation; 0 until the first one.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn applied_revision(&self) -> Option<u64> {
        self.applied_revision
    }

    pub fn is_populated(&self) -> bool {
        self.applied_revision.is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.iter().any(|entity| entity.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|entity| entity.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|entity| entity.id.as_str())
    }

    pub fn flags(&self, id: &str) -> StickyFlags {
        self.sticky.get(id).copied().unwrap_or_default()
    }

    pub fn sticky(&self) -> &HashMap<EntityId, StickyFlags> {
        &self.sticky
    }

    pub fn selected(&self) -> Vec<&str> {
        self.ids().filter(|id| self.flags(id).selected).collect()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of_ids(self.ids())
    }

    pub fn set_selected(&mut self, id: &str, selected: bool) -> bool {
        self.update_flags(id, |flags| flags.selected = selected)
    }

    pub fn toggle_selected(&mut self, id: &str) -> bool {
        self.update_flags(id, |flags| flags.selected = !flags.selected)
    }

    pub fn set_expanded(&mut self, id: &str, expanded: bool) -> bool {
        self.update_flags(id, |flags| flags.expanded = expanded)
    }

    pub fn toggle_expanded(&mut self, id: &str) -> bool {
        self.update_flags(id, |flags| flags.expanded = !flags.expanded)
    }

    /// Writes flags only for ids currently present, so the map never holds
    /// entries for entities the view does not show.
    fn update_flags(&mut self, id: &str, apply: impl FnOnce(&mut StickyFlags)) -> bool {
        if !self.contains(id) {
            return false;
        }
        let mut flags = self.flags(id);
        let before = flags;
        apply(&mut flags);
        if flags.is_empty() {
            self.sticky.remove(id);
        } else {
            self.sticky.insert(id.to_string(), flags);
        }
        flags != before
    }
}
