//! Merges a freshly fetched snapshot into a view model.
//!
//! Server order is authoritative for the entity list; sticky flags survive for
//! every id that is still present. The merge is a pure function so the caller
//! decides how anomalies (duplicates, stale snapshots) get logged.

use std::collections::{HashMap, HashSet};

use crate::model::{Entity, EntityId, Snapshot, StickyFlags, ViewModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Mark newly arrived entities as expanded and report the first as focus.
    pub auto_expand_arrivals: bool,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            auto_expand_arrivals: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub version: u64,
    pub revision: u64,
    /// Ids new to the view, in snapshot order.
    pub arrived: Vec<EntityId>,
    /// Ids no longer present, in their previous order.
    pub departed: Vec<EntityId>,
    pub retained: usize,
    /// Ids that appeared more than once in the snapshot.
    pub duplicates: Vec<EntityId>,
    /// First arrival to scroll to when auto-expand applied. Renderers use it
    /// to bring that row into view.
    pub focus: Option<EntityId>,
    /// The view had never been populated before this merge.
    pub initial: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Applied(ReconcileReport),
    Unchanged {
        revision: u64,
        duplicates: Vec<EntityId>,
    },
    RejectedStale {
        snapshot_revision: u64,
        applied_revision: u64,
    },
}

impl Reconciliation {
    pub fn is_applied(&self) -> bool {
        matches!(self, Reconciliation::Applied(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Reconciliation::Applied(_) => "applied",
            Reconciliation::Unchanged { .. } => "unchanged",
            Reconciliation::RejectedStale { .. } => "stale",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub model: ViewModel,
    pub result: Reconciliation,
}

pub fn reconcile(old: &ViewModel, snapshot: Snapshot, policy: &ReconcilePolicy) -> ReconcileOutcome {
    if let Some(applied_revision) = old.applied_revision() {
        if snapshot.revision < applied_revision {
            return ReconcileOutcome {
                model: old.clone(),
                result: Reconciliation::RejectedStale {
                    snapshot_revision: snapshot.revision,
                    applied_revision,
                },
            };
        }
    }

    let revision = snapshot.revision;
    let (entities, duplicates) = dedupe_last_wins(snapshot.entities);

    if old.is_populated() && entities.as_slice() == old.entities() {
        let model = ViewModel::from_parts(
            entities,
            old.sticky().clone(),
            old.version(),
            Some(revision),
        );
        return ReconcileOutcome {
            model,
            result: Reconciliation::Unchanged {
                revision,
                duplicates,
            },
        };
    }

    let initial = !old.is_populated();
    let old_ids: HashSet<&str> = old.ids().collect();
    let new_ids: HashSet<&str> = entities.iter().map(|entity| entity.id.as_str()).collect();

    let arrived: Vec<EntityId> = entities
        .iter()
        .filter(|entity| !old_ids.contains(entity.id.as_str()))
        .map(|entity| entity.id.clone())
        .collect();
    let departed: Vec<EntityId> = old
        .ids()
        .filter(|id| !new_ids.contains(id))
        .map(str::to_string)
        .collect();
    let retained = entities.len() - arrived.len();

    let mut sticky: HashMap<EntityId, StickyFlags> = entities
        .iter()
        .filter_map(|entity| {
            old.sticky()
                .get(&entity.id)
                .filter(|flags| !flags.is_empty())
                .map(|flags| (entity.id.clone(), *flags))
        })
        .collect();

    let expand = policy.auto_expand_arrivals && !initial;
    if expand {
        for id in &arrived {
            sticky.entry(id.clone()).or_default().expanded = true;
        }
    }
    let focus = if expand { arrived.first().cloned() } else { None };

    let version = old.version() + 1;
    let report = ReconcileReport {
        version,
        revision,
        arrived,
        departed,
        retained,
        duplicates,
        focus,
        initial,
    };
    ReconcileOutcome {
        model: ViewModel::from_parts(entities, sticky, version, Some(revision)),
        result: Reconciliation::Applied(report),
    }
}

/// Keeps only the last occurrence of every id, at that occurrence's position.
fn dedupe_last_wins(entities: Vec<Entity>) -> (Vec<Entity>, Vec<EntityId>) {
    let mut last_index: HashMap<EntityId, usize> = HashMap::with_capacity(entities.len());
    for (idx, entity) in entities.iter().enumerate() {
        last_index.insert(entity.id.clone(), idx);
    }
    if last_index.len() == entities.len() {
        return (entities, Vec::new());
    }

    let mut duplicates: Vec<EntityId> = Vec::new();
    let mut kept = Vec::with_capacity(last_index.len());
    for (idx, entity) in entities.into_iter().enumerate() {
        if last_index.get(&entity.id) == Some(&idx) {
            kept.push(entity);
        } else if !duplicates.contains(&entity.id) {
            duplicates.push(entity.id);
        }
    }
    (kept, duplicates)
}
