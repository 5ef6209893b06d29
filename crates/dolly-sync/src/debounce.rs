//! Per-view refresh coalescing.
//!
//! Each mounted view owns one [`RefreshDebouncer`] task. Debounced triggers
//! restart a quiet window; when it elapses one fetch runs. While a fetch is in
//! flight, anything that would start another only marks a single follow-up as
//! queued, so a view never has more than one fetch in flight plus one queued.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::fetch::{SnapshotSource, ViewQuery};
use crate::metrics;
use crate::model::{ViewId, ViewModel};
use crate::reconcile::{reconcile, ReconcilePolicy, Reconciliation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Push-driven; waits for the quiet window.
    Debounced,
    /// Mount, manual retry, resync; skips the window.
    Immediate,
}

#[derive(Debug, Clone)]
pub struct RefreshTrigger {
    tx: mpsc::UnboundedSender<Trigger>,
}

impl RefreshTrigger {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Trigger>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the debouncer is gone.
    pub fn fire(&self, trigger: Trigger) -> bool {
        self.tx.send(trigger).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    pub window: Duration,
    pub fetch_timeout: Duration,
    pub policy: ReconcilePolicy,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(500),
            fetch_timeout: Duration::from_secs(10),
            policy: ReconcilePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Reconciled(Reconciliation),
    /// The model was left as it was; [`ViewHandle::refresh`] retries.
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewEvent {
    pub view: ViewId,
    pub outcome: RefreshOutcome,
}

/// Shared access to one mounted view: its model and its refresh trigger.
#[derive(Debug, Clone)]
pub struct ViewHandle {
    id: ViewId,
    model: Arc<watch::Sender<ViewModel>>,
    trigger: RefreshTrigger,
}

impl ViewHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> ViewModel {
        self.model.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.model.borrow().version()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewModel> {
        self.model.subscribe()
    }

    pub fn select(&self, id: &str, selected: bool) -> bool {
        self.model.send_if_modified(|model| model.set_selected(id, selected))
    }

    pub fn toggle_selected(&self, id: &str) -> bool {
        self.model.send_if_modified(|model| model.toggle_selected(id))
    }

    pub fn set_expanded(&self, id: &str, expanded: bool) -> bool {
        self.model.send_if_modified(|model| model.set_expanded(id, expanded))
    }

    pub fn toggle_expanded(&self, id: &str) -> bool {
        self.model.send_if_modified(|model| model.toggle_expanded(id))
    }

    /// Manual retry: fetch now, respecting the in-flight limit.
    pub fn refresh(&self) -> bool {
        self.trigger.fire(Trigger::Immediate)
    }

    pub fn trigger(&self) -> &RefreshTrigger {
        &self.trigger
    }
}

pub struct RefreshDebouncer {
    view: ViewId,
    query: ViewQuery,
    source: Arc<dyn SnapshotSource>,
    model: Arc<watch::Sender<ViewModel>>,
    config: DebounceConfig,
    triggers: mpsc::UnboundedReceiver<Trigger>,
    events: mpsc::UnboundedSender<ViewEvent>,
}

impl RefreshDebouncer {
    /// Creates the debouncer for a fresh, empty view and returns its handle.
    pub fn new(
        view: impl Into<ViewId>,
        query: ViewQuery,
        source: Arc<dyn SnapshotSource>,
        config: DebounceConfig,
        events: mpsc::UnboundedSender<ViewEvent>,
    ) -> (Self, ViewHandle) {
        let view = view.into();
        let (trigger, triggers) = RefreshTrigger::channel();
        let (model, _) = watch::channel(ViewModel::default());
        let model = Arc::new(model);
        let handle = ViewHandle {
            id: view.clone(),
            model: model.clone(),
            trigger,
        };
        (
            Self {
                view,
                query,
                source,
                model,
                config,
                triggers,
                events,
            },
            handle,
        )
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until every [`ViewHandle`] (and trigger) is dropped.
    pub async fn run(mut self) {
        let window = self.config.window;
        let mut deadline: Option<Instant> = None;
        let mut queued = false;

        loop {
            if !queued {
                tokio::select! {
                    trigger = self.triggers.recv() => match trigger {
                        Some(trigger) => absorb(trigger, window, &mut deadline, &mut queued),
                        None => break,
                    },
                    _ = wait_until(deadline), if deadline.is_some() => {
                        deadline = None;
                        queued = true;
                    }
                }
                continue;
            }

            queued = false;
            let started = Instant::now();
            let mut fetch = pin!(timeout(
                self.config.fetch_timeout,
                self.source.fetch(&self.query)
            ));
            let result = loop {
                tokio::select! {
                    result = &mut fetch => break result,
                    trigger = self.triggers.recv() => match trigger {
                        Some(trigger) => absorb(trigger, window, &mut deadline, &mut queued),
                        None => return,
                    },
                    _ = wait_until(deadline), if deadline.is_some() => {
                        deadline = None;
                        queued = true;
                    }
                }
            };
            metrics::FETCH_LATENCY_MS
                .with_label_values(&[self.view.as_str()])
                .observe(started.elapsed().as_secs_f64() * 1000.0);

            let outcome = match result {
                Ok(Ok(snapshot)) => {
                    metrics::FETCHES.with_label_values(&[self.view.as_str(), "ok"]).inc();
                    RefreshOutcome::Reconciled(self.apply(snapshot))
                }
                Ok(Err(err)) => {
                    metrics::FETCHES
                        .with_label_values(&[self.view.as_str(), "error"])
                        .inc();
                    warn!(target = "sync::debounce", view = %self.view, error = %err, "snapshot fetch failed");
                    RefreshOutcome::Failed {
                        error: err.to_string(),
                    }
                }
                Err(_) => {
                    metrics::FETCHES
                        .with_label_values(&[self.view.as_str(), "timeout"])
                        .inc();
                    let err = SyncError::FetchTimeout(self.config.fetch_timeout);
                    warn!(target = "sync::debounce", view = %self.view, error = %err, "snapshot fetch timed out");
                    RefreshOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            };
            let _ = self.events.send(ViewEvent {
                view: self.view.clone(),
                outcome,
            });
        }
        debug!(target = "sync::debounce", view = %self.view, "debouncer stopped");
    }

    fn apply(&self, snapshot: crate::model::Snapshot) -> Reconciliation {
        let policy = self.config.policy;
        let mut result = None;
        self.model.send_if_modified(|model| {
            let outcome = reconcile(model, snapshot, &policy);
            let applied = outcome.result.is_applied();
            *model = outcome.model;
            result = Some(outcome.result);
            applied
        });
        let result = result.unwrap_or(Reconciliation::Unchanged {
            revision: 0,
            duplicates: Vec::new(),
        });

        metrics::RECONCILIATIONS
            .with_label_values(&[self.view.as_str(), result.label()])
            .inc();
        match &result {
            Reconciliation::Applied(report) => {
                if !report.duplicates.is_empty() {
                    warn!(target = "sync::reconcile", view = %self.view, duplicates = ?report.duplicates, "snapshot repeated entity ids; kept last occurrence");
                }
                debug!(
                    target = "sync::reconcile",
                    view = %self.view,
                    version = report.version,
                    revision = report.revision,
                    arrived = report.arrived.len(),
                    departed = report.departed.len(),
                    retained = report.retained,
                    "applied snapshot"
                );
            }
            Reconciliation::Unchanged { revision, duplicates } => {
                if !duplicates.is_empty() {
                    warn!(target = "sync::reconcile", view = %self.view, duplicates = ?duplicates, "snapshot repeated entity ids; kept last occurrence");
                }
                debug!(target = "sync::reconcile", view = %self.view, revision, "snapshot unchanged");
            }
            Reconciliation::RejectedStale {
                snapshot_revision,
                applied_revision,
            } => {
                warn!(
                    target = "sync::reconcile",
                    view = %self.view,
                    snapshot_revision,
                    applied_revision,
                    "rejected stale snapshot"
                );
            }
        }
        result
    }
}

fn absorb(trigger: Trigger, window: Duration, deadline: &mut Option<Instant>, queued: &mut bool) {
    match trigger {
        Trigger::Debounced => *deadline = Some(Instant::now() + window),
        Trigger::Immediate => {
            *deadline = None;
            *queued = true;
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
