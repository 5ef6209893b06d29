//! One dashboard session: the push channel, its router, the mounted views and
//! the notification slot, tied together by a single dispatch task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState, ConnectionStatus};
use crate::debounce::{DebounceConfig, RefreshDebouncer, RefreshOutcome, Trigger, ViewEvent, ViewHandle};
use crate::fetch::SnapshotSource;
use crate::notify::{NotificationCenter, Severity};
use crate::reconcile::Reconciliation;
use crate::registry::{ViewRegistry, ViewSpec};
use crate::router::EventRouter;
use crate::transport::PushTransport;

pub const LOST_MESSAGE: &str = "Connection problem - reconnecting...";
pub const RESTORED_MESSAGE: &str = "Live updates reconnected";
pub const FATAL_MESSAGE: &str = "Cannot reach the server. Please reload the page.";

const LOST_TTL: Duration = Duration::from_millis(3000);
const RESTORED_TTL: Duration = Duration::from_millis(2000);

pub struct DashboardSession {
    connection: ConnectionManager,
    registry: Arc<ViewRegistry>,
    notifications: NotificationCenter,
    debounce: DebounceConfig,
    view_events: mpsc::UnboundedSender<ViewEvent>,
    outcomes: broadcast::Sender<ViewEvent>,
    dispatch: Option<JoinHandle<()>>,
}

impl DashboardSession {
    /// Opens the push channel and starts dispatching. Views are mounted
    /// afterwards with [`DashboardSession::mount`].
    pub fn start(
        transport: Arc<dyn PushTransport>,
        config: &SyncConfig,
        notifications: NotificationCenter,
    ) -> Self {
        let registry = Arc::new(ViewRegistry::new());
        let router = EventRouter::new(registry.clone());
        let (connection, connection_events) =
            ConnectionManager::connect(transport, config.connection());
        let (view_events, view_rx) = mpsc::unbounded_channel();
        let (outcomes, _) = broadcast::channel(64);

        let dispatcher = Dispatcher {
            router,
            registry: registry.clone(),
            notifications: notifications.clone(),
            outcomes: outcomes.clone(),
            connected_once: false,
        };
        let dispatch = tokio::spawn(dispatcher.run(connection_events, view_rx));

        Self {
            connection,
            registry,
            notifications,
            debounce: config.debounce(),
            view_events,
            outcomes,
            dispatch: Some(dispatch),
        }
    }

    /// Mounts a view and schedules its first fetch right away.
    pub fn mount(&self, spec: ViewSpec, source: Arc<dyn SnapshotSource>) -> ViewHandle {
        let (debouncer, handle) = RefreshDebouncer::new(
            spec.id.clone(),
            spec.query.clone(),
            source,
            self.debounce,
            self.view_events.clone(),
        );
        let task = debouncer.spawn();
        handle.refresh();
        info!(target = "sync::session", view = %spec.id, query = %spec.query, "mounted view");
        self.registry.insert(spec, handle.clone(), task);
        handle
    }

    pub fn unmount(&self, id: &str) -> bool {
        let removed = self.registry.remove(id);
        if removed {
            info!(target = "sync::session", view = id, "unmounted view");
        }
        removed
    }

    pub fn view(&self, id: &str) -> Option<ViewHandle> {
        self.registry.handle(id)
    }

    pub fn registry(&self) -> &Arc<ViewRegistry> {
        &self.registry
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// Refresh outcomes of every view, for inline error/retry rendering.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<ViewEvent> {
        self.outcomes.subscribe()
    }

    pub async fn shutdown(mut self) {
        self.connection.close().await;
        self.registry.clear();
        if let Some(dispatch) = self.dispatch.take() {
            dispatch.abort();
            let _ = dispatch.await;
        }
        info!(target = "sync::session", "dashboard session stopped");
    }
}

impl Drop for DashboardSession {
    fn drop(&mut self) {
        if let Some(dispatch) = self.dispatch.take() {
            dispatch.abort();
        }
    }
}

struct Dispatcher {
    router: EventRouter,
    registry: Arc<ViewRegistry>,
    notifications: NotificationCenter,
    outcomes: broadcast::Sender<ViewEvent>,
    connected_once: bool,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
        mut view_events: mpsc::UnboundedReceiver<ViewEvent>,
    ) {
        let mut connection_open = true;
        loop {
            tokio::select! {
                event = connection_events.recv(), if connection_open => match event {
                    Some(event) => self.on_connection(event),
                    None => {
                        debug!(target = "sync::session", "connection event stream ended");
                        connection_open = false;
                    }
                },
                event = view_events.recv() => match event {
                    Some(event) => self.on_view(event),
                    None => break,
                },
            }
        }
    }

    fn on_connection(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::State(state) => {
                if state.status != ConnectionStatus::Connected {
                    return;
                }
                if self.connected_once {
                    let views = self.registry.trigger_all(Trigger::Immediate);
                    info!(target = "sync::session", views, "resyncing views after reconnect");
                }
                self.connected_once = true;
            }
            ConnectionEvent::Message(message) => {
                let decision = self.router.route(&message);
                if let Some(notice) = decision.notice {
                    self.notifications
                        .show(notice.message, notice.severity, notice.ttl);
                }
            }
            ConnectionEvent::Lost => {
                self.notifications
                    .show(LOST_MESSAGE, Severity::Warning, LOST_TTL);
            }
            ConnectionEvent::Restored => {
                self.notifications
                    .show(RESTORED_MESSAGE, Severity::Success, RESTORED_TTL);
            }
            ConnectionEvent::Fatal { attempts, reason } => {
                warn!(target = "sync::session", attempts, reason = %reason, "live updates unavailable");
                self.notifications
                    .show_persistent(FATAL_MESSAGE, Severity::Error);
            }
        }
    }

    fn on_view(&mut self, event: ViewEvent) {
        match &event.outcome {
            RefreshOutcome::Reconciled(Reconciliation::Applied(report))
                if !report.initial && !report.arrived.is_empty() =>
            {
                self.notifications
                    .notify(new_items_message(report.arrived.len()), Severity::Info);
            }
            RefreshOutcome::Failed { error } => {
                debug!(target = "sync::session", view = %event.view, error = %error, "view refresh failed; retry available");
            }
            _ => {}
        }
        let _ = self.outcomes.send(event);
    }
}

pub fn new_items_message(count: usize) -> String {
    if count == 1 {
        "1 new item".to_string()
    } else {
        format!("{count} new items")
    }
}
