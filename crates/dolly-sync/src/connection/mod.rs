//! Owns the single push channel of a dashboard session.
//!
//! A supervisor task keeps the channel open: it retries failed attempts with a
//! capped fixed delay, forwards parsed frames, and derives the loss/restore
//! notices from the connection lifecycle.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::metrics;
use crate::transport::{PushConnection, PushTransport, TransportEvent};

mod loss;
mod message;
mod state;

use loss::LossMonitor;
pub use message::PushMessage;
pub use state::{ConnectionState, ConnectionStatus, DisconnectReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt + 1`. Fixed, never above the cap.
    pub fn delay_for(&self, _attempt: u32) -> Duration {
        self.base_delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: Duration,
    /// How long an alarming close may last before `Lost` is emitted.
    pub loss_grace: Duration,
    /// Consecutive failed attempts before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(20),
            loss_grace: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    State(ConnectionState),
    Message(PushMessage),
    /// The channel has been down longer than the grace window.
    Lost,
    /// The channel is back after a reported loss.
    Restored,
    /// Retrying stopped for good.
    Fatal { attempts: u32, reason: String },
}

pub struct ConnectionManager {
    state: watch::Receiver<ConnectionState>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Starts the supervisor. Must be called from within a tokio runtime.
    pub fn connect(
        transport: Arc<dyn PushTransport>,
        config: ConnectionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = Supervisor {
            transport,
            config,
            loss: LossMonitor::new(config.loss_grace, events_tx.clone()),
            state: state_tx,
            events: events_tx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(supervisor.run());

        (
            Self {
                state: state_rx,
                shutdown: shutdown_tx,
                task: Some(task),
            },
            events_rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Closes the open connection and waits for the supervisor to exit.
    pub async fn close(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(target = "sync::connection", error = %err, "connection supervisor ended abnormally");
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Served {
    Closed,
    Shutdown,
}

struct Supervisor {
    transport: Arc<dyn PushTransport>,
    config: ConnectionConfig,
    loss: LossMonitor,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let has_connected = self.state.borrow().has_connected();
            self.update(|state| {
                state.status = if has_connected {
                    ConnectionStatus::Reconnecting
                } else {
                    ConnectionStatus::Connecting
                };
                state.attempts += 1;
            });
            let attempt = self.state.borrow().attempts;
            debug!(target = "sync::connection", attempt, "opening push channel");

            let opened = tokio::select! {
                _ = self.shutdown.changed() => break,
                opened = timeout(self.config.connect_timeout, self.transport.open()) => opened,
            };

            match opened {
                Ok(Ok(connection)) => {
                    metrics::CONNECTION_ATTEMPTS.with_label_values(&["ok"]).inc();
                    if let Served::Shutdown = self.serve(connection).await {
                        break;
                    }
                }
                Ok(Err(SyncError::Exhausted { attempts })) => {
                    metrics::CONNECTION_ATTEMPTS
                        .with_label_values(&["exhausted"])
                        .inc();
                    self.fail(attempts, "transport gave up reconnecting".into());
                    return;
                }
                Ok(Err(err)) => {
                    metrics::CONNECTION_ATTEMPTS.with_label_values(&["error"]).inc();
                    warn!(target = "sync::connection", attempt, error = %err, "push channel attempt failed");
                    self.update(|state| {
                        state.last_disconnect_reason = Some(DisconnectReason::TransportFailure)
                    });
                }
                Err(_) => {
                    metrics::CONNECTION_ATTEMPTS
                        .with_label_values(&["timeout"])
                        .inc();
                    warn!(
                        target = "sync::connection",
                        attempt,
                        timeout_ms = self.config.connect_timeout.as_millis() as u64,
                        "push channel attempt timed out"
                    );
                    self.update(|state| {
                        state.last_disconnect_reason = Some(DisconnectReason::Timeout)
                    });
                }
            }

            let failed_in_a_row = self.state.borrow().attempts;
            if let Some(max) = self.config.max_attempts {
                if failed_in_a_row >= max {
                    let reason = format!("no connection after {failed_in_a_row} attempts");
                    self.fail(failed_in_a_row, reason);
                    return;
                }
            }

            let delay = self.config.reconnect.delay_for(failed_in_a_row);
            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.loss.cancel();
        self.update(|state| {
            state.status = ConnectionStatus::Disconnected;
            state.last_disconnect_reason = Some(DisconnectReason::ClientInitiated);
        });
        info!(target = "sync::connection", "push channel closed by client");
    }

    async fn serve(&mut self, mut connection: Box<dyn PushConnection>) -> Served {
        self.update(|state| {
            state.status = ConnectionStatus::Connected;
            state.attempts = 0;
            state.last_connected_at = Some(SystemTime::now());
        });
        self.loss.on_connected();
        info!(target = "sync::connection", "push channel connected");

        loop {
            let event = tokio::select! {
                _ = self.shutdown.changed() => {
                    connection.close().await;
                    return Served::Shutdown;
                }
                event = connection.recv() => event,
            };

            match event {
                TransportEvent::Frame(frame) => match PushMessage::parse(&frame) {
                    Ok(message) => {
                        let _ = self.events.send(ConnectionEvent::Message(message));
                    }
                    Err(err) => {
                        metrics::MALFORMED_FRAMES.inc();
                        warn!(target = "sync::connection", error = %err, bytes = frame.len(), "dropping malformed push frame");
                    }
                },
                TransportEvent::Closed(reason) => {
                    warn!(target = "sync::connection", reason = reason.as_str(), "push channel closed");
                    self.update(|state| {
                        state.status = ConnectionStatus::Disconnected;
                        state.last_disconnect_reason = Some(reason);
                    });
                    self.loss.on_disconnected(reason.is_alarming());
                    return Served::Closed;
                }
            }
        }
    }

    fn fail(&mut self, attempts: u32, reason: String) {
        self.loss.cancel();
        self.update(|state| state.status = ConnectionStatus::Failed);
        warn!(target = "sync::connection", attempts, reason = %reason, "giving up on push channel");
        let _ = self.events.send(ConnectionEvent::Fatal { attempts, reason });
    }

    fn update(&self, apply: impl FnOnce(&mut ConnectionState)) {
        self.state.send_modify(apply);
        let snapshot = self.state.borrow().clone();
        let _ = self.events.send(ConnectionEvent::State(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, OpenPlan};

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(10),
            },
            connect_timeout: Duration::from_secs(20),
            loss_grace: Duration::from_secs(5),
            max_attempts: None,
        }
    }

    /// Non-state events received so far.
    fn notices(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if !matches!(event, ConnectionEvent::State(_)) {
                out.push(event);
            }
        }
        out
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[test]
    fn delay_is_fixed_and_capped() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(50), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_frames_and_drops_malformed_ones() {
        let transport = MockTransport::new();
        let (manager, mut rx) = ConnectionManager::connect(Arc::new(transport.clone()), config());
        settle().await;
        assert!(manager.state().is_connected());

        transport.push_frame("not json");
        transport.push_frame(r#"{"type":"entity-updated","data":{}}"#);
        settle().await;

        let events = notices(&mut rx);
        assert_eq!(
            events,
            vec![ConnectionEvent::Message(PushMessage::new("entity-updated", serde_json::json!({})))]
        );
        assert!(manager.state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn short_outage_is_not_reported() {
        let transport = MockTransport::new();
        let (manager, mut rx) = ConnectionManager::connect(Arc::new(transport.clone()), config());
        settle().await;

        transport.drop_connection(DisconnectReason::TransportFailure);
        settle().await;
        assert_eq!(manager.state().status, ConnectionStatus::Disconnected);

        // reconnects after the fixed 2s delay, inside the 5s grace
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(manager.state().is_connected());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(notices(&mut rx).is_empty());
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn long_outage_reports_lost_then_restored_once() {
        let transport = MockTransport::new();
        let (manager, mut rx) = ConnectionManager::connect(Arc::new(transport.clone()), config());
        settle().await;

        transport.set_default(OpenPlan::Fail("refused".into()));
        transport.drop_connection(DisconnectReason::ServerInitiated);
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(manager.state().status, ConnectionStatus::Reconnecting);
        assert_eq!(notices(&mut rx), vec![ConnectionEvent::Lost]);

        transport.set_default(OpenPlan::Accept);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(manager.state().is_connected());
        assert_eq!(notices(&mut rx), vec![ConnectionEvent::Restored]);
    }

    #[tokio::test(start_paused = true)]
    async fn early_failures_do_not_report_loss() {
        let transport = MockTransport::new();
        transport.set_default(OpenPlan::Fail("refused".into()));
        let (manager, mut rx) = ConnectionManager::connect(Arc::new(transport.clone()), config());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(notices(&mut rx).is_empty());
        assert_eq!(manager.state().status, ConnectionStatus::Connecting);
        assert!(manager.state().attempts > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_times_out_and_retries() {
        let transport = MockTransport::with_plans([OpenPlan::Hang]);
        let (manager, _rx) = ConnectionManager::connect(Arc::new(transport.clone()), config());
        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(
            manager.state().last_disconnect_reason,
            Some(DisconnectReason::Timeout)
        );
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(manager.state().is_connected());
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_is_fatal() {
        let transport = MockTransport::with_plans([OpenPlan::Exhaust]);
        let (manager, mut rx) = ConnectionManager::connect(Arc::new(transport.clone()), config());
        settle().await;
        assert_eq!(manager.state().status, ConnectionStatus::Failed);
        assert!(matches!(
            notices(&mut rx).as_slice(),
            [ConnectionEvent::Fatal { attempts: 1, .. }]
        ));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_budget_is_fatal() {
        let transport = MockTransport::new();
        transport.set_default(OpenPlan::Fail("refused".into()));
        let mut cfg = config();
        cfg.max_attempts = Some(3);
        let (manager, mut rx) = ConnectionManager::connect(Arc::new(transport.clone()), cfg);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(manager.state().status, ConnectionStatus::Failed);
        assert_eq!(transport.open_count(), 3);
        assert!(matches!(
            notices(&mut rx).as_slice(),
            [ConnectionEvent::Fatal { attempts: 3, .. }]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_client_initiated_and_silent() {
        let transport = MockTransport::new();
        let (mut manager, mut rx) = ConnectionManager::connect(Arc::new(transport.clone()), config());
        settle().await;
        manager.close().await;

        let state = manager.state();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert_eq!(
            state.last_disconnect_reason,
            Some(DisconnectReason::ClientInitiated)
        );
        assert_eq!(transport.close_count(), 1);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(notices(&mut rx).is_empty());
        assert_eq!(transport.open_count(), 1);
    }
}
