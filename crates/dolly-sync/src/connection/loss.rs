use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use super::ConnectionEvent;

#[derive(Default)]
struct LossState {
    epoch: u64,
    connected: bool,
    lost_shown: bool,
    timer: Option<JoinHandle<()>>,
}

/// Decides when an outage is long enough to tell the user about it.
///
/// At most one `Lost` per outage, and `Restored` only after a `Lost`. Both
/// are sent while holding the state lock so they can never be reordered.
pub(crate) struct LossMonitor {
    grace: Duration,
    state: Arc<Mutex<LossState>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl LossMonitor {
    pub(crate) fn new(grace: Duration, events: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        Self {
            grace,
            state: Arc::new(Mutex::new(LossState::default())),
            events,
        }
    }

    pub(crate) fn on_connected(&self) {
        let mut state = self.state.lock();
        state.connected = true;
        state.epoch += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if std::mem::take(&mut state.lost_shown) {
            info!(target = "sync::connection", "live updates restored after reported loss");
            let _ = self.events.send(ConnectionEvent::Restored);
        }
    }

    /// Arms the grace timer when `alarming`; other closes only mark the link down.
    pub(crate) fn on_disconnected(&self, alarming: bool) {
        let mut state = self.state.lock();
        state.connected = false;
        state.epoch += 1;
        if !alarming || state.lost_shown {
            return;
        }

        let epoch = state.epoch;
        let grace = self.grace;
        let shared = self.state.clone();
        let events = self.events.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut state = shared.lock();
            if state.epoch != epoch || state.connected || state.lost_shown {
                return;
            }
            state.lost_shown = true;
            info!(target = "sync::connection", grace_ms = grace.as_millis() as u64, "connection still down after grace window");
            let _ = events.send(ConnectionEvent::Lost);
        });
        if let Some(previous) = state.timer.replace(timer) {
            previous.abort();
        }
    }

    pub(crate) fn cancel(&self) {
        let mut state = self.state.lock();
        state.epoch += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for LossMonitor {
    fn drop(&mut self) {
        self.cancel();
    }
}
