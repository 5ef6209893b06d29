use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{PushConnection, PushTransport, TransportEvent};
use crate::connection::DisconnectReason;
use crate::error::{SyncError, SyncResult};

/// What the next `open()` call does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenPlan {
    Accept,
    Fail(String),
    /// Never completes; the caller's connect timeout decides.
    Hang,
    Exhaust,
}

#[derive(Debug)]
struct MockState {
    plans: VecDeque<OpenPlan>,
    default_plan: OpenPlan,
    opens: usize,
    closes: usize,
    active: Option<mpsc::UnboundedSender<TransportEvent>>,
}

/// Simple scripted in-memory push transport for testing.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_plans(Vec::new())
    }

    /// Plans are consumed one per `open()`; afterwards the default applies.
    pub fn with_plans(plans: impl IntoIterator<Item = OpenPlan>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                plans: plans.into_iter().collect(),
                default_plan: OpenPlan::Accept,
                opens: 0,
                closes: 0,
                active: None,
            })),
        }
    }

    pub fn push_plan(&self, plan: OpenPlan) {
        self.state.lock().plans.push_back(plan);
    }

    pub fn set_default(&self, plan: OpenPlan) {
        self.state.lock().default_plan = plan;
    }

    /// Delivers a frame on the open connection. Returns false when none is open.
    pub fn push_frame(&self, frame: impl Into<String>) -> bool {
        let state = self.state.lock();
        match &state.active {
            Some(tx) => tx.send(TransportEvent::Frame(frame.into())).is_ok(),
            None => false,
        }
    }

    /// Ends the open connection as if the far side went away.
    pub fn drop_connection(&self, reason: DisconnectReason) -> bool {
        let mut state = self.state.lock();
        match state.active.take() {
            Some(tx) => tx.send(TransportEvent::Closed(reason)).is_ok(),
            None => false,
        }
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    pub fn is_connected(&self) -> bool {
        self.state
            .lock()
            .active
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }
}

#[async_trait]
impl PushTransport for MockTransport {
    async fn open(&self) -> SyncResult<Box<dyn PushConnection>> {
        {
            let mut state = self.state.lock();
            state.opens += 1;
            let plan = match state.plans.pop_front() {
                Some(plan) => plan,
                None => state.default_plan.clone(),
            };
            match plan {
                OpenPlan::Accept => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    state.active = Some(tx);
                    return Ok(Box::new(MockConnection {
                        events: rx,
                        state: self.state.clone(),
                    }));
                }
                OpenPlan::Fail(reason) => return Err(SyncError::Transport(reason)),
                OpenPlan::Exhaust => {
                    return Err(SyncError::Exhausted {
                        attempts: state.opens as u32,
                    })
                }
                OpenPlan::Hang => {}
            }
        }
        std::future::pending::<()>().await;
        Err(SyncError::Closed)
    }
}

struct MockConnection {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl PushConnection for MockConnection {
    async fn recv(&mut self) -> TransportEvent {
        self.events
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed(DisconnectReason::TransportFailure))
    }

    async fn close(&mut self) {
        let mut state = self.state.lock();
        state.closes += 1;
        state.active = None;
        self.events.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plans_are_consumed_in_order() {
        let transport = MockTransport::with_plans([OpenPlan::Fail("refused".into())]);
        assert!(matches!(transport.open().await, Err(SyncError::Transport(_))));
        let mut conn = transport.open().await.unwrap();
        assert_eq!(transport.open_count(), 2);

        assert!(transport.push_frame(r#"{"type":"entity-updated"}"#));
        assert_eq!(
            conn.recv().await,
            TransportEvent::Frame(r#"{"type":"entity-updated"}"#.into())
        );

        assert!(transport.drop_connection(DisconnectReason::ServerInitiated));
        assert_eq!(
            conn.recv().await,
            TransportEvent::Closed(DisconnectReason::ServerInitiated)
        );
        assert!(!transport.push_frame("late"));

        transport.push_plan(OpenPlan::Fail("busy".into()));
        assert!(matches!(transport.open().await, Err(SyncError::Transport(_))));
        assert!(transport.open().await.is_ok());
        assert_eq!(transport.open_count(), 4);
    }

    #[tokio::test]
    async fn exhaust_reports_attempts() {
        let transport = MockTransport::new();
        transport.set_default(OpenPlan::Exhaust);
        assert!(matches!(
            transport.open().await,
            Err(SyncError::Exhausted { attempts: 1 })
        ));
    }
}
