//! Push channel seam. The connection manager only ever sees these traits.

use async_trait::async_trait;

use crate::connection::DisconnectReason;
use crate::error::SyncResult;

pub mod mock;
pub mod websocket;

pub use mock::{MockTransport, OpenPlan};
pub use websocket::WebSocketTransport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    Closed(DisconnectReason),
}

/// One open push connection.
#[async_trait]
pub trait PushConnection: Send {
    /// Next frame or the close that ended the connection. Must be cancel-safe:
    /// dropping the future may not lose a frame.
    async fn recv(&mut self) -> TransportEvent;

    async fn close(&mut self);
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Opens a fresh connection. [`crate::SyncError::Exhausted`] tells the
    /// caller to stop retrying; every other error is retried.
    async fn open(&self) -> SyncResult<Box<dyn PushConnection>>;
}
