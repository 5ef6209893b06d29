//! dolly-sync: the live synchronization layer shared by the dolly dashboards.
//!
//! Responsibilities:
//! - holding one resilient push connection with reconnect and loss notices
//! - routing pushed events and coalescing them into bounded per-view refreshes
//! - reconciling fetched snapshots into view models without losing sticky flags
//! - surfacing transient notifications and driving passive auto-scroll loops

pub mod autoscroll;
pub mod config;
pub mod connection;
pub mod debounce;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod reconcile;
pub mod registry;
pub mod router;
pub mod session;
pub mod transport;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use model::{Entity, EntityId, Snapshot, StickyFlags, ViewId, ViewModel};
pub use session::DashboardSession;
