use std::fmt;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Retrying stopped; only a new session restarts the channel.
    Failed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the last connection ended, as classified by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the channel on purpose.
    ServerInitiated,
    /// The underlying stream broke.
    TransportFailure,
    /// A connection attempt did not complete in time.
    Timeout,
    ClientInitiated,
}

impl DisconnectReason {
    /// Closes that warrant a loss notice if they outlast the grace window.
    pub fn is_alarming(&self) -> bool {
        matches!(
            self,
            DisconnectReason::ServerInitiated | DisconnectReason::TransportFailure
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ServerInitiated => "server_initiated",
            DisconnectReason::TransportFailure => "transport_failure",
            DisconnectReason::Timeout => "timeout",
            DisconnectReason::ClientInitiated => "client_initiated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Attempts since the last successful connect.
    pub attempts: u32,
    pub last_disconnect_reason: Option<DisconnectReason>,
    pub last_connected_at: Option<SystemTime>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            attempts: 0,
            last_disconnect_reason: None,
            last_connected_at: None,
        }
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn has_connected(&self) -> bool {
        self.last_connected_at.is_some()
    }
}
