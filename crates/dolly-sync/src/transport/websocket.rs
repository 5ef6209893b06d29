use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use super::{PushConnection, PushTransport, TransportEvent};
use crate::connection::DisconnectReason;
use crate::error::{SyncError, SyncResult};

/// Push channel over a plain or TLS WebSocket.
pub struct WebSocketTransport {
    url: Url,
}

impl WebSocketTransport {
    pub fn new(url: &str) -> SyncResult<Self> {
        let url = Url::parse(url)?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { url }),
            other => Err(SyncError::Transport(format!(
                "unsupported websocket scheme {other}"
            ))),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    async fn open(&self) -> SyncResult<Box<dyn PushConnection>> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|err| SyncError::Transport(err.to_string()))?;
        debug!(target = "sync::connection", url = %self.url, "websocket connected");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let pump = tokio::spawn(pump_frames(ws_stream, events_tx, close_rx));

        Ok(Box::new(WebSocketConnection {
            events: events_rx,
            close: Some(close_tx),
            pump: Some(pump),
        }))
    }
}

struct WebSocketConnection {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    close: Option<oneshot::Sender<()>>,
    pump: Option<JoinHandle<()>>,
}

#[async_trait]
impl PushConnection for WebSocketConnection {
    async fn recv(&mut self) -> TransportEvent {
        self.events
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed(DisconnectReason::TransportFailure))
    }

    async fn close(&mut self) {
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Forwards inbound frames until the socket ends or a close is requested.
async fn pump_frames(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut close: oneshot::Receiver<()>,
) {
    let (mut sink, mut stream) = ws_stream.split();
    let reason = loop {
        tokio::select! {
            _ = &mut close => {
                let _ = sink.send(Message::Close(None)).await;
                break DisconnectReason::ClientInitiated;
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if events.send(TransportEvent::Frame(text)).is_err() {
                        break DisconnectReason::ClientInitiated;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    let text = String::from_utf8_lossy(&data).into_owned();
                    if events.send(TransportEvent::Frame(text)).is_err() {
                        break DisconnectReason::ClientInitiated;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    trace!(target = "sync::connection", ?frame, "server closed websocket");
                    break DisconnectReason::ServerInitiated;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(target = "sync::connection", error = %err, "websocket stream error");
                    break DisconnectReason::TransportFailure;
                }
                None => break DisconnectReason::TransportFailure,
            }
        }
    };
    let _ = events.send(TransportEvent::Closed(reason));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_websocket_schemes() {
        assert!(WebSocketTransport::new("ws://127.0.0.1:8000/ws").is_ok());
        assert!(matches!(
            WebSocketTransport::new("http://127.0.0.1:8000/ws"),
            Err(SyncError::Transport(_))
        ));
        assert!(matches!(
            WebSocketTransport::new("not a url"),
            Err(SyncError::Url(_))
        ));
    }
}
