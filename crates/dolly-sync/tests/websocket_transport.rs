use std::time::Duration;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use dolly_sync::connection::DisconnectReason;
use dolly_sync::transport::{PushConnection, PushTransport, TransportEvent, WebSocketTransport};
use tokio::net::TcpListener;
use tokio::time::timeout;

const FRAME: &str = r#"{"type":"entity-updated","data":{"id":"X"}}"#;

async fn closes_politely(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let _ = socket.send(Message::Text(FRAME.into())).await;
        let _ = socket.send(Message::Binary(vec![b'h', b'i', 0xff])).await;
        let _ = socket.send(Message::Close(None)).await;
        while let Some(Ok(_)) = socket.recv().await {}
    })
}

async fn hangs_up(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let _ = socket.send(Message::Text(FRAME.into())).await;
        // dropped without a close frame
    })
}

async fn listens(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        while let Some(Ok(_)) = socket.recv().await {}
    })
}

async fn serve() -> String {
    let app = Router::new()
        .route("/close", get(closes_politely))
        .route("/drop", get(hangs_up))
        .route("/listen", get(listens));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}")
}

async fn open(url: String) -> Box<dyn PushConnection> {
    WebSocketTransport::new(&url).unwrap().open().await.unwrap()
}

async fn next(connection: &mut Box<dyn PushConnection>) -> TransportEvent {
    timeout(Duration::from_secs(5), connection.recv())
        .await
        .expect("transport event within 5s")
}

#[tokio::test]
async fn forwards_frames_and_reports_server_close() {
    let base = serve().await;
    let mut connection = open(format!("{base}/close")).await;

    assert_eq!(next(&mut connection).await, TransportEvent::Frame(FRAME.into()));
    assert_eq!(
        next(&mut connection).await,
        TransportEvent::Frame("hi\u{FFFD}".into())
    );
    assert_eq!(
        next(&mut connection).await,
        TransportEvent::Closed(DisconnectReason::ServerInitiated)
    );
}

#[tokio::test]
async fn dropped_socket_is_a_transport_failure() {
    let base = serve().await;
    let mut connection = open(format!("{base}/drop")).await;

    assert_eq!(next(&mut connection).await, TransportEvent::Frame(FRAME.into()));
    assert_eq!(
        next(&mut connection).await,
        TransportEvent::Closed(DisconnectReason::TransportFailure)
    );
}

#[tokio::test]
async fn local_close_is_client_initiated() {
    let base = serve().await;
    let mut connection = open(format!("{base}/listen")).await;

    connection.close().await;
    assert_eq!(
        next(&mut connection).await,
        TransportEvent::Closed(DisconnectReason::ClientInitiated)
    );
}
