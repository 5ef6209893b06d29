use std::collections::HashMap;

use axum::{
    extract::Query,
    http::{HeaderMap, HeaderValue, StatusCode},
    routing::get,
    Json, Router,
};
use dolly_sync::fetch::{HttpSnapshotSource, SnapshotSource, ViewQuery};
use dolly_sync::SyncError;
use serde_json::{json, Value};
use tokio::net::TcpListener;

async fn dollys(Query(params): Query<HashMap<String, String>>) -> (HeaderMap, Json<Value>) {
    let line = params.get("line").cloned().unwrap_or_default();
    let mut headers = HeaderMap::new();
    headers.insert("x-revision", HeaderValue::from_static("41"));
    (
        headers,
        Json(json!([
            { "dolly_no": "D-100", "line": line, "vin_count": 3 },
            { "dolly_no": "D-101", "line": line, "vin_count": 1 },
        ])),
    )
}

async fn tasks() -> Json<Value> {
    Json(json!({
        "revision": 7,
        "items": [{ "id": 12, "status": "open" }],
    }))
}

async fn broken() -> (StatusCode, &'static str) {
    (StatusCode::SERVICE_UNAVAILABLE, "maintenance")
}

async fn serve() -> String {
    let app = Router::new()
        .route("/api/dollys", get(dollys))
        .route("/api/tasks", get(tasks))
        .route("/api/broken", get(broken));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn fetches_array_listing_with_header_revision() {
    let base = serve().await;
    let source = HttpSnapshotSource::new(&base).unwrap().with_id_field("dolly_no");
    let snapshot = source
        .fetch(&ViewQuery::new("/api/dollys").param("line", "V710"))
        .await
        .unwrap();

    assert_eq!(snapshot.revision, 41);
    let ids: Vec<_> = snapshot.entities.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["D-100", "D-101"]);
    assert_eq!(snapshot.entities[0].payload["line"], "V710");
}

#[tokio::test]
async fn fetches_wrapped_listing_with_body_revision() {
    let base = serve().await;
    let source = HttpSnapshotSource::new(&base).unwrap();
    let snapshot = source.fetch(&ViewQuery::new("/api/tasks")).await.unwrap();
    assert_eq!(snapshot.revision, 7);
    assert_eq!(snapshot.entities[0].id, "12");
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let base = serve().await;
    let source = HttpSnapshotSource::new(&base).unwrap();
    match source.fetch(&ViewQuery::new("/api/broken")).await {
        Err(SyncError::UnexpectedStatus { status, body }) => {
            assert_eq!(status.as_u16(), 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("expected unexpected-status error, got {other:?}"),
    }
}
