use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{SnapshotSource, ViewQuery};
use crate::error::{SyncError, SyncResult};
use crate::model::{Entity, Snapshot};

pub const REVISION_HEADER: &str = "x-revision";

/// Reads view snapshots from the dashboard REST API.
#[derive(Clone)]
pub struct HttpSnapshotSource {
    http: Client,
    base_url: Url,
    id_field: String,
    sequence_field: Option<String>,
}

impl HttpSnapshotSource {
    pub fn new(base_url: &str) -> SyncResult<Self> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            id_field: "id".into(),
            sequence_field: None,
        })
    }

    pub fn with_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    /// Row field holding the entity id, e.g. `dolly_no`.
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    pub fn with_sequence_field(mut self, field: impl Into<String>) -> Self {
        self.sequence_field = Some(field.into());
        self
    }

    fn url_for(&self, query: &ViewQuery) -> SyncResult<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = query.path.trim_start_matches('/');
        let mut url = Url::parse(&format!("{base}/{path}"))?;
        if !query.params.is_empty() {
            url.query_pairs_mut().extend_pairs(query.params.iter());
        }
        Ok(url)
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self, query: &ViewQuery) -> SyncResult<Snapshot> {
        let url = self.url_for(query)?;
        let res = self.http.get(url.clone()).send().await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(SyncError::UnexpectedStatus { status, body });
        }

        let header_revision = res
            .headers()
            .get(REVISION_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        let body: Value = serde_json::from_slice(&res.bytes().await?)?;
        let snapshot = decode_snapshot(
            body,
            header_revision,
            &self.id_field,
            self.sequence_field.as_deref(),
        )?;
        debug!(
            target = "sync::fetch",
            url = %url,
            revision = snapshot.revision,
            entities = snapshot.entities.len(),
            "fetched snapshot"
        );
        Ok(snapshot)
    }
}

/// Turns a listing body into a snapshot.
///
/// The body is either a bare array of rows or an object carrying the rows
/// under `entities`, `items` or `data`, optionally with a `revision`. Without
/// a body or header revision the receive time in milliseconds is used.
pub fn decode_snapshot(
    body: Value,
    header_revision: Option<u64>,
    id_field: &str,
    sequence_field: Option<&str>,
) -> SyncResult<Snapshot> {
    let (body_revision, rows) = match body {
        Value::Array(rows) => (None, rows),
        Value::Object(mut object) => {
            let revision = object.get("revision").and_then(Value::as_u64);
            let rows = ["entities", "items", "data"]
                .iter()
                .find_map(|key| match object.remove(*key) {
                    Some(Value::Array(rows)) => Some(rows),
                    _ => None,
                })
                .ok_or_else(|| SyncError::Malformed("listing has no entity array".into()))?;
            (revision, rows)
        }
        other => {
            return Err(SyncError::Malformed(format!(
                "listing must be an array or object, got {}",
                kind_of(&other)
            )))
        }
    };

    let mut entities = Vec::with_capacity(rows.len());
    for (idx, row) in rows.into_iter().enumerate() {
        let id = match row.get(id_field) {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                warn!(target = "sync::fetch", index = idx, field = id_field, "skipping row without an id");
                continue;
            }
        };
        let sequence = sequence_field
            .and_then(|field| row.get(field))
            .and_then(Value::as_u64)
            .unwrap_or(idx as u64);
        entities.push(Entity::new(id, sequence, row));
    }

    let revision = body_revision
        .or(header_revision)
        .unwrap_or_else(fallback_revision);
    Ok(Snapshot::new(revision, entities))
}

static LAST_FALLBACK: AtomicU64 = AtomicU64::new(0);

/// Receive time in milliseconds, kept strictly above the last value issued.
fn fallback_revision() -> u64 {
    let now = receive_time_millis();
    let mut prev = LAST_FALLBACK.load(Ordering::Relaxed);
    loop {
        let next = now.max(prev.saturating_add(1));
        match LAST_FALLBACK.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}

fn receive_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
