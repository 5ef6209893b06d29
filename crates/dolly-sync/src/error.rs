use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("transport exhausted its retry budget after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("snapshot fetch timed out after {0:?}")]
    FetchTimeout(Duration),
    #[error("invalid json: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("channel closed")]
    Closed,
}

pub type SyncResult<T> = Result<T, SyncError>;
