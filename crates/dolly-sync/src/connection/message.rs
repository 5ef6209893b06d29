use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};

/// A server push: a type tag plus an opaque data object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl PushMessage {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Parses a push frame.
    ///
    /// Accepts `{"type": .., "data": {..}}` and the older event envelope
    /// `{"event": .., "payload": {..}}`. A `dolly_update` envelope carries the
    /// real tag inside its payload.
    pub fn parse(frame: &str) -> SyncResult<Self> {
        let value: Value = serde_json::from_str(frame)?;
        let Value::Object(mut object) = value else {
            return Err(SyncError::Malformed("push frame is not an object".into()));
        };

        if let Some(kind) = object.get("type").and_then(Value::as_str) {
            let kind = kind.to_string();
            let data = object.remove("data").unwrap_or(Value::Null);
            return Ok(Self { kind, data });
        }

        let Some(event) = object.get("event").and_then(Value::as_str).map(str::to_string) else {
            return Err(SyncError::Malformed("push frame has no type".into()));
        };
        let mut payload = object
            .remove("payload")
            .or_else(|| object.remove("data"))
            .unwrap_or(Value::Null);

        if event == "dolly_update" {
            let inner_kind = payload.get("type").and_then(Value::as_str).map(str::to_string);
            return match inner_kind {
                Some(kind) => {
                    let data = payload
                        .as_object_mut()
                        .and_then(|inner| inner.remove("data"))
                        .unwrap_or(Value::Null);
                    Ok(Self { kind, data })
                }
                None => Err(SyncError::Malformed("dolly_update without a type".into())),
            };
        }

        Ok(Self {
            kind: event,
            data: payload,
        })
    }
}
