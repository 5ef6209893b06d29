//! Classifies push messages and fans refresh triggers out to interested views.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::connection::PushMessage;
use crate::debounce::Trigger;
use crate::metrics;
use crate::model::ViewId;
use crate::notify::Severity;
use crate::registry::ViewRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PushKind {
    EntityCreated,
    EntityUpdated,
    ManualCollection,
    SubmitCompleted,
    TaskUpdate,
    NewEntitiesAvailable,
    GenericNotification,
    Unknown(String),
}

impl PushKind {
    /// Case-insensitive; `_` and `-` are interchangeable.
    pub fn parse(tag: &str) -> Self {
        let normalized = tag.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "entity-created" | "group-created" => PushKind::EntityCreated,
            "entity-updated" | "shipment-updated" | "dashboard-update" => PushKind::EntityUpdated,
            "manual-collection" => PushKind::ManualCollection,
            "submit-completed" | "manual-submit-completed" => PushKind::SubmitCompleted,
            "task-update" | "task-updated" => PushKind::TaskUpdate,
            "new-entities-available" | "new-dollys-available" => PushKind::NewEntitiesAvailable,
            "generic-notification" | "notification" => PushKind::GenericNotification,
            _ => PushKind::Unknown(normalized),
        }
    }

    pub fn class(&self) -> EventClass {
        match self {
            PushKind::GenericNotification => EventClass::Informational,
            PushKind::Unknown(_) => EventClass::Unknown,
            _ => EventClass::Mutating,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PushKind::EntityCreated => "entity-created",
            PushKind::EntityUpdated => "entity-updated",
            PushKind::ManualCollection => "manual-collection",
            PushKind::SubmitCompleted => "submit-completed",
            PushKind::TaskUpdate => "task-update",
            PushKind::NewEntitiesAvailable => "new-entities-available",
            PushKind::GenericNotification => "generic-notification",
            PushKind::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for PushKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Mutating,
    Informational,
    Unknown,
}

impl EventClass {
    /// Unknown tags refresh as well.
    pub fn triggers_refresh(&self) -> bool {
        !matches!(self, EventClass::Informational)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventClass::Mutating => "mutating",
            EventClass::Informational => "informational",
            EventClass::Unknown => "unknown",
        }
    }
}

/// A user-facing message derived from a business event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    pub severity: Severity,
    pub ttl: Duration,
}

impl Notice {
    fn new(message: String, severity: Severity, ttl_ms: u64) -> Self {
        Self {
            message,
            severity,
            ttl: Duration::from_millis(ttl_ms),
        }
    }

    pub fn derive(kind: &PushKind, data: &Value) -> Option<Self> {
        let text = |key: &str| field_text(data, key);
        match kind {
            PushKind::ManualCollection => {
                let group = text("group_name").unwrap_or_else(|| "?".into());
                let count = text("dolly_count").unwrap_or_else(|| "0".into());
                let mut message = format!("Manual collection: {group} - {count} dollies");
                if let Some(actor) = text("actor") {
                    message.push_str(&format!(" ({actor})"));
                }
                Some(Notice::new(message, Severity::Info, 5000))
            }
            PushKind::SubmitCompleted => {
                let dollies = text("dolly_count").unwrap_or_else(|| "0".into());
                let vins = text("vin_count").unwrap_or_else(|| "0".into());
                let mut message = format!("{dollies} dollies / {vins} VINs submitted");
                if let Some(part) = text("part_number") {
                    message.push_str(&format!(" • {part}"));
                }
                Some(Notice::new(message, Severity::Success, 5000))
            }
            PushKind::EntityCreated => text("group_name").map(|group| {
                Notice::new(format!("New group created: {group}"), Severity::Success, 4000)
            }),
            PushKind::EntityUpdated => text("shipment_tag").map(|tag| {
                let message = match text("status") {
                    Some(status) => format!("Shipment updated: {tag} - {status}"),
                    None => format!("Shipment updated: {tag}"),
                };
                Notice::new(message, Severity::Info, 4000)
            }),
            PushKind::TaskUpdate => {
                let message = match (text("task_id"), text("status")) {
                    (Some(id), Some(status)) => format!("Task #{id} status: {status}"),
                    (Some(id), None) => format!("Task #{id} updated"),
                    _ => "Task updated".to_string(),
                };
                Some(Notice::new(message, Severity::Info, 3000))
            }
            PushKind::NewEntitiesAvailable => text("new_count").map(|count| {
                Notice::new(format!("{count} new dollies added"), Severity::Success, 5000)
            }),
            PushKind::GenericNotification => text("message").map(|message| {
                let severity = text("notification_type")
                    .map(|label| Severity::from_label(&label))
                    .unwrap_or(Severity::Info);
                Notice::new(message, severity, 5000)
            }),
            PushKind::Unknown(_) => None,
        }
    }
}

fn field_text(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub kind: PushKind,
    pub class: EventClass,
    /// Views that were sent a debounced refresh trigger.
    pub targets: Vec<ViewId>,
    pub notice: Option<Notice>,
}

pub struct EventRouter {
    registry: Arc<ViewRegistry>,
}

impl EventRouter {
    pub fn new(registry: Arc<ViewRegistry>) -> Self {
        Self { registry }
    }

    /// Classification only; nothing is triggered.
    pub fn classify(&self, message: &PushMessage) -> RouteDecision {
        let kind = PushKind::parse(&message.kind);
        let class = kind.class();
        let targets = if class.triggers_refresh() {
            self.registry.interested_in(&kind)
        } else {
            Vec::new()
        };
        let notice = Notice::derive(&kind, &message.data);
        RouteDecision {
            kind,
            class,
            targets,
            notice,
        }
    }

    /// Classifies `message` and sends a debounced refresh to every target.
    pub fn route(&self, message: &PushMessage) -> RouteDecision {
        let decision = self.classify(message);
        metrics::PUSH_MESSAGES
            .with_label_values(&[decision.class.as_str()])
            .inc();
        for view in &decision.targets {
            self.registry.trigger(view, Trigger::Debounced);
        }
        debug!(
            target = "sync::router",
            kind = %decision.kind,
            class = decision.class.as_str(),
            targets = decision.targets.len(),
            notice = decision.notice.is_some(),
            "routed push message"
        );
        decision
    }
}
