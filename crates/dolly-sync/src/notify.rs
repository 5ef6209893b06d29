//! Single-slot transient notifications.
//!
//! At most one notification is shown; a new one replaces the current one in a
//! single slot update and cancels its timers. Auto-dismiss runs in two phases
//! (`Visible` for the TTL, then `Hiding` for the removal transition) before
//! the slot is `Empty` again. A persistent notification outlives transient
//! ones shown after it: once their removal ends it is visible again, until
//! [`NotificationCenter::dismiss`] hides it. When the dashboard is not visible
//! a platform notification is attempted as a best effort.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SyncResult;
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    /// Maps the loose labels servers put in notification payloads.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "success" | "ok" => Severity::Success,
            "warning" | "warn" => Severity::Warning,
            "error" | "danger" | "fatal" => Severity::Error,
            _ => Severity::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: u64,
    pub message: String,
    pub severity: Severity,
    pub created_at: SystemTime,
    /// `None` stays until dismissed or replaced.
    pub ttl: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Slot {
    #[default]
    Empty,
    Visible(Notification),
    /// Removal transition; the slot empties when it ends.
    Hiding(Notification),
}

impl Slot {
    pub fn notification(&self) -> Option<&Notification> {
        match self {
            Slot::Empty => None,
            Slot::Visible(n) | Slot::Hiding(n) => Some(n),
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, Slot::Empty)
    }

    pub fn is_visible(&self) -> bool {
        matches!(self, Slot::Visible(_))
    }
}

pub trait Visibility: Send + Sync {
    fn is_visible(&self) -> bool;
}

impl<F> Visibility for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_visible(&self) -> bool {
        (self)()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// OS-level notifications (desktop, terminal bell, ...).
#[async_trait]
pub trait PlatformNotifier: Send + Sync {
    async fn request_permission(&self) -> SyncResult<Permission>;
    async fn notify(&self, title: &str, body: &str, tag: &str) -> SyncResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    pub default_ttl: Duration,
    pub removal_delay: Duration,
    /// Title used for platform notifications.
    pub title: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_millis(3000),
            removal_delay: Duration::from_millis(300),
            title: "Dolly dashboard".into(),
        }
    }
}

#[derive(Default)]
struct Timers {
    generation: u64,
    next_id: u64,
    timer: Option<JoinHandle<()>>,
    /// Latest persistent notification not yet dismissed.
    persistent: Option<Notification>,
}

struct Inner {
    config: NotificationConfig,
    slot: watch::Sender<Slot>,
    timers: Mutex<Timers>,
    platform: Option<Arc<dyn PlatformNotifier>>,
    visibility: Arc<dyn Visibility>,
    permission: OnceCell<Permission>,
}

#[derive(Clone)]
pub struct NotificationCenter {
    inner: Arc<Inner>,
}

pub struct NotificationCenterBuilder {
    config: NotificationConfig,
    platform: Option<Arc<dyn PlatformNotifier>>,
    visibility: Arc<dyn Visibility>,
}

impl NotificationCenterBuilder {
    pub fn platform(mut self, platform: Arc<dyn PlatformNotifier>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn visibility(mut self, visibility: impl Visibility + 'static) -> Self {
        self.visibility = Arc::new(visibility);
        self
    }

    pub fn build(self) -> NotificationCenter {
        let (slot, _) = watch::channel(Slot::Empty);
        NotificationCenter {
            inner: Arc::new(Inner {
                config: self.config,
                slot,
                timers: Mutex::new(Timers::default()),
                platform: self.platform,
                visibility: self.visibility,
                permission: OnceCell::new(),
            }),
        }
    }
}

impl NotificationCenter {
    pub fn new(config: NotificationConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: NotificationConfig) -> NotificationCenterBuilder {
        NotificationCenterBuilder {
            config,
            platform: None,
            visibility: Arc::new(|| true),
        }
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.inner.config
    }

    /// Shows `message` with the default TTL.
    pub fn notify(&self, message: impl Into<String>, severity: Severity) -> u64 {
        self.show(message, severity, self.inner.config.default_ttl)
    }

    pub fn show(&self, message: impl Into<String>, severity: Severity, ttl: Duration) -> u64 {
        self.replace(message.into(), severity, Some(ttl))
    }

    pub fn show_persistent(&self, message: impl Into<String>, severity: Severity) -> u64 {
        self.replace(message.into(), severity, None)
    }

    /// Starts the removal transition of the visible notification, if any.
    /// Dismissing a persistent notification drops it for good.
    pub fn dismiss(&self) {
        let mut timers = self.inner.timers.lock();
        let Slot::Visible(current) = self.inner.slot.borrow().clone() else {
            return;
        };
        if timers.persistent.as_ref().map(|n| n.id) == Some(current.id) {
            timers.persistent = None;
        }
        timers.generation += 1;
        if let Some(timer) = timers.timer.take() {
            timer.abort();
        }
        self.inner.slot.send_replace(Slot::Hiding(current));
        let generation = timers.generation;
        timers.timer = Some(tokio::spawn(remove_after(
            Arc::downgrade(&self.inner),
            generation,
            self.inner.config.removal_delay,
        )));
    }

    pub fn current(&self) -> Slot {
        self.inner.slot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Slot> {
        self.inner.slot.subscribe()
    }

    fn replace(&self, message: String, severity: Severity, ttl: Option<Duration>) -> u64 {
        let notification = {
            let mut timers = self.inner.timers.lock();
            timers.generation += 1;
            timers.next_id += 1;
            if let Some(timer) = timers.timer.take() {
                timer.abort();
            }

            let notification = Notification {
                id: timers.next_id,
                message,
                severity,
                created_at: SystemTime::now(),
                ttl,
            };
            if ttl.is_none() {
                timers.persistent = Some(notification.clone());
            }
            self.inner.slot.send_replace(Slot::Visible(notification.clone()));

            if let Some(ttl) = ttl {
                let generation = timers.generation;
                timers.timer = Some(tokio::spawn(expire_after(
                    Arc::downgrade(&self.inner),
                    generation,
                    ttl,
                )));
            }
            notification
        };
        let id = notification.id;

        metrics::NOTIFICATIONS
            .with_label_values(&[severity.as_str()])
            .inc();
        debug!(target = "sync::notify", id, severity = severity.as_str(), message = %notification.message, "notification shown");

        if let Some(platform) = self.inner.platform.clone() {
            if !self.inner.visibility.is_visible() {
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    escalate(&inner, platform.as_ref(), &notification).await;
                    debug!(target = "sync::notify", id, "platform escalation finished");
                });
            }
        }
        id
    }
}

async fn expire_after(inner: Weak<Inner>, generation: u64, ttl: Duration) {
    tokio::time::sleep(ttl).await;
    let Some(strong) = inner.upgrade() else {
        return;
    };
    let removal_delay = {
        let timers = strong.timers.lock();
        if timers.generation != generation {
            return;
        }
        let current = strong.slot.borrow().clone();
        if let Slot::Visible(notification) = current {
            strong.slot.send_replace(Slot::Hiding(notification));
        }
        strong.config.removal_delay
    };
    drop(strong);
    remove_after(inner, generation, removal_delay).await;
}

async fn remove_after(inner: Weak<Inner>, generation: u64, delay: Duration) {
    tokio::time::sleep(delay).await;
    let Some(strong) = inner.upgrade() else {
        return;
    };
    let timers = strong.timers.lock();
    if timers.generation != generation {
        return;
    }
    let next = match &timers.persistent {
        Some(persistent) => Slot::Visible(persistent.clone()),
        None => Slot::Empty,
    };
    strong.slot.send_replace(next);
}

async fn escalate(inner: &Inner, platform: &dyn PlatformNotifier, notification: &Notification) {
    let permission = inner
        .permission
        .get_or_init(|| async {
            match platform.request_permission().await {
                Ok(permission) => permission,
                Err(err) => {
                    warn!(target = "sync::notify", error = %err, "notification permission request failed");
                    Permission::Denied
                }
            }
        })
        .await;
    if *permission != Permission::Granted {
        return;
    }

    let stamp = notification
        .created_at
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let tag = format!("dolly-{}-{stamp}", notification.severity.as_str());
    if let Err(err) = platform
        .notify(&inner.config.title, &notification.message, &tag)
        .await
    {
        warn!(target = "sync::notify", error = %err, tag = %tag, "platform notification failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::sleep;

    #[derive(Default)]
    struct RecordingNotifier {
        permission_requests: AtomicUsize,
        sent: Mutex<Vec<(String, String, String)>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl PlatformNotifier for RecordingNotifier {
        async fn request_permission(&self) -> SyncResult<Permission> {
            self.permission_requests.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::Transport("no notification daemon".into()));
            }
            Ok(Permission::Granted)
        }

        async fn notify(&self, title: &str, body: &str, tag: &str) -> SyncResult<()> {
            self.sent
                .lock()
                .push((title.to_string(), body.to_string(), tag.to_string()));
            Ok(())
        }
    }

    fn message(center: &NotificationCenter) -> Option<String> {
        center.current().notification().map(|n| n.message.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn auto_dismiss_is_two_phase() {
        let center = NotificationCenter::new(NotificationConfig::default());
        center.show("2 new items", Severity::Info, Duration::from_secs(3));
        assert!(center.current().is_visible());

        sleep(Duration::from_millis(2_900)).await;
        assert!(center.current().is_visible());
        sleep(Duration::from_millis(200)).await;
        assert!(matches!(center.current(), Slot::Hiding(_)));
        sleep(Duration::from_millis(300)).await;
        assert!(center.current().is_free());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_notification_preempts_and_owns_the_timers() {
        let center = NotificationCenter::new(NotificationConfig::default());
        let mut slots = center.subscribe();
        center.show("first", Severity::Info, Duration::from_secs(3));
        sleep(Duration::from_secs(1)).await;
        center.show("second", Severity::Warning, Duration::from_secs(3));

        assert_eq!(message(&center).as_deref(), Some("second"));
        assert!(!slots.borrow_and_update().is_free());

        // the first notification's timer would have fired here
        sleep(Duration::from_millis(2_500)).await;
        assert!(center.current().is_visible());
        assert_eq!(message(&center).as_deref(), Some("second"));

        sleep(Duration::from_millis(600)).await;
        assert!(matches!(center.current(), Slot::Hiding(_)));
        sleep(Duration::from_millis(400)).await;
        assert!(center.current().is_free());
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_stays_until_dismissed() {
        let center = NotificationCenter::new(NotificationConfig::default());
        center.show_persistent("Cannot reach the server", Severity::Error);
        sleep(Duration::from_secs(60)).await;
        assert!(center.current().is_visible());

        center.dismiss();
        assert!(matches!(center.current(), Slot::Hiding(_)));
        sleep(Duration::from_millis(350)).await;
        assert!(center.current().is_free());
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_returns_after_transient_preempts_it() {
        let center = NotificationCenter::new(NotificationConfig::default());
        let fatal = center.show_persistent("Cannot reach the server", Severity::Error);
        center.notify("1 new item", Severity::Info);
        assert_eq!(message(&center).as_deref(), Some("1 new item"));

        sleep(Duration::from_millis(3_100)).await;
        assert!(matches!(center.current(), Slot::Hiding(_)));
        sleep(Duration::from_millis(300)).await;
        match center.current() {
            Slot::Visible(notification) => {
                assert_eq!(notification.id, fatal);
                assert_eq!(notification.ttl, None);
            }
            other => panic!("expected the persistent notification back, got {other:?}"),
        }

        sleep(Duration::from_secs(60)).await;
        assert!(center.current().is_visible());
        center.dismiss();
        sleep(Duration::from_millis(350)).await;
        assert!(center.current().is_free());

        // once dismissed it does not come back after later notices
        center.show("Live updates reconnected", Severity::Success, Duration::from_secs(2));
        sleep(Duration::from_millis(2_400)).await;
        assert!(center.current().is_free());
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_tab_escalates_and_asks_permission_once() {
        let notifier = Arc::new(RecordingNotifier::default());
        let center = NotificationCenter::builder(NotificationConfig::default())
            .platform(notifier.clone())
            .visibility(|| false)
            .build();

        center.notify("Task 7: done", Severity::Info);
        sleep(Duration::from_millis(1)).await;
        center.notify("2 new items", Severity::Info);
        sleep(Duration::from_millis(1)).await;

        assert_eq!(notifier.permission_requests.load(Ordering::SeqCst), 1);
        let sent = notifier.sent.lock().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].0, center.config().title);
        assert_eq!(sent[1].1, "2 new items");
        assert!(sent[1].2.starts_with("dolly-info-"));
    }

    #[tokio::test(start_paused = true)]
    async fn visible_tab_and_failures_stay_local() {
        let notifier = Arc::new(RecordingNotifier::default());
        let visible = NotificationCenter::builder(NotificationConfig::default())
            .platform(notifier.clone())
            .build();
        visible.notify("hello", Severity::Info);
        sleep(Duration::from_millis(1)).await;
        assert_eq!(notifier.permission_requests.load(Ordering::SeqCst), 0);

        let failing = Arc::new(RecordingNotifier::default());
        failing.fail.store(true, Ordering::SeqCst);
        let hidden = NotificationCenter::builder(NotificationConfig::default())
            .platform(failing.clone())
            .visibility(|| false)
            .build();
        hidden.notify("one", Severity::Info);
        sleep(Duration::from_millis(1)).await;
        hidden.notify("two", Severity::Info);
        sleep(Duration::from_millis(1)).await;
        assert_eq!(failing.permission_requests.load(Ordering::SeqCst), 1);
        assert!(failing.sent.lock().is_empty());
        assert_eq!(message(&hidden).as_deref(), Some("two"));
    }

    #[test]
    fn severity_labels() {
        assert_eq!(Severity::from_label("SUCCESS"), Severity::Success);
        assert_eq!(Severity::from_label("warn"), Severity::Warning);
        assert_eq!(Severity::from_label("danger"), Severity::Error);
        assert_eq!(Severity::from_label("whatever"), Severity::Info);
    }
}
