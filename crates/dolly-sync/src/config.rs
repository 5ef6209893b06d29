use std::env;
use std::time::Duration;

use crate::autoscroll::ScrollTiming;
use crate::connection::{ConnectionConfig, ReconnectPolicy};
use crate::debounce::DebounceConfig;
use crate::notify::NotificationConfig;
use crate::reconcile::ReconcilePolicy;

pub const DEFAULT_LOG_FILTER: &str = "info,dolly_sync=debug,dolly_watch=debug";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub ws_url: String,
    pub api_base: String,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub connect_timeout: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub debounce: Duration,
    pub fetch_timeout: Duration,
    pub loss_grace: Duration,
    pub notify_ttl: Duration,
    pub scroll_settle: Duration,
    pub scroll_pause: Duration,
    pub scroll_min_slide: Duration,
    pub scroll_per_px: Duration,
    pub auto_expand: bool,
    pub log_filter: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; unparsable values fall
    /// back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |key: &str, default: u64| {
            Duration::from_millis(
                lookup(key)
                    .and_then(|val| val.trim().parse().ok())
                    .unwrap_or(default),
            )
        };

        Self {
            ws_url: lookup("DOLLY_WS_URL").unwrap_or_else(|| "ws://127.0.0.1:8000/ws".into()),
            api_base: lookup("DOLLY_API_BASE").unwrap_or_else(|| "http://127.0.0.1:8000".into()),
            reconnect_base: millis("DOLLY_RECONNECT_BASE_MS", 2_000),
            reconnect_max: millis("DOLLY_RECONNECT_MAX_MS", 10_000),
            connect_timeout: millis("DOLLY_CONNECT_TIMEOUT_MS", 20_000),
            max_attempts: lookup("DOLLY_MAX_RECONNECT_ATTEMPTS")
                .and_then(|val| val.trim().parse().ok())
                .filter(|attempts: &u32| *attempts > 0),
            debounce: millis("DOLLY_DEBOUNCE_MS", 500),
            fetch_timeout: millis("DOLLY_FETCH_TIMEOUT_MS", 10_000),
            loss_grace: millis("DOLLY_LOSS_GRACE_MS", 5_000),
            notify_ttl: millis("DOLLY_NOTIFY_TTL_MS", 3_000),
            scroll_settle: millis("DOLLY_SCROLL_SETTLE_MS", 1_500),
            scroll_pause: millis("DOLLY_SCROLL_PAUSE_MS", 2_000),
            scroll_min_slide: millis("DOLLY_SCROLL_MIN_SLIDE_MS", 2_000),
            scroll_per_px: millis("DOLLY_SCROLL_MS_PER_PX", 50),
            auto_expand: lookup("DOLLY_AUTO_EXPAND")
                .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
                .unwrap_or(true),
            log_filter: lookup("RUST_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.into()),
        }
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            reconnect: ReconnectPolicy {
                base_delay: self.reconnect_base,
                max_delay: self.reconnect_max,
            },
            connect_timeout: self.connect_timeout,
            loss_grace: self.loss_grace,
            max_attempts: self.max_attempts,
        }
    }

    pub fn reconcile_policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            auto_expand_arrivals: self.auto_expand,
        }
    }

    pub fn debounce(&self) -> DebounceConfig {
        DebounceConfig {
            window: self.debounce,
            fetch_timeout: self.fetch_timeout,
            policy: self.reconcile_policy(),
        }
    }

    pub fn notifications(&self) -> NotificationConfig {
        NotificationConfig {
            default_ttl: self.notify_ttl,
            ..NotificationConfig::default()
        }
    }

    pub fn scroll(&self) -> ScrollTiming {
        ScrollTiming {
            settle: self.scroll_settle,
            pause_start: self.scroll_pause,
            pause_end: self.scroll_pause,
            min_slide: self.scroll_min_slide,
            per_px: self.scroll_per_px,
            ..ScrollTiming::default()
        }
    }
}
