use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static CONNECTION_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("dolly_connection_attempts_total", "Push channel connection attempts"),
        &["outcome"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static PUSH_MESSAGES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("dolly_push_messages_total", "Routed push messages by class"),
        &["class"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static MALFORMED_FRAMES: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "dolly_malformed_frames_total",
        "Push frames dropped because they could not be parsed",
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static FETCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("dolly_snapshot_fetches_total", "Snapshot fetches by outcome"),
        &["view", "outcome"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static FETCH_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    let h = HistogramVec::new(
        HistogramOpts::new("dolly_snapshot_fetch_ms", "Snapshot fetch latency in milliseconds")
            .buckets(vec![
                5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0,
            ]),
        &["view"],
    )
    .unwrap();
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});

pub static RECONCILIATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("dolly_reconciliations_total", "Reconciliation results"),
        &["view", "result"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static NOTIFICATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("dolly_notifications_total", "Notifications shown by severity"),
        &["severity"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

/// Text exposition of every dolly-sync metric.
pub fn render() -> String {
    Lazy::force(&CONNECTION_ATTEMPTS);
    Lazy::force(&PUSH_MESSAGES);
    Lazy::force(&MALFORMED_FRAMES);
    Lazy::force(&FETCHES);
    Lazy::force(&FETCH_LATENCY_MS);
    Lazy::force(&RECONCILIATIONS);
    Lazy::force(&NOTIFICATIONS);

    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    TextEncoder::new().encode(&metric_families, &mut buf).ok();
    String::from_utf8(buf).unwrap_or_default()
}
