//! Passive ping-pong scrolling for containers whose content overflows.
//!
//! One [`AutoScroller`] drives one container. A session starts whenever the
//! rendered content fingerprint changes and runs until the next change or
//! [`AutoScroller::stop`]. Every phase transition re-checks the session's
//! [`CancelToken`] under the phase lock, so a superseded session can never
//! touch the surface again.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::model::ViewModel;

/// Digest of the ordered ids a container is rendering.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of_ids<'a, I>(ids: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut hasher = Sha256::new();
        for id in ids {
            // length prefix keeps ["ab", "c"] and ["a", "bc"] apart
            hasher.update((id.len() as u64).to_be_bytes());
            hasher.update(id.as_bytes());
        }
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..4]))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollPhase {
    Idle,
    SlideForward,
    PauseEnd,
    SlideBack,
    PauseStart,
}

/// Measured sizes along the scroll axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub content: f64,
    pub container: f64,
}

/// The scrollable thing being animated. Calls must not block.
pub trait ScrollSurface: Send + Sync {
    /// `None` while the container or its content is not laid out.
    fn measure(&self) -> Option<Extent>;
    /// Starts a linear move to `offset` over `duration`.
    fn animate_to(&self, offset: f64, duration: Duration);
    /// Jumps to `offset` with no transition.
    fn pin(&self, offset: f64);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollTiming {
    pub settle: Duration,
    pub pause_start: Duration,
    pub pause_end: Duration,
    pub min_slide: Duration,
    pub per_px: Duration,
    pub buffer_px: f64,
}

impl Default for ScrollTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(1500),
            pause_start: Duration::from_millis(2000),
            pause_end: Duration::from_millis(2000),
            min_slide: Duration::from_millis(2000),
            per_px: Duration::from_millis(50),
            buffer_px: 20.0,
        }
    }
}

impl ScrollTiming {
    /// Travel distance, or `None` when nothing overflows.
    pub fn distance(&self, extent: Extent) -> Option<f64> {
        if !extent.content.is_finite() || !extent.container.is_finite() {
            return None;
        }
        let overflow = extent.content - extent.container;
        if overflow <= 0.0 {
            return None;
        }
        Some(overflow + self.buffer_px.max(0.0))
    }

    pub fn slide_duration(&self, distance: f64) -> Duration {
        let scaled = Duration::try_from_secs_f64(self.per_px.as_secs_f64() * distance)
            .unwrap_or(Duration::MAX);
        scaled.max(self.min_slide)
    }
}

/// Identifies one animation session; invalid once a newer session starts.
#[derive(Debug, Clone)]
pub struct CancelToken {
    epoch: u64,
    current: Arc<AtomicU64>,
}

impl CancelToken {
    pub fn is_valid(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.epoch
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

struct SessionState {
    phase: ScrollPhase,
    fingerprint: Option<Fingerprint>,
}

struct Shared {
    surface: Arc<dyn ScrollSurface>,
    timing: ScrollTiming,
    epoch: Arc<AtomicU64>,
    state: Mutex<SessionState>,
}

impl Shared {
    fn token(&self) -> CancelToken {
        CancelToken {
            epoch: self.epoch.load(Ordering::SeqCst),
            current: self.epoch.clone(),
        }
    }

    /// Moves to `next` and issues `command`, unless the session was superseded.
    fn enter(
        &self,
        token: &CancelToken,
        next: ScrollPhase,
        command: impl FnOnce(&dyn ScrollSurface),
    ) -> bool {
        let mut state = self.state.lock();
        if !token.is_valid() {
            trace!(target = "sync::autoscroll", epoch = token.epoch, phase = ?next, "stale session skipped transition");
            return false;
        }
        state.phase = next;
        command(self.surface.as_ref());
        true
    }
}

pub struct AutoScroller {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AutoScroller {
    pub fn new(surface: Arc<dyn ScrollSurface>, timing: ScrollTiming) -> Self {
        Self {
            shared: Arc::new(Shared {
                surface,
                timing,
                epoch: Arc::new(AtomicU64::new(0)),
                state: Mutex::new(SessionState {
                    phase: ScrollPhase::Idle,
                    fingerprint: None,
                }),
            }),
            task: Mutex::new(None),
        }
    }

    /// Restarts the loop if `fingerprint` differs from the one being shown.
    /// Returns whether a new session was started. Must be called from within
    /// a tokio runtime.
    pub fn observe(&self, fingerprint: Fingerprint) -> bool {
        // task swap stays under the phase lock: the stored task is always the newest epoch's
        let mut state = self.shared.state.lock();
        if state.fingerprint == Some(fingerprint) {
            return false;
        }
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        state.phase = ScrollPhase::Idle;
        state.fingerprint = Some(fingerprint);
        let token = self.shared.token();
        debug!(target = "sync::autoscroll", %fingerprint, epoch = token.epoch, "content changed; restarting scroll");

        let handle = tokio::spawn(run_session(self.shared.clone(), token));
        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
        drop(state);
        true
    }

    /// Cancels the running session and leaves the scroller idle.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        state.phase = ScrollPhase::Idle;
        state.fingerprint = None;
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    pub fn phase(&self) -> ScrollPhase {
        self.shared.state.lock().phase
    }

    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.shared.state.lock().fingerprint
    }

    pub fn token(&self) -> CancelToken {
        self.shared.token()
    }

    /// Observes every model published on `models` until the sender goes away
    /// or this scroller is dropped.
    pub fn follow_view(self: &Arc<Self>, mut models: watch::Receiver<ViewModel>) -> JoinHandle<()> {
        let scroller: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let fingerprint = models.borrow_and_update().fingerprint();
                match scroller.upgrade() {
                    Some(scroller) => {
                        scroller.observe(fingerprint);
                    }
                    None => break,
                }
                if models.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}

impl Drop for AutoScroller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_session(shared: Arc<Shared>, token: CancelToken) {
    let timing = shared.timing;
    tokio::time::sleep(timing.settle).await;

    loop {
        if !token.is_valid() {
            return;
        }
        let Some(extent) = shared.surface.measure() else {
            debug!(target = "sync::autoscroll", epoch = token.epoch, "container not measurable; staying idle");
            return;
        };
        let Some(distance) = timing.distance(extent) else {
            shared.enter(&token, ScrollPhase::Idle, |surface| surface.pin(0.0));
            return;
        };
        let slide = timing.slide_duration(distance);

        if !shared.enter(&token, ScrollPhase::SlideForward, |surface| {
            surface.animate_to(distance, slide)
        }) {
            return;
        }
        tokio::time::sleep(slide).await;

        if !shared.enter(&token, ScrollPhase::PauseEnd, |_| {}) {
            return;
        }
        tokio::time::sleep(timing.pause_end).await;

        if !shared.enter(&token, ScrollPhase::SlideBack, |surface| {
            surface.animate_to(0.0, slide)
        }) {
            return;
        }
        tokio::time::sleep(slide).await;

        if !shared.enter(&token, ScrollPhase::PauseStart, |_| {}) {
            return;
        }
        tokio::time::sleep(timing.pause_start).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[derive(Debug, Clone, PartialEq)]
    enum Command {
        Animate(f64, Duration),
        Pin(f64),
    }

    #[derive(Default)]
    struct RecordingSurface {
        extent: Mutex<Option<Extent>>,
        commands: Mutex<Vec<Command>>,
    }

    impl RecordingSurface {
        fn with_extent(content: f64, container: f64) -> Arc<Self> {
            let surface = Self::default();
            *surface.extent.lock() = Some(Extent { content, container });
            Arc::new(surface)
        }

        fn commands(&self) -> Vec<Command> {
            self.commands.lock().clone()
        }
    }

    impl ScrollSurface for RecordingSurface {
        fn measure(&self) -> Option<Extent> {
            *self.extent.lock()
        }

        fn animate_to(&self, offset: f64, duration: Duration) {
            self.commands.lock().push(Command::Animate(offset, duration));
        }

        fn pin(&self, offset: f64) {
            self.commands.lock().push(Command::Pin(offset));
        }
    }

    fn fp(ids: &[&str]) -> Fingerprint {
        Fingerprint::of_ids(ids.iter().copied())
    }

    #[test]
    fn distance_includes_buffer_and_requires_overflow() {
        let timing = ScrollTiming::default();
        assert_eq!(timing.distance(Extent { content: 300.0, container: 200.0 }), Some(120.0));
        assert_eq!(timing.distance(Extent { content: 200.0, container: 200.0 }), None);
        assert_eq!(timing.distance(Extent { content: f64::NAN, container: 200.0 }), None);
    }

    #[test]
    fn slide_duration_has_a_floor() {
        let timing = ScrollTiming::default();
        assert_eq!(timing.slide_duration(10.0), Duration::from_secs(2));
        assert_eq!(timing.slide_duration(120.0), Duration::from_secs(6));
    }

    #[test]
    fn fingerprint_separates_id_boundaries() {
        assert_ne!(fp(&["ab", "c"]), fp(&["a", "bc"]));
        assert_eq!(fp(&["a"]).to_hex().len(), 64);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_pong_cycle_follows_timing() {
        let surface = RecordingSurface::with_extent(300.0, 200.0);
        let scroller = AutoScroller::new(surface.clone(), ScrollTiming::default());
        assert!(scroller.observe(fp(&["A", "B"])));
        assert_eq!(scroller.phase(), ScrollPhase::Idle);

        sleep(Duration::from_millis(1_400)).await;
        assert!(surface.commands().is_empty());

        // settle 1.5s, slide 6s
        sleep(Duration::from_millis(200)).await;
        assert_eq!(scroller.phase(), ScrollPhase::SlideForward);
        assert_eq!(surface.commands(), vec![Command::Animate(120.0, Duration::from_secs(6))]);

        sleep(Duration::from_millis(6_000)).await;
        assert_eq!(scroller.phase(), ScrollPhase::PauseEnd);

        sleep(Duration::from_millis(2_000)).await;
        assert_eq!(scroller.phase(), ScrollPhase::SlideBack);
        assert_eq!(
            surface.commands().last(),
            Some(&Command::Animate(0.0, Duration::from_secs(6)))
        );

        sleep(Duration::from_millis(6_000)).await;
        assert_eq!(scroller.phase(), ScrollPhase::PauseStart);

        sleep(Duration::from_millis(2_000)).await;
        assert_eq!(scroller.phase(), ScrollPhase::SlideForward);
        assert_eq!(surface.commands().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_fingerprint_keeps_the_session() {
        let surface = RecordingSurface::with_extent(300.0, 200.0);
        let scroller = AutoScroller::new(surface.clone(), ScrollTiming::default());
        scroller.observe(fp(&["A"]));
        sleep(Duration::from_millis(2_000)).await;
        let token = scroller.token();

        assert!(!scroller.observe(fp(&["A"])));
        assert!(token.is_valid());
        assert_eq!(scroller.phase(), ScrollPhase::SlideForward);
        assert_eq!(surface.commands().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn changed_fingerprint_invalidates_and_resettles() {
        let surface = RecordingSurface::with_extent(300.0, 200.0);
        let scroller = AutoScroller::new(surface.clone(), ScrollTiming::default());
        scroller.observe(fp(&["A"]));
        sleep(Duration::from_millis(2_000)).await;
        let token = scroller.token();

        assert!(scroller.observe(fp(&["A", "B"])));
        assert!(!token.is_valid());
        assert_eq!(scroller.phase(), ScrollPhase::Idle);

        sleep(Duration::from_millis(1_400)).await;
        assert_eq!(surface.commands().len(), 1);
        sleep(Duration::from_millis(200)).await;
        assert_eq!(surface.commands().len(), 2);
        assert_eq!(scroller.phase(), ScrollPhase::SlideForward);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_observes_keep_the_newest_session_running() {
        let surface = RecordingSurface::with_extent(300.0, 200.0);
        let timing = ScrollTiming {
            settle: Duration::from_millis(100),
            ..ScrollTiming::default()
        };
        let scroller = Arc::new(AutoScroller::new(surface.clone(), timing));

        let observers: Vec<_> = (0..16)
            .map(|idx| {
                let scroller = scroller.clone();
                tokio::spawn(async move {
                    let id = format!("D-{idx}");
                    scroller.observe(fp(&[id.as_str()]))
                })
            })
            .collect();
        for observer in observers {
            assert!(observer.await.unwrap());
        }
        assert_eq!(scroller.token().epoch(), 16);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(scroller.phase(), ScrollPhase::SlideForward);
        assert!(matches!(
            surface.commands().as_slice(),
            [Command::Animate(_, _)]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn no_overflow_pins_to_top() {
        let surface = RecordingSurface::with_extent(150.0, 200.0);
        let scroller = AutoScroller::new(surface.clone(), ScrollTiming::default());
        scroller.observe(fp(&["A"]));
        sleep(Duration::from_millis(10_000)).await;
        assert_eq!(surface.commands(), vec![Command::Pin(0.0)]);
        assert_eq!(scroller.phase(), ScrollPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn unmeasurable_container_stays_idle() {
        let surface = Arc::new(RecordingSurface::default());
        let scroller = AutoScroller::new(surface.clone(), ScrollTiming::default());
        scroller.observe(fp(&["A"]));
        sleep(Duration::from_millis(10_000)).await;
        assert!(surface.commands().is_empty());
        assert_eq!(scroller.phase(), ScrollPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_silences_the_surface() {
        let surface = RecordingSurface::with_extent(300.0, 200.0);
        let scroller = AutoScroller::new(surface.clone(), ScrollTiming::default());
        scroller.observe(fp(&["A"]));
        sleep(Duration::from_millis(2_000)).await;
        scroller.stop();
        sleep(Duration::from_millis(30_000)).await;
        assert_eq!(surface.commands().len(), 1);
        assert_eq!(scroller.phase(), ScrollPhase::Idle);
        assert_eq!(scroller.fingerprint(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn follow_view_restarts_on_new_models() {
        let surface = RecordingSurface::with_extent(300.0, 200.0);
        let scroller = Arc::new(AutoScroller::new(surface.clone(), ScrollTiming::default()));
        let (tx, rx) = watch::channel(ViewModel::default());
        let follower = scroller.follow_view(rx);

        sleep(Duration::from_millis(100)).await;
        let first = scroller.fingerprint();
        assert!(first.is_some());

        let model = crate::reconcile::reconcile(
            &ViewModel::default(),
            crate::model::Snapshot::new(1, vec![crate::model::Entity::new("A", 0, serde_json::json!({}))]),
            &Default::default(),
        )
        .model;
        tx.send_replace(model);
        sleep(Duration::from_millis(100)).await;
        assert_ne!(scroller.fingerprint(), first);

        drop(tx);
        follower.await.unwrap();
    }
}
