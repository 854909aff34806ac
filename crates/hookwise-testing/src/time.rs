//! Deterministic time control for reproducible tests.
//!
//! `TestClock` advances virtual time instead of sleeping, so back-off and
//! throttle paths run instantly while remaining observable.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use hookwise_core::Clock;

/// Test clock with controllable progression.
#[derive(Clone)]
pub struct TestClock {
    /// Monotonic time in nanoseconds since creation.
    monotonic_ns: Arc<AtomicU64>,
    /// System time as milliseconds since the epoch.
    system_ms: Arc<AtomicU64>,
    /// Base instant for monotonic calculations.
    base_instant: Instant,
    /// Total virtual nanoseconds slept through `Clock::sleep`.
    slept_ns: Arc<AtomicU64>,
}

impl TestClock {
    /// Creates a test clock starting at the current time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a test clock starting at a specific time.
    pub fn with_start_time(start: SystemTime) -> Self {
        let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or_default();

        Self {
            monotonic_ns: Arc::new(AtomicU64::new(0)),
            system_ms: Arc::new(AtomicU64::new(
                u64::try_from(since_epoch.as_millis()).unwrap_or(0),
            )),
            base_instant: Instant::now(),
            slept_ns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advances both clocks by the given duration.
    pub fn advance(&self, duration: Duration) {
        self.monotonic_ns.fetch_add(
            u64::try_from(duration.as_nanos().min(u128::from(u64::MAX))).unwrap_or(0),
            Ordering::AcqRel,
        );
        self.system_ms.fetch_add(
            u64::try_from(duration.as_millis().min(u128::from(u64::MAX))).unwrap_or(0),
            Ordering::AcqRel,
        );
    }

    /// Total virtual time handed to `Clock::sleep`.
    ///
    /// Lets tests assert that a throttle or back-off path actually slept
    /// without waiting in real time.
    pub fn total_slept(&self) -> Duration {
        Duration::from_nanos(self.slept_ns.load(Ordering::Acquire))
    }

    /// Elapsed virtual time since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.monotonic_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        let elapsed_ns = self.monotonic_ns.load(Ordering::Acquire);
        self.base_instant + Duration::from_nanos(elapsed_ns)
    }

    fn now_system(&self) -> SystemTime {
        let ms = self.system_ms.load(Ordering::Acquire);
        UNIX_EPOCH + Duration::from_millis(ms)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        self.slept_ns.fetch_add(
            u64::try_from(duration.as_nanos().min(u128::from(u64::MAX))).unwrap_or(0),
            Ordering::AcqRel,
        );
        // Yield so concurrent tasks make progress.
        Box::pin(tokio::task::yield_now())
    }
}
