//! Circuit breaker for service protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: service assumed down, calls fail fast
//! - Half-Open: a bounded number of probes test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open:      consecutive_failures >= failure_threshold
//! Open → Half-Open:   first admission check at or after last_failure_at + reset_timeout
//! Half-Open → Closed: half_open_quota consecutive successes
//! Half-Open → Open:   any failure
//! ```
//!
//! # Design Decisions
//! - One breaker per service, state behind a single mutex
//! - Open → Half-Open is evaluated lazily on admission, no background timer
//! - Outcomes are recorded once per call sequence, not per attempt
//! - Admission hands out a guard that settles one outcome; dropping it releases the slot
//! - Outcomes from an earlier breaker period (before a trip, half-open entry, close or reset) are ignored

use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

use crate::observability::events::{Event, SharedSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_quota: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_quota: 3,
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub status: BreakerStatus,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    /// Wall-clock time of the last recorded failure, milliseconds since the epoch.
    pub last_failure_at: Option<u64>,
}

#[derive(Debug)]
struct BreakerState {
    status: BreakerStatus,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    last_failure_wall: Option<SystemTime>,
    half_open_successes: u32,
    probes_in_flight: u32,
    /// Bumped on every status change and on reset; admissions from an older period are stale.
    generation: u64,
}

impl BreakerState {
    fn closed(generation: u64) -> Self {
        Self {
            status: BreakerStatus::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            last_failure_wall: None,
            half_open_successes: 0,
            probes_in_flight: 0,
            generation,
        }
    }

    fn note_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(Instant::now());
        self.last_failure_wall = Some(SystemTime::now());
    }

    fn trip(&mut self) {
        self.status = BreakerStatus::Open;
        self.half_open_successes = 0;
        self.probes_in_flight = 0;
        self.generation += 1;
    }

    fn half_open(&mut self) {
        self.status = BreakerStatus::HalfOpen;
        self.half_open_successes = 0;
        self.probes_in_flight = 0;
        self.generation += 1;
    }

    fn close(&mut self) {
        self.status = BreakerStatus::Closed;
        self.consecutive_failures = 0;
        self.half_open_successes = 0;
        self.probes_in_flight = 0;
        self.generation += 1;
    }
}

#[derive(Debug)]
struct Inner {
    config: BreakerConfig,
    state: BreakerState,
}

#[derive(Debug, Clone, Copy)]
enum Settlement {
    Success,
    Failure,
    Release,
}

/// Per-service circuit breaker.
pub struct CircuitBreaker {
    service: String,
    inner: Mutex<Inner>,
    sink: SharedSink,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: BreakerConfig, sink: SharedSink) -> Self {
        Self {
            service: service.into(),
            inner: Mutex::new(Inner {
                config,
                state: BreakerState::closed(0),
            }),
            sink,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether a new call sequence may proceed.
    ///
    /// `None` is a local short-circuit, not a remote failure. The returned
    /// [`Admission`] must be settled with exactly one outcome; dropping it
    /// unsettled gives the slot back as if the sequence were cancelled.
    pub fn admit(&self) -> Option<Admission<'_>> {
        let mut entered_half_open = false;
        let admission = {
            let mut inner = self.lock();
            let quota = inner.config.half_open_quota.max(1);
            let reset_timeout = inner.config.reset_timeout;
            let state = &mut inner.state;

            if state.status == BreakerStatus::Open {
                let cooled_down = state
                    .last_failure_at
                    .map_or(true, |at| Instant::now().saturating_duration_since(at) >= reset_timeout);
                if cooled_down {
                    state.half_open();
                    entered_half_open = true;
                }
            }

            match state.status {
                BreakerStatus::Closed => Some((state.generation, false)),
                BreakerStatus::Open => None,
                BreakerStatus::HalfOpen => {
                    if state.half_open_successes + state.probes_in_flight < quota {
                        state.probes_in_flight += 1;
                        Some((state.generation, true))
                    } else {
                        None
                    }
                }
            }
        };

        if entered_half_open {
            self.sink.emit(&Event::BreakerHalfOpen {
                service: self.service.clone(),
            });
        }
        admission.map(|(generation, half_open)| Admission {
            breaker: self,
            generation,
            half_open,
            settled: false,
        })
    }

    fn settle(&self, generation: u64, half_open: bool, settlement: Settlement) {
        let mut opened = false;
        let mut closed = false;
        {
            let mut inner = self.lock();
            let threshold = inner.config.failure_threshold.max(1);
            let quota = inner.config.half_open_quota.max(1);
            let state = &mut inner.state;
            if state.generation != generation {
                return;
            }

            if half_open {
                state.probes_in_flight = state.probes_in_flight.saturating_sub(1);
            }
            match (state.status, settlement) {
                (_, Settlement::Release) | (BreakerStatus::Open, _) => {}
                (BreakerStatus::Closed, Settlement::Success) => state.consecutive_failures = 0,
                (BreakerStatus::Closed, Settlement::Failure) => {
                    state.note_failure();
                    if state.consecutive_failures >= threshold {
                        state.trip();
                        opened = true;
                    }
                }
                (BreakerStatus::HalfOpen, Settlement::Success) => {
                    state.half_open_successes += 1;
                    if state.half_open_successes >= quota {
                        state.close();
                        closed = true;
                    }
                }
                (BreakerStatus::HalfOpen, Settlement::Failure) => {
                    state.note_failure();
                    state.trip();
                    opened = true;
                }
            }
        }

        if opened {
            self.sink.emit(&Event::BreakerOpened {
                service: self.service.clone(),
            });
        }
        if closed {
            self.sink.emit(&Event::BreakerClosed {
                service: self.service.clone(),
            });
        }
    }

    /// Administrative reset to Closed with cleared counters.
    pub fn reset(&self) {
        let was_closed = {
            let mut inner = self.lock();
            let was_closed = inner.state.status == BreakerStatus::Closed;
            let generation = inner.state.generation + 1;
            inner.state = BreakerState::closed(generation);
            was_closed
        };

        tracing::info!(service = %self.service, "Circuit breaker reset");
        if !was_closed {
            self.sink.emit(&Event::BreakerClosed {
                service: self.service.clone(),
            });
        }
    }

    /// Swap thresholds, keeping the current state.
    pub fn reconfigure(&self, config: BreakerConfig) {
        self.lock().config = config;
    }

    pub fn config(&self) -> BreakerConfig {
        self.lock().config.clone()
    }

    pub fn status(&self) -> BreakerStatus {
        self.lock().state.status
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let state = &inner.state;
        BreakerSnapshot {
            status: state.status,
            consecutive_failures: state.consecutive_failures,
            half_open_successes: if state.status == BreakerStatus::HalfOpen {
                state.half_open_successes
            } else {
                0
            },
            last_failure_at: state.last_failure_wall.and_then(|t| {
                t.duration_since(UNIX_EPOCH)
                    .ok()
                    .and_then(|d| u64::try_from(d.as_millis()).ok())
            }),
        }
    }
}

/// One admitted call sequence.
///
/// Outcomes are counted only while the breaker is still in the period that
/// admitted the sequence. Anything settled after a trip, a half-open entry,
/// a close or a reset is dropped.
#[must_use = "an unsettled admission is released when dropped"]
pub struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    half_open: bool,
    settled: bool,
}

impl Admission<'_> {
    /// Whether this admission holds one of the half-open slots.
    pub fn is_half_open(&self) -> bool {
        self.half_open
    }

    pub fn record_success(mut self) {
        self.finish(Settlement::Success);
    }

    pub fn record_failure(mut self) {
        self.finish(Settlement::Failure);
    }

    /// Give the slot back without recording an outcome (cancelled sequences).
    pub fn release(mut self) {
        self.finish(Settlement::Release);
    }

    fn finish(&mut self, settlement: Settlement) {
        if !self.settled {
            self.settled = true;
            self.breaker.settle(self.generation, self.half_open, settlement);
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        self.finish(Settlement::Release);
    }
}

impl std::fmt::Debug for Admission<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("service", &self.breaker.service)
            .field("generation", &self.generation)
            .field("half_open", &self.half_open)
            .finish()
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("service", &self.service)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::events::MemorySink;
    use std::sync::Arc;

    fn breaker(threshold: u32, quota: u32) -> (CircuitBreaker, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let config = BreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_secs(60),
            half_open_quota: quota,
        };
        (CircuitBreaker::new("geo", config, sink.clone()), sink)
    }

    fn trip(b: &CircuitBreaker, n: u32) {
        for _ in 0..n {
            b.admit().unwrap().record_failure();
        }
    }

    fn succeed(b: &CircuitBreaker) {
        b.admit().unwrap().record_success();
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold() {
        let (b, sink) = breaker(3, 3);
        trip(&b, 2);
        assert_eq!(b.status(), BreakerStatus::Closed);
        trip(&b, 1);

        assert_eq!(b.status(), BreakerStatus::Open);
        assert!(b.admit().is_none());
        assert_eq!(sink.count("breaker.opened"), 1);
        assert!(b.snapshot().last_failure_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failures_while_closed() {
        let (b, _) = breaker(3, 3);
        trip(&b, 2);
        succeed(&b);
        assert_eq!(b.snapshot().consecutive_failures, 0);
        trip(&b, 2);
        assert_eq!(b.status(), BreakerStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_exactly_at_reset_timeout() {
        let (b, sink) = breaker(1, 3);
        trip(&b, 1);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(b.admit().is_none());
        assert_eq!(b.status(), BreakerStatus::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        let trial = b.admit().unwrap();
        assert!(trial.is_half_open());
        assert_eq!(b.status(), BreakerStatus::HalfOpen);
        assert_eq!(sink.count("breaker.halfOpen"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_quota() {
        let (b, sink) = breaker(1, 3);
        trip(&b, 1);
        tokio::time::advance(Duration::from_secs(60)).await;

        for expected in 1..=2 {
            succeed(&b);
            let snap = b.snapshot();
            assert_eq!(snap.status, BreakerStatus::HalfOpen);
            assert_eq!(snap.half_open_successes, expected);
        }

        succeed(&b);
        let snap = b.snapshot();
        assert_eq!(snap.status, BreakerStatus::Closed);
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(sink.count("breaker.closed"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let (b, sink) = breaker(1, 3);
        trip(&b, 1);
        tokio::time::advance(Duration::from_secs(60)).await;

        succeed(&b);
        trip(&b, 1);

        assert_eq!(b.status(), BreakerStatus::Open);
        assert_eq!(b.snapshot().half_open_successes, 0);
        assert!(b.admit().is_none());
        assert_eq!(sink.count("breaker.opened"), 2);

        // the reopen restarted the cool-down window
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(b.admit().is_none());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(b.admit().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_bounds_concurrent_probes() {
        let (b, _) = breaker(1, 2);
        trip(&b, 1);
        tokio::time::advance(Duration::from_secs(60)).await;

        let first = b.admit().unwrap();
        let second = b.admit().unwrap();
        assert!(b.admit().is_none(), "quota of in-flight probes reached");

        first.release();
        let third = b.admit().expect("released slot can be reused");
        assert!(b.admit().is_none());
        drop((second, third));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_admissions_free_their_slots() {
        let (b, _) = breaker(1, 3);
        trip(&b, 1);
        tokio::time::advance(Duration::from_secs(60)).await;

        let abandoned: Vec<_> = (0..3).map(|_| b.admit().unwrap()).collect();
        assert!(b.admit().is_none());
        drop(abandoned);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(b.status(), BreakerStatus::HalfOpen);
        for _ in 0..3 {
            succeed(&b);
        }
        assert_eq!(b.status(), BreakerStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_while_open_are_ignored() {
        let (b, _) = breaker(1, 3);
        let late_failure = b.admit().unwrap();
        let late_success = b.admit().unwrap();
        trip(&b, 1);
        let before = b.snapshot();

        tokio::time::advance(Duration::from_secs(30)).await;
        late_failure.record_failure();
        late_success.record_success();
        assert_eq!(b.snapshot(), before);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(b.admit().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_outcome_is_not_a_half_open_result() {
        let (b, sink) = breaker(1, 2);
        let late = b.admit().unwrap();
        trip(&b, 1);
        tokio::time::advance(Duration::from_secs(60)).await;

        let first = b.admit().unwrap();
        late.record_success();
        let snap = b.snapshot();
        assert_eq!(snap.status, BreakerStatus::HalfOpen);
        assert_eq!(snap.half_open_successes, 0);

        // the late sequence did not free a slot either
        let second = b.admit().unwrap();
        assert!(b.admit().is_none());

        first.record_success();
        second.record_success();
        assert_eq!(b.status(), BreakerStatus::Closed);
        assert_eq!(sink.count("breaker.closed"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_from_before_reset_are_ignored() {
        let (b, _) = breaker(2, 3);
        let late = b.admit().unwrap();
        trip(&b, 1);
        b.reset();

        late.record_failure();
        assert_eq!(b.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_and_reconfigure() {
        let (b, sink) = breaker(1, 3);
        trip(&b, 1);
        b.reset();
        let snap = b.snapshot();
        assert_eq!(snap.status, BreakerStatus::Closed);
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.last_failure_at, None);
        assert_eq!(sink.count("breaker.closed"), 1);

        b.reconfigure(BreakerConfig {
            failure_threshold: 2,
            ..BreakerConfig::default()
        });
        trip(&b, 1);
        assert_eq!(b.status(), BreakerStatus::Closed);
        trip(&b, 1);
        assert_eq!(b.status(), BreakerStatus::Open);
    }

    #[test]
    fn test_concurrent_failures_are_counted_exactly() {
        let (b, _) = breaker(1000, 3);
        let b = Arc::new(b);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let b = b.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    b.admit().unwrap().record_failure();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(b.snapshot().consecutive_failures, 800);
        assert_eq!(b.status(), BreakerStatus::Closed);
    }
}
