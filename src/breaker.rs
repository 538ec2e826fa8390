//! Circuit breaker guarding the collector endpoint.
//!
//! Counts consecutive delivery failures and short-circuits network attempts
//! during sustained outage. Unlike an execute-wrapper breaker, this one is
//! driven from the outside: the dispatcher reports outcomes via
//! [`CircuitBreaker::on_success`] / [`CircuitBreaker::on_failure`] /
//! [`CircuitBreaker::on_non_retryable`] and asks
//! [`CircuitBreaker::before_request`] how long to wait before the next
//! attempt.
//!
//! Invariants:
//! - `Closed` never imposes a wait.
//! - While `Open`, `before_request` returns the remaining cooldown until
//!   `open_until`, then admits exactly one transition to `HalfOpen`.
//! - In `HalfOpen`, at most `half_open_max_concurrent` probes are
//!   outstanding; saturated callers get a fixed 200 ms advisory wait.
//! - Every trip doubles the cooldown (capped at `max_cooldown_ms`) and
//!   applies symmetric jitter.
//!
//! All methods take an internal mutex and never perform I/O under it.

use rand::Rng;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Clock abstraction so cooldown timing can be faked in tests.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_millis(&self) -> u64;
}

/// Monotonic clock backed by `Instant::now()`.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Advisory wait handed to callers while a half-open probe is outstanding.
/// Deliberately not derived from the backoff schedule.
const HALF_OPEN_SATURATED_WAIT_MS: u64 = 200;

/// Breaker tuning. Immutable after construction; out-of-range values are
/// clamped rather than rejected.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker open.
    pub failure_threshold: u32,
    /// Cooldown after the first trip.
    pub base_cooldown_ms: u64,
    /// Cooldown ceiling across repeated trips.
    pub max_cooldown_ms: u64,
    /// Symmetric jitter applied to each cooldown, as a fraction of it.
    pub jitter_ratio: f64,
    /// Probes allowed in flight while half-open.
    pub half_open_max_concurrent: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            base_cooldown_ms: 10_000,
            max_cooldown_ms: 120_000,
            jitter_ratio: 0.2,
            half_open_max_concurrent: 1,
        }
    }
}

impl BreakerConfig {
    fn normalized(mut self) -> Self {
        self.failure_threshold = self.failure_threshold.max(1);
        self.max_cooldown_ms = self.max_cooldown_ms.max(self.base_cooldown_ms);
        self.jitter_ratio = self.jitter_ratio.max(0.0);
        self.half_open_max_concurrent = self.half_open_max_concurrent.max(1);
        self
    }
}

/// Externally observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    open_count: u32,
    open_until_ms: u64,
    half_open_in_flight: u32,
}

/// Mutex-protected failure-counting breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                open_count: 0,
                open_until_ms: 0,
                half_open_in_flight: 0,
            }),
            config: config.normalized(),
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a delivered batch. Returns the breaker to `Closed` from any
    /// state and resets the failure count.
    pub fn on_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        if inner.state != BreakerState::Closed {
            inner.state = BreakerState::Closed;
            inner.half_open_in_flight = 0;
            tracing::debug!("breaker closed after successful delivery");
        }
    }

    /// Record a retryable failure (transport error, 408/5xx/429).
    pub fn on_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        match inner.state {
            BreakerState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                self.trip_open(&mut inner);
            }
            // A failed probe reopens immediately with a longer cooldown.
            BreakerState::HalfOpen => self.trip_open(&mut inner),
            _ => {}
        }
    }

    /// Record a non-retryable response (4xx drop). Must not strengthen a
    /// closed breaker or open it; a completed probe is no longer in flight.
    pub fn on_non_retryable(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        if inner.state == BreakerState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Milliseconds to wait before the next attempt. Zero means the caller
    /// may send now; in `HalfOpen` a zero return also reserves a probe slot.
    pub fn before_request(&self) -> u64 {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => 0,
            BreakerState::Open => {
                let now = self.clock.now_millis();
                if now >= inner.open_until_ms {
                    inner.state = BreakerState::HalfOpen;
                    // The transitioning caller takes the first probe slot.
                    inner.half_open_in_flight = 1;
                    tracing::debug!("breaker half-open, admitting probe");
                    0
                } else {
                    inner.open_until_ms - now
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_in_flight >= self.config.half_open_max_concurrent {
                    HALF_OPEN_SATURATED_WAIT_MS
                } else {
                    inner.half_open_in_flight += 1;
                    0
                }
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Remaining cooldown while `Open`, else zero.
    pub fn remaining_cooldown_ms(&self) -> u64 {
        let inner = self.lock();
        match inner.state {
            BreakerState::Open => inner.open_until_ms.saturating_sub(self.clock.now_millis()),
            _ => 0,
        }
    }

    fn trip_open(&self, inner: &mut BreakerInner) {
        inner.open_count += 1;
        let exponent = inner.open_count.saturating_sub(1).min(32);
        let delay = self
            .config
            .base_cooldown_ms
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.config.max_cooldown_ms);
        let delay = self.apply_jitter(delay);
        inner.open_until_ms = self.clock.now_millis().saturating_add(delay);
        inner.state = BreakerState::Open;
        inner.consecutive_failures = 0;
        inner.half_open_in_flight = 0;
        tracing::warn!(open_count = inner.open_count, cooldown_ms = delay, "breaker open");
    }

    fn apply_jitter(&self, delay: u64) -> u64 {
        if self.config.jitter_ratio <= 0.0 || delay == 0 {
            return delay;
        }
        let span = delay as f64 * self.config.jitter_ratio;
        let offset = rand::rng().random_range(-span..=span);
        (delay as f64 + offset).max(0.0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug, Clone)]
    struct ManualClock {
        now: Arc<AtomicU64>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self { now: Arc::new(AtomicU64::new(0)) }
        }

        fn advance(&self, millis: u64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    fn breaker(threshold: u32, base_ms: u64) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: threshold,
            base_cooldown_ms: base_ms,
            max_cooldown_ms: base_ms * 16,
            jitter_ratio: 0.0,
            half_open_max_concurrent: 1,
        })
        .with_clock(clock.clone());
        (breaker, clock)
    }

    #[test]
    fn starts_closed_with_no_wait() {
        let (breaker, _) = breaker(3, 100);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.before_request(), 0);
        assert_eq!(breaker.remaining_cooldown_ms(), 0);
    }

    #[test]
    fn opens_at_threshold_and_waits_out_the_cooldown() {
        let (breaker, clock) = breaker(3, 100);
        breaker.on_failure();
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.before_request(), 100);
        assert_eq!(breaker.remaining_cooldown_ms(), 100);

        clock.advance(40);
        assert_eq!(breaker.before_request(), 60);

        clock.advance(60);
        assert_eq!(breaker.before_request(), 0);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_admits_one_probe_and_advises_the_rest() {
        let (breaker, clock) = breaker(1, 100);
        breaker.on_failure();
        clock.advance(100);
        assert_eq!(breaker.before_request(), 0); // transition takes the slot
        assert_eq!(breaker.before_request(), 200);
        assert_eq!(breaker.before_request(), 200);
    }

    #[test]
    fn success_closes_from_any_state() {
        let (breaker, clock) = breaker(1, 100);
        breaker.on_failure();
        clock.advance(100);
        assert_eq!(breaker.before_request(), 0);
        breaker.on_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.before_request(), 0);
    }

    #[test]
    fn failed_probe_reopens_with_doubled_cooldown() {
        let (breaker, clock) = breaker(1, 100);
        breaker.on_failure();
        assert_eq!(breaker.remaining_cooldown_ms(), 100);
        clock.advance(100);
        assert_eq!(breaker.before_request(), 0);
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.remaining_cooldown_ms(), 200);
        clock.advance(200);
        assert_eq!(breaker.before_request(), 0);
        breaker.on_failure();
        assert_eq!(breaker.remaining_cooldown_ms(), 400);
    }

    #[test]
    fn cooldown_is_capped_at_max() {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            base_cooldown_ms: 100,
            max_cooldown_ms: 250,
            jitter_ratio: 0.0,
            half_open_max_concurrent: 1,
        })
        .with_clock(clock.clone());
        for _ in 0..4 {
            breaker.on_failure();
            let remaining = breaker.remaining_cooldown_ms();
            assert!(remaining <= 250, "cooldown {remaining} exceeded cap");
            clock.advance(remaining);
            assert_eq!(breaker.before_request(), 0);
        }
    }

    #[test]
    fn success_resets_the_failure_count() {
        let (breaker, _) = breaker(3, 100);
        breaker.on_failure();
        breaker.on_failure();
        breaker.on_success();
        breaker.on_failure();
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn non_retryable_resets_count_without_touching_state() {
        let (breaker, _) = breaker(3, 100);
        breaker.on_failure();
        breaker.on_failure();
        breaker.on_non_retryable();
        breaker.on_failure();
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn non_retryable_releases_a_half_open_probe() {
        let (breaker, clock) = breaker(1, 100);
        breaker.on_failure();
        clock.advance(100);
        assert_eq!(breaker.before_request(), 0);
        breaker.on_non_retryable();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert_eq!(breaker.before_request(), 0); // slot is free again
    }

    #[test]
    fn jitter_stays_within_the_configured_ratio() {
        let clock = ManualClock::new();
        for _ in 0..50 {
            let breaker = CircuitBreaker::new(BreakerConfig {
                failure_threshold: 1,
                base_cooldown_ms: 1_000,
                max_cooldown_ms: 10_000,
                jitter_ratio: 0.2,
                half_open_max_concurrent: 1,
            })
            .with_clock(clock.clone());
            breaker.on_failure();
            let remaining = breaker.remaining_cooldown_ms();
            assert!((800..=1_200).contains(&remaining), "jittered cooldown {remaining} out of range");
        }
    }

    #[test]
    fn config_is_clamped() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 0,
            base_cooldown_ms: 500,
            max_cooldown_ms: 100,
            jitter_ratio: -1.0,
            half_open_max_concurrent: 0,
        });
        breaker.on_failure();
        // threshold clamped to 1: a single failure trips the breaker
        assert_eq!(breaker.state(), BreakerState::Open);
        // max clamped up to base
        assert!(breaker.remaining_cooldown_ms() <= 500);
    }
}
