//! Batching dispatcher: drains the queue, talks to the collector, applies
//! the HTTP status policy, and schedules retries.
//!
//! Semantics
//! - At most one flush runs at any instant; a re-entrant `flush` returns
//!   immediately.
//! - A batch that reached the network is either removed for good (2xx,
//!   non-retryable 4xx, fatal config) or requeued to the front exactly once.
//! - `sent_at` is stamped when the batch is committed to transmission; a
//!   requeued batch gets a fresh stamp on its next attempt.
//! - A 413 halves the batch size (floor 1) and reschedules immediately; the
//!   size never grows back within a process lifetime.
//! - A reset that races an in-flight request forfeits that batch instead of
//!   requeueing it.
//!
//! Requires a Tokio runtime; the handle is captured at construction so
//! producers on plain threads can still trigger flushes.

use crate::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use crate::event::{now_iso8601, EnrichedEvent};
use crate::queue::{EventQueue, OverflowPolicy};
use crate::transport::{parse_retry_after, HttpTransport, Response};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_ENDPOINT_PATH: &str = "/v1/batch";

const DEFAULT_TIMEOUT_MS: u64 = 8_000;
const DEFAULT_AUTO_FLUSH_THRESHOLD: usize = 20;
const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Floor for rescheduling after a retryable failure.
const MIN_RETRY_DELAY_MS: u64 = 100;
/// Floor for rescheduling after a 429.
const THROTTLE_RETRY_FLOOR_MS: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub endpoint_path: String,
    pub timeout_ms: u64,
    /// `offer` triggers a flush once the queue reaches this length.
    pub auto_flush_threshold: usize,
    pub initial_max_batch_size: usize,
    /// Gates the verbose per-batch logs.
    pub debug: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            endpoint_path: DEFAULT_ENDPOINT_PATH.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            auto_flush_threshold: DEFAULT_AUTO_FLUSH_THRESHOLD,
            initial_max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            debug: false,
        }
    }
}

/// Snapshot of dispatcher internals for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    pub queue_length: usize,
    pub flush_in_flight: bool,
    pub breaker_state: BreakerState,
    pub breaker_remaining_cooldown_ms: u64,
    pub max_batch_size: usize,
}

pub type FatalConfigHandler = Box<dyn Fn(u16) + Send + Sync>;

#[derive(Serialize)]
struct BatchEnvelope<'a> {
    batch: &'a [EnrichedEvent],
}

enum FlushStep {
    Continue,
    Retry(u64),
    Stop,
}

pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    config: DispatcherConfig,
    queue: EventQueue,
    breaker: CircuitBreaker,
    transport: Arc<dyn HttpTransport>,
    runtime: tokio::runtime::Handle,
    max_batch_size: AtomicUsize,
    flush_in_flight: AtomicBool,
    /// Bumped by reset; an in-flight request from an older epoch drops its
    /// batch on completion.
    epoch: AtomicU64,
    retry_task: Mutex<Option<JoinHandle<()>>>,
    flush_timer: Mutex<Option<JoinHandle<()>>>,
    fatal_handler: Mutex<Option<FatalConfigHandler>>,
}

impl Dispatcher {
    /// Must be called from within a Tokio runtime.
    pub fn new(
        ingestion_host: &str,
        config: DispatcherConfig,
        breaker_config: BreakerConfig,
        queue_capacity: usize,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let url = format!("{}{}", ingestion_host, config.endpoint_path);
        let initial_max_batch_size = config.initial_max_batch_size.max(1);
        Self {
            inner: Arc::new(Inner {
                url,
                config,
                queue: EventQueue::new(queue_capacity, OverflowPolicy::DropOldest),
                breaker: CircuitBreaker::new(breaker_config),
                transport,
                runtime: tokio::runtime::Handle::current(),
                max_batch_size: AtomicUsize::new(initial_max_batch_size),
                flush_in_flight: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                retry_task: Mutex::new(None),
                flush_timer: Mutex::new(None),
                fatal_handler: Mutex::new(None),
            }),
        }
    }

    /// Enqueue an event, flushing once the auto-flush threshold is reached.
    pub fn offer(&self, event: EnrichedEvent) {
        self.inner.queue.enqueue(event);
        if self.inner.queue.len() >= self.inner.config.auto_flush_threshold {
            Inner::try_flush(&self.inner);
        }
    }

    /// Kick off a flush unless one is already in progress.
    pub fn flush(&self) {
        Inner::try_flush(&self.inner);
    }

    /// Periodic flushing at `interval_seconds` (clamped to ≥ 1), replacing
    /// any prior timer.
    pub fn start_flush_loop(&self, interval_seconds: u64) {
        let interval_seconds = interval_seconds.max(1);
        let inner = Arc::clone(&self.inner);
        let task = self.inner.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
            ticker.tick().await; // swallow the immediate first tick
            loop {
                ticker.tick().await;
                Inner::try_flush(&inner);
            }
        });
        if let Some(prior) = lock(&self.inner.flush_timer).replace(task) {
            prior.abort();
        }
    }

    pub fn stop_flush_loop(&self) {
        if let Some(task) = lock(&self.inner.flush_timer).take() {
            task.abort();
        }
    }

    pub fn cancel_scheduled_retry(&self) {
        if let Some(task) = lock(&self.inner.retry_task).take() {
            task.abort();
        }
    }

    /// Empty the queue.
    pub fn clear_all(&self) {
        self.inner.queue.clear();
    }

    /// Register the callback invoked once on the first 401/403/404.
    pub fn set_fatal_config_handler(&self, handler: impl Fn(u16) + Send + Sync + 'static) {
        *lock(&self.inner.fatal_handler) = Some(Box::new(handler));
    }

    /// Teardown: forfeit any in-flight batch, stop timers, empty the queue.
    pub fn reset(&self) {
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        self.stop_flush_loop();
        self.cancel_scheduled_retry();
        self.inner.queue.clear();
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn debug_info(&self) -> DebugInfo {
        DebugInfo {
            queue_length: self.inner.queue.len(),
            flush_in_flight: self.inner.flush_in_flight.load(Ordering::Acquire),
            breaker_state: self.inner.breaker.state(),
            breaker_remaining_cooldown_ms: self.inner.breaker.remaining_cooldown_ms(),
            max_batch_size: self.inner.max_batch_size.load(Ordering::Acquire),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop_flush_loop();
        self.cancel_scheduled_retry();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    fn try_flush(self: &Arc<Self>) {
        if self
            .flush_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            let retry_ms = inner.process_until_empty().await;
            inner.flush_in_flight.store(false, Ordering::Release);
            if let Some(delay_ms) = retry_ms {
                inner.schedule_retry(delay_ms);
            }
        });
    }

    /// The batch loop. Returns the delay for a scheduled retry when the loop
    /// has to back off, `None` when the queue is drained (or forfeited).
    async fn process_until_empty(self: &Arc<Self>) -> Option<u64> {
        loop {
            if self.queue.is_empty() {
                return None;
            }

            let wait_ms = self.breaker.before_request();
            if wait_ms > 0 {
                return Some(wait_ms);
            }

            let mut batch = self.queue.drain(self.max_batch_size.load(Ordering::Acquire));
            if batch.is_empty() {
                return None;
            }

            let sent_at = now_iso8601();
            for event in &mut batch {
                event.sent_at = Some(sent_at.clone());
            }

            let body = match serde_json::to_vec(&BatchEnvelope { batch: &batch }) {
                Ok(body) => body,
                Err(err) => {
                    tracing::error!(error = %err, dropped = batch.len(), "batch serialisation failed, dropping");
                    continue;
                }
            };

            if self.config.debug {
                tracing::debug!(events = batch.len(), url = %self.url, "posting batch");
            }

            let epoch = self.epoch.load(Ordering::Acquire);
            let outcome = self
                .transport
                .post_json(&self.url, body.into(), Duration::from_millis(self.config.timeout_ms))
                .await;

            if self.epoch.load(Ordering::Acquire) != epoch {
                // reset raced this request; the in-flight chunk is forfeit
                return None;
            }

            match outcome {
                Err(err) => {
                    tracing::warn!(error = %err, events = batch.len(), "transport failure, requeueing batch");
                    self.breaker.on_failure();
                    self.queue.requeue_front(batch);
                    return Some(self.breaker.before_request().max(MIN_RETRY_DELAY_MS));
                }
                Ok(response) => match self.handle_response(response, batch) {
                    FlushStep::Continue => continue,
                    FlushStep::Retry(delay_ms) => return Some(delay_ms),
                    FlushStep::Stop => return None,
                },
            }
        }
    }

    fn handle_response(&self, response: Response, batch: Vec<EnrichedEvent>) -> FlushStep {
        let status = response.status;
        match status {
            200..=299 => {
                self.breaker.on_success();
                if self.config.debug {
                    tracing::debug!(status, delivered = batch.len(), "batch accepted");
                }
                FlushStep::Continue
            }
            408 | 500..=599 => {
                self.breaker.on_failure();
                self.queue.requeue_front(batch);
                let delay = parse_retry_after(&response)
                    .unwrap_or_else(|| self.breaker.before_request());
                FlushStep::Retry(delay.max(MIN_RETRY_DELAY_MS))
            }
            429 => {
                self.breaker.on_failure();
                self.queue.requeue_front(batch);
                let server = parse_retry_after(&response).unwrap_or(0);
                let delay = server.max(self.breaker.before_request()).max(THROTTLE_RETRY_FLOOR_MS);
                FlushStep::Retry(delay)
            }
            413 => {
                self.breaker.on_non_retryable();
                let current = self.max_batch_size.load(Ordering::Acquire);
                if current > 1 {
                    let halved = (current / 2).max(1);
                    self.max_batch_size.store(halved, Ordering::Release);
                    tracing::warn!(from = current, to = halved, "payload too large, shrinking batch size");
                    self.queue.requeue_front(batch);
                    FlushStep::Retry(0)
                } else {
                    let message_ids: Vec<&str> =
                        batch.iter().map(|event| event.message_id.as_str()).collect();
                    tracing::warn!(?message_ids, "payload too large at batch size 1, dropping event");
                    FlushStep::Continue
                }
            }
            401 | 403 | 404 => {
                self.queue.clear();
                tracing::error!(status, "fatal configuration response, disabling delivery");
                // take() enforces invoke-once
                if let Some(handler) = lock(&self.fatal_handler).take() {
                    handler(status);
                }
                FlushStep::Stop
            }
            400..=499 => {
                self.breaker.on_non_retryable();
                tracing::warn!(status, dropped = batch.len(), "collector rejected batch, dropping");
                FlushStep::Continue
            }
            _ => {
                self.breaker.on_non_retryable();
                tracing::warn!(status, dropped = batch.len(), "unexpected status, dropping batch");
                FlushStep::Continue
            }
        }
    }

    /// One-shot retry timer; scheduling replaces any prior scheduled retry.
    /// A zero delay still goes through the scheduler.
    fn schedule_retry(self: &Arc<Self>, delay_ms: u64) {
        let inner = Arc::clone(self);
        let task = self.runtime.spawn(async move {
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            Inner::try_flush(&inner);
        });
        if let Some(prior) = lock(&self.retry_task).replace(task) {
            prior.abort();
        }
    }
}
