//! Circuit breaker state machine.
//!
//! # States
//! ```text
//! Closed → Open:      failure with (samples >= min_sample_size && error_rate >= threshold)
//!                     or consecutive failures >= consecutive_failure_threshold
//! Open → HalfOpen:    admission check after half_open_interval * (half_open_failures + 1)
//! HalfOpen → Open:    failure; half_open_failures += 1, trip time kept
//! HalfOpen → Closed:  success; everything zeroed
//! ```
//!
//! Outcome reports run under one mutex per breaker. Admission checks read the
//! flags lock-free and only take the mutex to confirm the half-open flip.

use crate::bucket::Bucket;
use crate::clock::{duration_to_nanos, Clock, MonotonicClock};
use anyhow::{ensure, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Probability of admitting a call while half-open.
const HALF_OPEN_ADMIT_PROBABILITY: f64 = 0.5;

#[derive(Clone, Debug, PartialEq)]
pub struct BreakerOptions {
    /// Trip when the window error rate reaches this value (0.0..=1.0).
    pub error_rate_threshold: f64,
    /// Samples needed before the error rate is trusted; also the size at
    /// which a healthy window is recycled.
    pub min_sample_size: u64,
    pub consecutive_failure_threshold: u64,
    /// Base wait between trip and the first half-open probe window.
    pub half_open_interval: Duration,
    /// Bucket idle time after which counts are discarded.
    pub bucket_timeout: Duration,
}

impl Default for BreakerOptions {
    fn default() -> Self {
        Self {
            error_rate_threshold: 0.1,
            min_sample_size: 100,
            consecutive_failure_threshold: 5,
            half_open_interval: Duration::from_secs(5),
            bucket_timeout: Duration::from_secs(60),
        }
    }
}

impl BreakerOptions {
    pub fn new() -> Self { Self::default() }

    pub fn with_error_rate_threshold(mut self, rate: f64) -> Self {
        self.error_rate_threshold = rate;
        self
    }

    pub fn with_min_sample_size(mut self, samples: u64) -> Self {
        self.min_sample_size = samples;
        self
    }

    pub fn with_consecutive_failure_threshold(mut self, failures: u64) -> Self {
        self.consecutive_failure_threshold = failures;
        self
    }

    pub fn with_half_open_interval(mut self, interval: Duration) -> Self {
        self.half_open_interval = interval;
        self
    }

    pub fn with_bucket_timeout(mut self, timeout: Duration) -> Self {
        self.bucket_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            (0.0..=1.0).contains(&self.error_rate_threshold),
            "error_rate_threshold must be within [0, 1], got {}",
            self.error_rate_threshold
        );
        ensure!(self.min_sample_size > 0, "min_sample_size must be positive");
        ensure!(
            self.consecutive_failure_threshold > 0,
            "consecutive_failure_threshold must be positive"
        );
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view for status pages and dashboards.
#[derive(Clone, Debug, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub successes: u64,
    pub failures: u64,
    pub error_rate: f64,
    pub consecutive_failures: u64,
    pub half_open_failures: u64,
    /// Current trip-to-probe wait, `half_open_interval * (half_open_failures + 1)`.
    pub backoff_ms: u64,
    /// Time left before probing starts, only while open.
    pub probe_in_ms: Option<u64>,
}

pub struct Breaker {
    options: BreakerOptions,
    bucket: Bucket,
    tripped: AtomicBool,
    half_open: AtomicBool,
    tripped_at: AtomicU64, // clock nanos
    half_open_failures: AtomicU64,
    consecutive_failures: AtomicU64,
    report_lock: Mutex<()>,
    rng: Mutex<Box<dyn RngCore + Send>>,
    clock: Arc<dyn Clock>,
}

impl Breaker {
    pub fn new(options: BreakerOptions) -> Self {
        Self::with_parts(options, Arc::new(MonotonicClock::new()), StdRng::from_entropy())
    }

    /// Breaker with error rate 0.1, 100 samples, 5 consecutive failures,
    /// 5s half-open interval and a 60s bucket timeout.
    pub fn with_defaults() -> Self {
        Self::new(BreakerOptions::default())
    }

    /// Injects the time source and the half-open coin.
    pub fn with_parts<R>(options: BreakerOptions, clock: Arc<dyn Clock>, rng: R) -> Self
    where
        R: RngCore + Send + 'static,
    {
        debug_assert!(options.validate().is_ok(), "invalid breaker options: {options:?}");
        let bucket = Bucket::with_clock(options.bucket_timeout, clock.clone());
        Self {
            options,
            bucket,
            tripped: AtomicBool::new(false),
            half_open: AtomicBool::new(false),
            tripped_at: AtomicU64::new(0),
            half_open_failures: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            report_lock: Mutex::new(()),
            rng: Mutex::new(Box::new(rng)),
            clock,
        }
    }

    /// Admission check; call once per guarded operation.
    ///
    /// May move an open breaker to half-open. While half-open each call is
    /// admitted with probability 1/2.
    pub fn allow(&self) -> bool {
        self.maybe_half_open();
        if self.is_half_open() {
            return self.rng.lock().gen_bool(HALF_OPEN_ADMIT_PROBABILITY);
        }
        !self.is_tripped()
    }

    /// Reports the result of one guarded operation.
    pub fn report_outcome(&self, success: bool) {
        let _guard = self.report_lock.lock();
        if success {
            self.on_success_locked();
        } else {
            self.on_failure_locked();
        }
    }

    pub fn record_success(&self) { self.report_outcome(true) }
    pub fn record_failure(&self) { self.report_outcome(false) }

    /// Forces the breaker closed and zeroes every counter.
    pub fn reset(&self) {
        let _guard = self.report_lock.lock();
        self.reset_locked();
        info!("circuit breaker reset");
    }

    /// Forces the breaker open, restarting the backoff clock.
    pub fn trip(&self) {
        let _guard = self.report_lock.lock();
        self.trip_locked();
    }

    pub fn state(&self) -> BreakerState {
        if !self.tripped.load(Ordering::Acquire) {
            BreakerState::Closed
        } else if self.half_open.load(Ordering::Acquire) {
            BreakerState::HalfOpen
        } else {
            BreakerState::Open
        }
    }

    pub fn is_tripped(&self) -> bool { self.tripped.load(Ordering::Acquire) }
    pub fn is_half_open(&self) -> bool { self.half_open.load(Ordering::Acquire) }
    pub fn consecutive_failures(&self) -> u64 { self.consecutive_failures.load(Ordering::Acquire) }
    pub fn half_open_failures(&self) -> u64 { self.half_open_failures.load(Ordering::Acquire) }
    pub fn error_rate(&self) -> f64 { self.bucket.error_rate() }
    pub fn success_count(&self) -> u64 { self.bucket.successes() }
    pub fn failure_count(&self) -> u64 { self.bucket.failures() }
    pub fn options(&self) -> &BreakerOptions { &self.options }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state();
        let backoff = self.backoff_nanos();
        let probe_in_ms = (state == BreakerState::Open).then(|| {
            let elapsed = self.now_nanos().saturating_sub(self.tripped_at.load(Ordering::Acquire));
            Duration::from_nanos(backoff.saturating_sub(elapsed)).as_millis() as u64
        });
        BreakerSnapshot {
            state,
            successes: self.success_count(),
            failures: self.failure_count(),
            error_rate: self.error_rate(),
            consecutive_failures: self.consecutive_failures(),
            half_open_failures: self.half_open_failures(),
            backoff_ms: Duration::from_nanos(backoff).as_millis() as u64,
            probe_in_ms,
        }
    }

    fn on_failure_locked(&self) {
        self.bucket.record_failure();
        let consecutive = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        match self.state() {
            BreakerState::Closed => {
                if self.should_trip(consecutive) {
                    self.trip_locked();
                }
            }
            BreakerState::HalfOpen => {
                let fails = self.half_open_failures.fetch_add(1, Ordering::AcqRel) + 1;
                self.half_open.store(false, Ordering::Release);
                info!(
                    half_open_failures = fails,
                    next_wait_ms = Duration::from_nanos(self.backoff_nanos()).as_millis() as u64,
                    "half-open probe failed, circuit breaker open again"
                );
            }
            BreakerState::Open => {}
        }
    }

    fn on_success_locked(&self) {
        match self.state() {
            BreakerState::HalfOpen => {
                self.reset_locked();
                info!("half-open probe succeeded, circuit breaker closed");
                return;
            }
            BreakerState::Closed => {
                let total = self.bucket.total();
                if total >= self.options.min_sample_size {
                    self.reset_locked();
                    debug!(samples = total, "sample window full, counters recycled");
                }
            }
            BreakerState::Open => {}
        }
        self.consecutive_failures.store(0, Ordering::Release);
        self.bucket.record_success();
    }

    fn should_trip(&self, consecutive: u64) -> bool {
        let total = self.bucket.total();
        if total >= self.options.min_sample_size
            && self.bucket.error_rate() >= self.options.error_rate_threshold
        {
            return true;
        }
        consecutive >= self.options.consecutive_failure_threshold
    }

    fn trip_locked(&self) {
        self.tripped_at.store(self.now_nanos(), Ordering::Release);
        self.half_open.store(false, Ordering::Release);
        self.tripped.store(true, Ordering::Release);
        warn!(
            successes = self.bucket.successes(),
            failures = self.bucket.failures(),
            error_rate = self.bucket.error_rate(),
            consecutive_failures = self.consecutive_failures(),
            "circuit breaker tripped"
        );
    }

    fn reset_locked(&self) {
        // half_open first: readers must never see it set on a closed breaker
        self.half_open.store(false, Ordering::Release);
        self.tripped.store(false, Ordering::Release);
        self.half_open_failures.store(0, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.bucket.reset();
    }

    fn maybe_half_open(&self) {
        if !self.is_tripped() || self.is_half_open() || !self.backoff_elapsed() {
            return;
        }
        let _guard = self.report_lock.lock();
        if self.is_tripped() && !self.is_half_open() && self.backoff_elapsed() {
            self.half_open.store(true, Ordering::Release);
            info!(half_open_failures = self.half_open_failures(), "circuit breaker half-open");
        }
    }

    fn backoff_elapsed(&self) -> bool {
        let since_trip = self.now_nanos().saturating_sub(self.tripped_at.load(Ordering::Acquire));
        since_trip > self.backoff_nanos()
    }

    fn backoff_nanos(&self) -> u64 {
        let alpha = self.half_open_failures().saturating_add(1);
        duration_to_nanos(self.options.half_open_interval).saturating_mul(alpha)
    }

    fn now_nanos(&self) -> u64 { duration_to_nanos(self.clock.now()) }
}

impl Default for Breaker {
    fn default() -> Self { Self::with_defaults() }
}

impl fmt::Debug for Breaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breaker")
            .field("state", &self.state())
            .field("bucket", &self.bucket)
            .field("consecutive_failures", &self.consecutive_failures())
            .field("half_open_failures", &self.half_open_failures())
            .field("options", &self.options)
            .finish()
    }
}
