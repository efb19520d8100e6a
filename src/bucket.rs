use crate::clock::{duration_to_nanos, Clock, MonotonicClock};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Success/failure counters over an inactivity window.
///
/// Every recorded event first checks how long the bucket has been idle; past
/// `timeout` the counts are dropped and the event opens a fresh window.
///
/// Writers serialize on `last_access` so a window reset can never swallow a
/// concurrent increment; reads stay lock-free.
pub struct Bucket {
    success: AtomicU64,
    failure: AtomicU64,
    last_access: Mutex<u64>, // clock nanos
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl Bucket {
    pub fn new(timeout: Duration) -> Self {
        Self::with_clock(timeout, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        let now = duration_to_nanos(clock.now());
        Self {
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            last_access: Mutex::new(now),
            timeout,
            clock,
        }
    }

    pub fn record_success(&self) {
        self.record(&self.success);
    }

    pub fn record_failure(&self) {
        self.record(&self.failure);
    }

    /// `failures / total`, 0.0 when empty. Reads never expire the window.
    pub fn error_rate(&self) -> f64 {
        let failure = self.failures();
        let total = failure + self.successes();
        if total == 0 { return 0.0; }
        failure as f64 / total as f64
    }

    /// Zeroes both counters; the idle clock is left alone.
    pub fn reset(&self) {
        let _window = self.last_access.lock();
        self.zero();
    }

    pub fn successes(&self) -> u64 { self.success.load(Ordering::Acquire) }
    pub fn failures(&self) -> u64 { self.failure.load(Ordering::Acquire) }
    pub fn total(&self) -> u64 { self.successes() + self.failures() }
    pub fn timeout(&self) -> Duration { self.timeout }

    fn record(&self, counter: &AtomicU64) {
        let now = duration_to_nanos(self.clock.now());
        let mut last = self.last_access.lock();
        if now.saturating_sub(*last) > duration_to_nanos(self.timeout) {
            self.zero();
        }
        *last = now;
        counter.fetch_add(1, Ordering::AcqRel);
    }

    fn zero(&self) {
        self.failure.store(0, Ordering::Release);
        self.success.store(0, Ordering::Release);
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("success", &self.successes())
            .field("failure", &self.failures())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn manual(timeout: Duration) -> (Arc<ManualClock>, Bucket) {
        let clock = Arc::new(ManualClock::new());
        let bucket = Bucket::with_clock(timeout, clock.clone());
        (clock, bucket)
    }

    #[test]
    fn counts_and_error_rate() {
        let b = Bucket::new(Duration::from_secs(60));
        b.record_failure();
        b.record_success();
        b.record_failure();
        b.record_failure();
        b.record_success();

        assert_eq!(b.failures(), 3);
        assert_eq!(b.successes(), 2);
        assert_eq!(b.error_rate(), 0.6);

        b.reset();
        assert_eq!(b.failures(), 0);
        assert_eq!(b.successes(), 0);
    }

    #[test]
    fn empty_bucket_has_zero_error_rate() {
        let b = Bucket::new(Duration::from_secs(60));
        assert_eq!(b.error_rate(), 0.0);
        assert_eq!(b.total(), 0);
    }

    #[test]
    fn idle_past_timeout_starts_fresh_window() {
        let (clock, b) = manual(Duration::from_secs(60));
        b.record_failure();
        b.record_failure();
        b.record_success();

        clock.advance(Duration::from_secs(61));
        b.record_success();

        assert_eq!(b.failures(), 0);
        assert_eq!(b.successes(), 1);
        assert_eq!(b.error_rate(), 0.0);
    }

    #[test]
    fn activity_within_timeout_keeps_window() {
        let (clock, b) = manual(Duration::from_secs(60));
        for _ in 0..5 {
            b.record_failure();
            clock.advance(Duration::from_secs(59));
        }
        // exactly at the timeout is not stale
        clock.advance(Duration::from_secs(1));
        b.record_success();
        assert_eq!(b.failures(), 5);
        assert_eq!(b.successes(), 1);
    }

    #[test]
    fn concurrent_records_survive_window_reset() {
        use std::sync::Barrier;
        use std::thread;

        for _ in 0..50 {
            let clock = Arc::new(ManualClock::new());
            let b = Arc::new(Bucket::with_clock(Duration::from_secs(1), clock.clone()));
            for _ in 0..5 {
                b.record_failure();
            }
            // every thread below starts from a stale window
            clock.advance(Duration::from_secs(2));

            let barrier = Arc::new(Barrier::new(8));
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let b = Arc::clone(&b);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        for _ in 0..100 {
                            if i % 2 == 0 { b.record_success() } else { b.record_failure() }
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }

            assert_eq!(b.successes(), 400);
            assert_eq!(b.failures(), 400);
        }
    }

    #[test]
    fn reads_do_not_expire_window() {
        let (clock, b) = manual(Duration::from_secs(1));
        b.record_failure();
        clock.advance(Duration::from_secs(10));
        assert_eq!(b.error_rate(), 1.0);
        assert_eq!(b.failures(), 1);
    }
}
