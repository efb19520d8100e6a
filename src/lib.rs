//! Embeddable circuit breaker with a rolling success/failure bucket.
//!
//! ```
//! use tripwire::{Breaker, BreakerOptions};
//! use std::time::Duration;
//!
//! let breaker = Breaker::new(
//!     BreakerOptions::new()
//!         .with_consecutive_failure_threshold(3)
//!         .with_half_open_interval(Duration::from_secs(2)),
//! );
//!
//! if breaker.allow() {
//!     let ok = true; // call the protected resource here
//!     breaker.report_outcome(ok);
//! }
//! ```

pub mod breaker;
pub mod bucket;
pub mod clock;
pub mod config;

pub use breaker::{Breaker, BreakerOptions, BreakerSnapshot, BreakerState};
pub use bucket::Bucket;
pub use clock::{Clock, ManualClock, MonotonicClock};
