//! txgate - Sliding-Window Admission Control
//!
//! This crate implements a per-key sliding-window-log rate limiter. Callers
//! supply an identity key and a timestamp; the limiter admits the event while
//! fewer than `max_events` earlier events for that key fall inside the
//! trailing window `(timestamp - window_seconds, timestamp]`.
//!
//! ```
//! use txgate::ratelimit::RateLimiter;
//!
//! let limiter = RateLimiter::new(2, 60).unwrap();
//! assert!(limiter.check_admission("user", 0).unwrap());
//! assert!(limiter.check_admission("user", 30).unwrap());
//! assert!(!limiter.check_admission("user", 59).unwrap());
//! assert!(limiter.check_admission("user", 60).unwrap());
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod input;
pub mod ratelimit;
