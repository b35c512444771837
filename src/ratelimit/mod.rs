//! Sliding-window rate limiting logic and state management.

mod limiter;
mod sweeper;
mod window;

pub use limiter::RateLimiter;
pub use sweeper::{Sweeper, SweeperConfig, SweeperHandle};
pub use window::{EventLog, OutOfOrderPolicy, WindowPolicy};
