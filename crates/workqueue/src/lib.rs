//! Work Queue
//!
//! A deduplicating, rate-limited work queue that decouples event producers
//! from reconciliation workers.
//!
//! # Guarantees
//!
//! - **At most one pending entry per item**: adding an item that is already queued is a no-op.
//! - **At most one in-flight consumer per item**: an item re-added while being processed
//!   is held back until the current consumer calls `done`.
//! - **Retry with backoff**: `add_rate_limited` re-adds a failing item after an
//!   exponentially growing delay; `forget` resets it after a success.
//! - **Graceful shutdown**: after `shut_down`, every `get` returns `None` immediately.
//!
//! Ordering across distinct items is FIFO on a best-effort basis only.
//!
//! # Example
//!
//! ```no_run
//! use workqueue::{RateLimitingQueue, default_controller_rate_limiter};
//!
//! # async fn example() {
//! let queue = RateLimitingQueue::new(default_controller_rate_limiter());
//! queue.add("default/my-pod".to_string());
//!
//! while let Some(key) = queue.get().await {
//!     let failed = false;
//!     if failed {
//!         queue.add_rate_limited(key.clone());
//!     } else {
//!         queue.forget(&key);
//!     }
//!     queue.done(&key);
//! }
//! # }
//! ```

pub mod backoff;
mod delaying;
pub mod metrics;
pub mod queue;
pub mod rate_limiter;
pub mod rate_limiting;

pub use backoff::ExponentialBackoff;
pub use metrics::QueueMetrics;
pub use queue::Queue;
pub use rate_limiter::{
    BucketRateLimiter, ItemExponentialFailureRateLimiter, MaxOfRateLimiter, RateLimiter,
    default_controller_rate_limiter,
};
pub use rate_limiting::RateLimitingQueue;
