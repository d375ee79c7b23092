//! Retry module
//!
//! Bounded exponential-backoff retry for single asynchronous operations.
//! Cancellation is terminal and never retried.

mod backoff;

pub use backoff::{
    BackoffRetrier, RetryPolicy, Retryable, DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_DELAY_MS,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS, PART_MAX_ATTEMPTS,
};
