//! Shared infrastructure services.

pub mod retry;

pub use retry::{with_retry, AttemptFailure, BackoffPolicy, RetryError, RetryTable, TransientKind};
