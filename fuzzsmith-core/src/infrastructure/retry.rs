//! Classification-based retry with exponential backoff.
//!
//! Failures are matched against a table of known-transient infrastructure
//! signatures; only matched failures are retried. Each condition carries
//! its own backoff parameters, so a credential expiry (fixed out-of-band)
//! waits long and deterministically while a flaky pipe retries quickly
//! with jitter.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Known transient infrastructure conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    ResourceExhausted,
    BrokenPipe,
    ServiceUnavailable,
    ExpiredCredentials,
    EmptyResponse,
}

impl TransientKind {
    /// Backoff parameters for this condition.
    pub fn backoff(self) -> BackoffPolicy {
        match self {
            Self::ResourceExhausted => BackoffPolicy {
                base: Duration::from_millis(2_000),
                jitter_ms: (0, 2_000),
            },
            Self::BrokenPipe => BackoffPolicy {
                base: Duration::from_millis(500),
                jitter_ms: (0, 500),
            },
            Self::ServiceUnavailable => BackoffPolicy {
                base: Duration::from_millis(1_000),
                jitter_ms: (0, 1_000),
            },
            // Refreshing credentials happens out-of-band; retrying fast
            // only burns attempts, and jitter buys nothing.
            Self::ExpiredCredentials => BackoffPolicy {
                base: Duration::from_secs(30),
                jitter_ms: (0, 0),
            },
            Self::EmptyResponse => BackoffPolicy {
                base: Duration::from_millis(1_000),
                jitter_ms: (0, 1_000),
            },
        }
    }
}

/// Per-condition backoff: `base * 2^attempt + uniform(jitter)`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    /// Inclusive jitter bounds in milliseconds.
    pub jitter_ms: (u64, u64),
}

impl BackoffPolicy {
    /// Delay before re-running attempt `attempt + 1` (0-indexed attempts).
    pub fn delay(&self, attempt: u32) -> Duration {
        let doubled = self.base.saturating_mul(1u32 << attempt.min(16));
        let (lo, hi) = self.jitter_ms;
        let jitter = if hi > lo {
            rand::rng().random_range(lo..=hi)
        } else {
            lo
        };
        doubled + Duration::from_millis(jitter)
    }
}

/// Signature table mapping failure text to a transient condition.
///
/// Matching is case-insensitive substring search; unmatched failures are
/// non-retryable.
#[derive(Debug, Clone)]
pub struct RetryTable {
    rules: Vec<(TransientKind, Vec<&'static str>)>,
}

impl RetryTable {
    /// The standard table of transient infrastructure conditions.
    pub fn standard() -> Self {
        Self {
            rules: vec![
                (
                    TransientKind::ResourceExhausted,
                    vec!["resource exhausted", "resource_exhausted", "quota exceeded", "429"],
                ),
                (
                    TransientKind::BrokenPipe,
                    vec!["broken pipe", "connection reset"],
                ),
                (
                    TransientKind::ServiceUnavailable,
                    vec!["service unavailable", "503", "bad gateway", "502"],
                ),
                (
                    TransientKind::ExpiredCredentials,
                    vec!["expiredtoken", "expired credentials", "invalid_grant"],
                ),
                (
                    TransientKind::EmptyResponse,
                    vec!["empty response", "unexpected eof", "unexpected end of file"],
                ),
            ],
        }
    }

    pub fn classify(&self, message: &str) -> Option<TransientKind> {
        let lowered = message.to_lowercase();
        for (kind, needles) in &self.rules {
            if needles.iter().any(|needle| lowered.contains(needle)) {
                return Some(*kind);
            }
        }
        None
    }
}

impl Default for RetryTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// One failed attempt, kept for diagnostics when retries are exhausted.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub attempt: u32,
    pub kind: TransientKind,
    pub message: String,
}

/// Terminal outcome of a retried operation.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::error::Error> {
    #[error("non-retryable failure: {source}")]
    NonRetryable {
        #[source]
        source: E,
    },
    #[error("retries exhausted after {} attempts: {source}", .attempts.len())]
    Exhausted {
        #[source]
        source: E,
        attempts: Vec<AttemptFailure>,
    },
}

impl<E: std::error::Error> RetryError<E> {
    pub fn into_source(self) -> E {
        match self {
            Self::NonRetryable { source } => source,
            Self::Exhausted { source, .. } => source,
        }
    }
}

/// Run `operation`, retrying failures the table classifies as transient.
///
/// At most `max_attempts` invocations; a non-retryable failure propagates
/// immediately, and exhaustion propagates the last failure with the full
/// attempt trail attached.
pub async fn with_retry<T, E, F, Fut>(
    mut operation: F,
    table: &RetryTable,
    max_attempts: u32,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempts = Vec::new();

    for attempt in 0..max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let message = error.to_string();
                let Some(kind) = table.classify(&message) else {
                    return Err(RetryError::NonRetryable { source: error });
                };
                attempts.push(AttemptFailure {
                    attempt,
                    kind,
                    message,
                });
                if attempt + 1 == max_attempts {
                    return Err(RetryError::Exhausted {
                        source: error,
                        attempts,
                    });
                }
                let delay = kind.backoff().delay(attempt);
                debug!(
                    attempt,
                    max_attempts,
                    condition = ?kind,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
    unreachable!("loop returns on success, non-retryable failure, or exhaustion")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct Flake(String);

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failure_then_returns_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let table = RetryTable::standard();

        let result = with_retry(
            || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Flake("write failed: Broken pipe".into()))
                    } else {
                        Ok("done")
                    }
                }
            },
            &table,
            5,
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        // Failed twice, so retried exactly twice.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let table = RetryTable::standard();

        let result: Result<(), _> = with_retry(
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Flake("permission denied".into()))
                }
            },
            &table,
            5,
        )
        .await;

        assert!(matches!(result, Err(RetryError::NonRetryable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_carries_the_attempt_trail() {
        let table = RetryTable::standard();
        let result: Result<(), _> = with_retry(
            || async { Err::<(), _>(Flake("HTTP 503 Service Unavailable".into())) },
            &table,
            3,
        )
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, .. }) => {
                assert_eq!(attempts.len(), 3);
                assert!(attempts
                    .iter()
                    .all(|a| a.kind == TransientKind::ServiceUnavailable));
                assert_eq!(attempts[2].attempt, 2);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn classification_covers_the_known_conditions() {
        let table = RetryTable::standard();
        assert_eq!(
            table.classify("RESOURCE_EXHAUSTED: quota"),
            Some(TransientKind::ResourceExhausted)
        );
        assert_eq!(
            table.classify("os error: Broken pipe"),
            Some(TransientKind::BrokenPipe)
        );
        assert_eq!(
            table.classify("503 Service Unavailable"),
            Some(TransientKind::ServiceUnavailable)
        );
        assert_eq!(
            table.classify("ExpiredToken: token has expired"),
            Some(TransientKind::ExpiredCredentials)
        );
        assert_eq!(
            table.classify("unexpected empty response"),
            Some(TransientKind::EmptyResponse)
        );
        assert_eq!(table.classify("segmentation fault"), None);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = TransientKind::ExpiredCredentials.backoff();
        // No jitter for credential expiry, so delays are exact.
        assert_eq!(policy.delay(0), Duration::from_secs(30));
        assert_eq!(policy.delay(1), Duration::from_secs(60));
        assert_eq!(policy.delay(2), Duration::from_secs(120));
    }

    #[test]
    fn jittered_backoff_stays_within_bounds() {
        let policy = TransientKind::BrokenPipe.backoff();
        for attempt in 0..4u32 {
            let base = policy.base.saturating_mul(1u32 << attempt);
            let delay = policy.delay(attempt);
            assert!(delay >= base);
            assert!(delay <= base + Duration::from_millis(policy.jitter_ms.1));
        }
    }

    #[test]
    fn credential_expiry_backs_off_longer_than_flaky_pipes() {
        let creds = TransientKind::ExpiredCredentials.backoff();
        let pipe = TransientKind::BrokenPipe.backoff();
        assert!(creds.base > pipe.base);
        assert_eq!(creds.jitter_ms, (0, 0));
    }
}
