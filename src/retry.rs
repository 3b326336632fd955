//! Shared "attempts × delay" retry policy.
//!
//! The wire engine, session acquisition, and command body each need "try up
//! to `n+1` times, sleeping `retry_delay` between attempts" (spec: retry
//! count `n` means up to `n+1` attempts). Rather than duplicating that loop
//! three times, it lives here once as [`attempts`].
//!
//! Unlike a generic backoff helper, the delay here is fixed per spec — no
//! exponential growth — since `retry_delay` is an explicit caller-supplied
//! constant, not a policy to be computed.

use std::time::Duration;
use tracing::{debug, warn};

/// Retry an async operation up to `retries + 1` times total, sleeping
/// `retry_delay` between attempts (no sleep after the final attempt).
///
/// Returns `Ok(value)` on the first success, or the last `Err` once all
/// attempts are exhausted.
///
/// `should_retry` is consulted after each failure; returning `false` stops
/// the loop immediately without consuming further attempts or sleeping
/// (used for the non-retriable `402` / session-already-active case).
pub async fn attempts<F, Fut, T, E>(
    retries: u32,
    retry_delay: Duration,
    mut should_retry: impl FnMut(&E) -> bool,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let max_attempts = retries + 1;
    let mut last_err = None;

    for attempt in 1..=max_attempts {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "retry succeeded");
                }
                return Ok(value);
            }
            Err(e) => {
                if !should_retry(&e) {
                    return Err(e);
                }
                if attempt < max_attempts {
                    warn!(attempt, max_attempts, "attempt failed — retrying");
                    if !retry_delay.is_zero() {
                        tokio::time::sleep(retry_delay).await;
                    }
                }
                last_err = Some(e);
            }
        }
    }

    Err(last_err.expect("retry loop ended without setting last_err"))
}

/// Convenience wrapper: every failure is retriable.
pub async fn attempts_all<F, Fut, T, E>(
    retries: u32,
    retry_delay: Duration,
    f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    attempts(retries, retry_delay, |_| true, f).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<u32, String> = attempts_all(2, Duration::ZERO, || {
            let c = calls2.clone();
            async move {
                c.fetch_add(1, Ordering::Relaxed);
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn retry_1_succeeds_on_second_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<u32, String> = attempts_all(1, Duration::ZERO, || {
            let c = calls2.clone();
            async move {
                let n = c.fetch_add(1, Ordering::Relaxed) + 1;
                if n < 2 {
                    Err("not yet".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn retry_0_does_a_single_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<(), String> = attempts_all(0, Duration::ZERO, || {
            let c = calls2.clone();
            async move {
                c.fetch_add(1, Ordering::Relaxed);
                Err("fail".to_string())
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn should_retry_false_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<(), &'static str> = attempts(
            5,
            Duration::ZERO,
            |e: &&'static str| *e != "fatal",
            || {
                let c = calls2.clone();
                async move {
                    c.fetch_add(1, Ordering::Relaxed);
                    Err("fatal")
                }
            },
        )
        .await;
        assert_eq!(result.unwrap_err(), "fatal");
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn returns_last_error_after_exhaustion() {
        let result: Result<(), String> =
            attempts_all(2, Duration::ZERO, || async { Err("nope".to_string()) }).await;
        assert_eq!(result.unwrap_err(), "nope");
    }
}
