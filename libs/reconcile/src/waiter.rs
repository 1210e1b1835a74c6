//! Bounded polling for resource visibility after a mutating call.
//!
//! Cluster metadata propagates asynchronously: a user or bucket created a
//! moment ago may not be readable yet. [`ConvergenceWaiter`] polls an
//! [`ExistenceProbe`] with exponential backoff until the resource shows up or
//! the retry ceiling is reached.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::error::{BoxError, WaitError};

/// Default number of probe attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default backoff multiplier.
pub const DEFAULT_BACKOFF_BASE: f64 = 2.0;

/// Default wait before the second attempt.
pub const DEFAULT_BASE_UNIT: Duration = Duration::from_millis(500);

/// Default backoff ceiling.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Invalid retry policy parameters.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RetryPolicyError {
    #[error("max_retries must be at least 1")]
    ZeroRetries,

    #[error("backoff_base must be a finite number greater than 1, got {0}")]
    InvalidBase(f64),

    #[error("max_backoff must not be shorter than base_unit")]
    CeilingBelowUnit,
}

/// Exponential backoff with a ceiling.
///
/// The wait before attempt `k` (1-indexed, `k >= 2`) is
/// `min(backoff_base^(k-2) * base_unit, max_backoff)`. Attempt 1 does not wait.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_base: f64,
    base_unit: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            base_unit: DEFAULT_BASE_UNIT,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Create a validated retry policy.
    pub fn new(
        max_retries: u32,
        backoff_base: f64,
        base_unit: Duration,
        max_backoff: Duration,
    ) -> Result<Self, RetryPolicyError> {
        if max_retries == 0 {
            return Err(RetryPolicyError::ZeroRetries);
        }
        if !backoff_base.is_finite() || backoff_base <= 1.0 {
            return Err(RetryPolicyError::InvalidBase(backoff_base));
        }
        if max_backoff < base_unit {
            return Err(RetryPolicyError::CeilingBelowUnit);
        }

        Ok(Self {
            max_retries,
            backoff_base,
            base_unit,
            max_backoff,
        })
    }

    /// Maximum number of probe attempts.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff_base(&self) -> f64 {
        self.backoff_base
    }

    /// Wait before the second attempt.
    pub fn base_unit(&self) -> Duration {
        self.base_unit
    }

    /// Backoff ceiling.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Wait before the given attempt (1-indexed).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let secs = self.base_unit.as_secs_f64() * self.backoff_base.powi(exponent);

        // powi overflows to infinity long before Duration would; clamp first.
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Final result of a wait that was neither cancelled nor failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityOutcome {
    /// Whether the resource became visible.
    pub found: bool,

    /// Probe calls issued.
    pub attempts: u32,
}

/// Check whether a resource is visible yet.
///
/// Return `Ok(false)` for "not yet visible". Return `Err` only for genuine
/// failures (bad request, auth, transport).
#[async_trait]
pub trait ExistenceProbe: Send + Sync {
    async fn check_exists(&self, cancel: &CancelSignal) -> Result<bool, BoxError>;
}

/// Probe built from a closure. See [`probe_fn`].
pub struct FnProbe<F>(F);

/// Wrap a closure returning a future as an [`ExistenceProbe`].
pub fn probe_fn<F, Fut>(f: F) -> FnProbe<F>
where
    F: Fn(CancelSignal) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
{
    FnProbe(f)
}

#[async_trait]
impl<F, Fut> ExistenceProbe for FnProbe<F>
where
    F: Fn(CancelSignal) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
{
    async fn check_exists(&self, cancel: &CancelSignal) -> Result<bool, BoxError> {
        (self.0)(cancel.clone()).await
    }
}

/// Polls an existence probe under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct ConvergenceWaiter {
    policy: RetryPolicy,
}

impl ConvergenceWaiter {
    /// Create a waiter with the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The policy this waiter polls with.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Poll `probe` until it reports the resource visible or the attempts run out.
    ///
    /// Exhaustion returns `found = false` with no error; the caller decides
    /// whether that is acceptable. Cancellation is checked before every probe
    /// call and every sleep, and interrupts an in-flight probe or sleep.
    pub async fn wait_until_visible<P>(
        &self,
        cancel: &CancelSignal,
        probe: &P,
        label: &str,
    ) -> Result<VisibilityOutcome, WaitError>
    where
        P: ExistenceProbe + ?Sized,
    {
        let max = self.policy.max_retries;
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(label, attempts));
            }

            attempts += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(label, attempts)),
                result = probe.check_exists(cancel) => result,
            };
            let visible = match result {
                Ok(visible) => visible,
                Err(source) => {
                    warn!(label = %label, attempt = attempts, error = %source, "Visibility probe failed");
                    return Err(WaitError::Probe {
                        label: label.to_string(),
                        attempt: attempts,
                        source,
                    });
                }
            };

            if visible {
                if attempts > 1 {
                    info!(label = %label, attempts, "Resource became visible");
                } else {
                    debug!(label = %label, "Resource visible on first probe");
                }
                return Ok(VisibilityOutcome {
                    found: true,
                    attempts,
                });
            }

            if attempts >= max {
                warn!(label = %label, attempts, "Resource not visible after all attempts");
                return Ok(VisibilityOutcome {
                    found: false,
                    attempts,
                });
            }

            if cancel.is_cancelled() {
                return Err(cancelled(label, attempts));
            }

            let delay = self.policy.delay_before(attempts + 1);
            debug!(
                label = %label,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Resource not visible yet, backing off"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(cancelled(label, attempts));
                }
            }
        }
    }
}

fn cancelled(label: &str, attempts: u32) -> WaitError {
    debug!(label = %label, attempts, "Wait cancelled");
    WaitError::Cancelled {
        label: label.to_string(),
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Probe returning `false` for the first `misses` calls, then `true`.
    struct CountingProbe {
        calls: AtomicU32,
        misses: u32,
    }

    impl CountingProbe {
        fn visible_after(misses: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                misses,
            }
        }

        fn never_visible() -> Self {
            Self::visible_after(u32::MAX)
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExistenceProbe for CountingProbe {
        async fn check_exists(&self, _cancel: &CancelSignal) -> Result<bool, BoxError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(n >= self.misses)
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_retries,
            2.0,
            Duration::from_millis(100),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success() {
        let probe = CountingProbe::visible_after(0);
        let waiter = ConvergenceWaiter::new(policy(4));

        let started = tokio::time::Instant::now();
        let outcome = waiter
            .wait_until_visible(&CancelSignal::never(), &probe, "user alice")
            .await
            .unwrap();

        assert_eq!(outcome, VisibilityOutcome { found: true, attempts: 1 });
        assert_eq!(probe.calls(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_exhaustion() {
        let probe = CountingProbe::never_visible();
        let waiter = ConvergenceWaiter::new(policy(4));

        let started = tokio::time::Instant::now();
        let outcome = waiter
            .wait_until_visible(&CancelSignal::never(), &probe, "bucket logs")
            .await
            .unwrap();

        assert!(!outcome.found);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(probe.calls(), 4);
        // 100ms + 200ms + 400ms of backoff between the four attempts.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(700) && elapsed < Duration::from_millis(710));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_convergence() {
        let probe = CountingProbe::visible_after(2);
        let waiter = ConvergenceWaiter::new(policy(5));

        let outcome = waiter
            .wait_until_visible(&CancelSignal::never(), &probe, "group ops")
            .await
            .unwrap();

        assert_eq!(outcome, VisibilityOutcome { found: true, attempts: 3 });
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let probe = probe_fn({
            let calls = Arc::clone(&calls);
            move |_cancel| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<bool, BoxError>("403 access denied".into())
                }
            }
        });
        let waiter = ConvergenceWaiter::new(policy(5));

        let err = waiter
            .wait_until_visible(&CancelSignal::never(), &probe, "user alice")
            .await
            .unwrap_err();

        assert!(matches!(err, WaitError::Probe { attempt: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_probe() {
        let probe = CountingProbe::visible_after(0);
        let waiter = ConvergenceWaiter::new(policy(5));
        let (handle, signal) = CancelSignal::new();
        handle.cancel();

        let err = waiter
            .wait_until_visible(&signal, &probe, "user alice")
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_fired_by_probe_stops_before_sleep() {
        let (handle, signal) = CancelSignal::new();
        let handle = Arc::new(handle);
        let calls = Arc::new(AtomicU32::new(0));
        let probe = probe_fn({
            let handle = Arc::clone(&handle);
            let calls = Arc::clone(&calls);
            move |_cancel| {
                let handle = Arc::clone(&handle);
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    handle.cancel();
                    Ok(false)
                }
            }
        });
        let waiter = ConvergenceWaiter::new(policy(5));

        let started = tokio::time::Instant::now();
        let err = waiter
            .wait_until_visible(&signal, &probe, "bucket logs")
            .await
            .unwrap_err();

        assert!(matches!(err, WaitError::Cancelled { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let probe = Arc::new(CountingProbe::never_visible());
        let waiter = ConvergenceWaiter::new(
            RetryPolicy::new(5, 2.0, Duration::from_secs(30), Duration::from_secs(60)).unwrap(),
        );
        let (handle, signal) = CancelSignal::new();

        let task = tokio::spawn({
            let probe = Arc::clone(&probe);
            async move { waiter.wait_until_visible(&signal, &*probe, "user alice").await }
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_hung_probe() {
        let probe = probe_fn(|_cancel| async {
            std::future::pending::<()>().await;
            Ok(true)
        });
        let waiter = ConvergenceWaiter::new(policy(3));
        let (handle, signal) = CancelSignal::new();

        let task = tokio::spawn(async move {
            waiter.wait_until_visible(&signal, &probe, "bucket logs").await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, WaitError::Cancelled { attempts: 1, .. }));
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = policy(10);
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before(4), Duration::from_millis(400));
        assert_eq!(policy.delay_before(5), Duration::from_millis(800));
        assert_eq!(policy.delay_before(6), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_monotonic_and_capped() {
        let ceiling = Duration::from_millis(2_500);
        let policy = RetryPolicy::new(64, 2.0, Duration::from_millis(10), ceiling).unwrap();

        let mut previous = Duration::ZERO;
        for attempt in 1..=2_000 {
            let delay = policy.delay_before(attempt);
            assert!(delay >= previous, "attempt {attempt} shrank");
            assert!(delay <= ceiling, "attempt {attempt} exceeded ceiling");
            previous = delay;
        }
        assert_eq!(previous, ceiling);
    }

    #[test]
    fn test_policy_validation() {
        let unit = Duration::from_millis(100);
        assert_eq!(
            RetryPolicy::new(0, 2.0, unit, unit),
            Err(RetryPolicyError::ZeroRetries)
        );
        assert_eq!(
            RetryPolicy::new(3, 1.0, unit, unit),
            Err(RetryPolicyError::InvalidBase(1.0))
        );
        assert!(RetryPolicy::new(3, f64::NAN, unit, unit).is_err());
        assert_eq!(
            RetryPolicy::new(3, 2.0, unit, Duration::from_millis(50)),
            Err(RetryPolicyError::CeilingBelowUnit)
        );
    }
}
