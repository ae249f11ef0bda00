//! Bounded retry with backoff and cancellation
//!
//! Every provider call in the pipeline goes through a [`Retrier`]. The retrier
//! sleeps between attempts according to a [`Backoff`] strategy and stops early
//! when the caller's [`CancellationToken`] fires, either during the call itself
//! or during the sleep.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Attempts used when a policy asks for zero
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay of the default exponential backoff
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Marker error produced when the cancellation token fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Delay strategy between attempts
#[derive(Clone)]
pub enum Backoff {
    /// Retry immediately
    None,
    /// Same delay after every attempt
    Fixed(Duration),
    /// `base * 2^(attempt-1)`
    Exponential { base: Duration },
    /// Half of the capped exponential delay plus a uniform random share of the other half
    ExponentialJitter { base: Duration, max: Duration },
    /// Caller-supplied function of the 1-based attempt number
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl Backoff {
    /// Delay to wait after the given 1-based attempt failed
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base } => exponential(*base, attempt),
            Backoff::ExponentialJitter { base, max } => {
                let capped = exponential(*base, attempt).min(*max);
                let half = capped / 2;
                let half_nanos = half.as_nanos().min(u64::MAX as u128) as u64;
                if half_nanos == 0 {
                    return half;
                }
                half + Duration::from_nanos(fastrand::u64(0..half_nanos))
            }
            Backoff::Custom(f) => f(attempt),
        }
    }
}

fn exponential(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << shift)
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base: DEFAULT_BASE_DELAY,
        }
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backoff::None => f.write_str("None"),
            Backoff::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            Backoff::Exponential { base } => {
                f.debug_struct("Exponential").field("base", base).finish()
            }
            Backoff::ExponentialJitter { base, max } => f
                .debug_struct("ExponentialJitter")
                .field("base", base)
                .field("max", max)
                .finish(),
            Backoff::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

/// Retry policy: attempt budget, backoff and retry predicate
pub struct RetryPolicy<E> {
    max_attempts: u32,
    backoff: Backoff,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
}

impl<E> RetryPolicy<E> {
    /// Default policy: 3 attempts, exponential backoff, retry on every error
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
            should_retry: Arc::new(|_: &E| true),
        }
    }

    /// Set the attempt budget (0 falls back to the default)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = if max_attempts == 0 {
            DEFAULT_MAX_ATTEMPTS
        } else {
            max_attempts
        };
        self
    }

    /// Set the backoff strategy
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the retry predicate
    pub fn with_should_retry(mut self, f: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.should_retry = Arc::new(f);
        self
    }

    /// Number of attempts this policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The backoff strategy
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff.clone(),
            should_retry: Arc::clone(&self.should_retry),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

/// Executes operations under a [`RetryPolicy`]
pub struct Retrier<E> {
    policy: RetryPolicy<E>,
}

impl<E> Clone for Retrier<E> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
        }
    }
}

impl<E> fmt::Debug for Retrier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrier").field("policy", &self.policy).finish()
    }
}

impl<E> Retrier<E>
where
    E: From<Cancelled>,
{
    /// Create a retrier for the given policy
    pub fn new(policy: RetryPolicy<E>) -> Self {
        Self { policy }
    }

    /// The policy this retrier applies
    pub fn policy(&self) -> &RetryPolicy<E> {
        &self.policy
    }

    /// Run `op` until it succeeds, the policy gives up, or `cancel` fires
    ///
    /// The last error is returned as-is. Cancellation yields `E::from(Cancelled)`.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled.into());
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled.into()),
                result = op() => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt >= max_attempts || !(self.policy.should_retry)(&err) {
                return Err(err);
            }

            let delay = self.policy.backoff.delay(attempt);
            debug!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, "Retrying after failure");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled.into()),
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}

impl<E> Default for Retrier<E>
where
    E: From<Cancelled>,
{
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Fail(u32),
        Cancelled,
    }

    impl From<Cancelled> for TestError {
        fn from(_: Cancelled) -> Self {
            TestError::Cancelled
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy<TestError> {
        RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_backoff(Backoff::Exponential {
                base: Duration::from_millis(1),
            })
    }

    #[tokio::test]
    async fn test_success_on_first_try() {
        let retrier = Retrier::new(fast_policy(3));
        let calls = &AtomicU32::new(0);

        let result = retrier
            .run(&CancellationToken::new(), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>("ok")
            })
            .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_eventually_succeeds() {
        let retrier = Retrier::new(fast_policy(3));
        let calls = &AtomicU32::new(0);

        let result = retrier
            .run(&CancellationToken::new(), || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 2 {
                    Err(TestError::Fail(n))
                } else {
                    Ok("success")
                }
            })
            .await;

        assert_eq!(result, Ok("success"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_always_fails_returns_last_error() {
        let retrier = Retrier::new(fast_policy(4));
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = retrier
            .run(&CancellationToken::new(), || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(TestError::Fail(n))
            })
            .await;

        assert_eq!(result, Err(TestError::Fail(4)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_zero_attempts_falls_back_to_default() {
        let retrier = Retrier::new(fast_policy(0));
        let calls = &AtomicU32::new(0);

        let _: Result<(), _> = retrier
            .run(&CancellationToken::new(), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Fail(0))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), DEFAULT_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_should_retry_false_is_single_shot() {
        let retrier = Retrier::new(fast_policy(5).with_should_retry(|_| false));
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = retrier
            .run(&CancellationToken::new(), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Fail(1))
            })
            .await;

        assert_eq!(result, Err(TestError::Fail(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_never_calls() {
        let retrier = Retrier::new(fast_policy(3));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = &AtomicU32::new(0);

        let result: Result<&str, _> = retrier
            .run(&cancel, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("nope")
            })
            .await;

        assert_eq!(result, Err(TestError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_backoff() {
        let retrier = Retrier::new(
            RetryPolicy::new()
                .with_max_attempts(3)
                .with_backoff(Backoff::Fixed(Duration::from_secs(60))),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = retrier
            .run(&cancel, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Fail(1))
            })
            .await;

        assert_eq!(result, Err(TestError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_call() {
        let retrier: Retrier<TestError> = Retrier::new(fast_policy(3));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });

        let result = retrier
            .run(&cancel, || async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await;

        assert_eq!(result, Err(TestError::Cancelled));
    }

    #[test]
    fn test_exponential_backoff() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(4), Duration::from_millis(800));
    }

    #[test]
    fn test_jitter_backoff_bounds() {
        let backoff = Backoff::ExponentialJitter {
            base: Duration::from_millis(500),
            max: Duration::from_secs(2),
        };
        for attempt in 1..10 {
            let capped = (Duration::from_millis(500) * (1 << (attempt - 1))).min(Duration::from_secs(2));
            let delay = backoff.delay(attempt);
            assert!(delay >= capped / 2, "attempt {attempt}: {delay:?}");
            assert!(delay <= capped, "attempt {attempt}: {delay:?}");
        }
    }

    #[test]
    fn test_exponential_saturates() {
        let backoff = Backoff::Exponential {
            base: Duration::from_secs(1),
        };
        // Large attempt numbers must not overflow
        assert!(backoff.delay(100) >= Duration::from_secs(1 << 31));
    }
}
