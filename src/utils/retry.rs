use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

/// Suspends the current task; swapped for a recording fake in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`
    Exponential { base: Duration },
}

impl Backoff {
    pub fn delay_for(&self, attempt: usize) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base } => {
                let shift = attempt.saturating_sub(1).min(16) as u32;
                base.saturating_mul(1u32 << shift)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_attempts: usize, base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential { base },
        }
    }
}

/// What to do after a failed attempt when attempts remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Stop,
    Backoff,
    Immediately,
}

/// Runs `operation` until it succeeds, fails with an error `is_retryable` rejects,
/// or `policy.max_attempts` is reached. The attempt number (1-based) is passed in.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    is_retryable: P,
    operation: F,
) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    retry_classified(
        policy,
        sleeper,
        |err| {
            if is_retryable(err) {
                RetryAction::Backoff
            } else {
                RetryAction::Stop
            }
        },
        operation,
    )
    .await
}

/// Like [`retry_with_backoff`], but `classify` may also ask for a retry without sleeping.
/// Every attempt counts against `policy.max_attempts`.
pub async fn retry_classified<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    classify: C,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_attempts {
                    return Err(err);
                }
                match classify(&err) {
                    RetryAction::Stop => return Err(err),
                    RetryAction::Backoff => sleeper.sleep(policy.backoff.delay_for(attempt)).await,
                    RetryAction::Immediately => {}
                }
            }
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::Sleeper;

    /// Returns immediately and remembers every requested delay.
    #[derive(Debug, Default)]
    pub struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub fn recorded(&self) -> Vec<Duration> {
            self.slept.lock().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().push(duration);
        }
    }
}
