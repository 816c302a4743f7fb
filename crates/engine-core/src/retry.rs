use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Indicates whether an error should be retried or treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retry,
    Stop,
}

/// Result of running an operation under the retry policy.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The error was considered fatal and should bubble up immediately.
    Fatal { error: E, attempts: u32 },
    /// The error was retryable, but the configured attempts were exhausted.
    AttemptsExceeded { error: E, attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Fatal { attempts, .. } | RetryError::AttemptsExceeded { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Fatal { error, .. } | RetryError::AttemptsExceeded { error, .. } => error,
        }
    }
}

/// Successful result together with the attempt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: if max_delay.is_zero() {
                base_delay
            } else {
                max_delay
            },
        }
    }

    /// Preset for activity attempts: 1s doubling up to a minute, ten tries.
    pub fn for_activities() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Executes the operation with the configured retry policy.
    pub async fn run<F, Fut, T, E, Classifier>(
        &self,
        op: F,
        classify: Classifier,
    ) -> Result<Attempted<T>, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Classifier: Fn(&E) -> RetryDisposition,
    {
        self.run_observed(op, classify, |_, _, _| {}).await
    }

    /// Like [`RetryPolicy::run`], calling `on_retry(error, attempt, delay)`
    /// before each backoff sleep. `op` receives the 1-based attempt number.
    pub async fn run_observed<F, Fut, T, E, Classifier, Observer>(
        &self,
        mut op: F,
        classify: Classifier,
        mut on_retry: Observer,
    ) -> Result<Attempted<T>, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Classifier: Fn(&E) -> RetryDisposition,
        Observer: FnMut(&E, u32, Duration),
    {
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => {
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    });
                }
                Err(error) => match classify(&error) {
                    RetryDisposition::Stop => {
                        return Err(RetryError::Fatal {
                            error,
                            attempts: attempt,
                        });
                    }
                    RetryDisposition::Retry => {
                        if attempt >= self.max_attempts {
                            return Err(RetryError::AttemptsExceeded {
                                error,
                                attempts: attempt,
                            });
                        }

                        let delay = self.backoff_delay(attempt - 1);
                        on_retry(&error, attempt, delay);
                        sleep(delay).await;
                        attempt += 1;
                    }
                },
            }
        }
    }

    pub fn backoff_delay(&self, retry: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::from_millis(0);
        }

        let factor = 1u128 << retry.min(6);
        let base_ms = self.base_delay.as_millis();
        let delay_ms = base_ms.saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis());
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast(5)
            .run(
                |_| async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient")
                    } else {
                        Ok(42)
                    }
                },
                |_| RetryDisposition::Retry,
            )
            .await
            .unwrap();

        assert_eq!(
            result,
            Attempted {
                value: 42,
                attempts: 3
            }
        );
    }

    #[tokio::test]
    async fn stops_on_fatal_error() {
        let err = fast(5)
            .run(|_| async { Err::<(), _>("bad row") }, |_| RetryDisposition::Stop)
            .await
            .unwrap_err();

        assert!(matches!(err, RetryError::Fatal { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mut observed = Vec::new();
        let err = fast(3)
            .run_observed(
                |_| async { Err::<(), _>("down") },
                |_| RetryDisposition::Retry,
                |_, attempt, _| observed.push(attempt),
            )
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 3);
        assert_eq!(err.into_inner(), "down");
        assert_eq!(observed, vec![1, 2]);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::for_activities();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(5), Duration::from_secs(32));
        assert_eq!(policy.backoff_delay(6), Duration::from_secs(60));
        assert_eq!(policy.backoff_delay(20), Duration::from_secs(60));
    }
}
