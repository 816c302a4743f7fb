use crate::error::ActivityError;
use async_trait::async_trait;
use engine_core::{
    metrics::Metrics,
    retry::{Attempted, RetryPolicy},
};
use serde::{Serialize, de::DeserializeOwned};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A side-effecting step a workflow delegates to the worker.
///
/// Activities run at least once per scheduled call and may run more than
/// once after a crash or a lost result, so they must be safe to repeat.
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    type Input: Serialize + DeserializeOwned + Send + Sync + 'static;
    type Output: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Name the activity is registered and recorded under.
    const NAME: &'static str;

    async fn execute(&self, input: Self::Input) -> Result<Self::Output, ActivityError>;
}

#[async_trait]
pub(crate) trait ErasedActivity: Send + Sync {
    async fn execute_erased(&self, input: &[u8]) -> Result<Vec<u8>, ActivityError>;
}

#[async_trait]
impl<A: Activity> ErasedActivity for A {
    async fn execute_erased(&self, input: &[u8]) -> Result<Vec<u8>, ActivityError> {
        let input: A::Input = serde_json::from_slice(input).map_err(|e| {
            ActivityError::NonRetryable(format!("malformed input for '{}': {e}", A::NAME))
        })?;
        let output = self.execute(input).await?;
        serde_json::to_vec(&output).map_err(|e| {
            ActivityError::NonRetryable(format!("unencodable output of '{}': {e}", A::NAME))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityOptions {
    /// Bound on a single attempt, from start to result.
    pub start_to_close_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close_timeout: Duration::from_secs(300),
            retry: RetryPolicy::for_activities(),
        }
    }
}

pub(crate) enum ActivityRunError {
    Interrupted,
    Failed { message: String, attempts: u32 },
}

/// Executes activities on behalf of every run hosted by one worker.
///
/// A semaphore bounds attempts in flight across all runs; a slot is held for
/// one attempt and released during backoff.
#[derive(Clone)]
pub(crate) struct ActivityPool {
    activities: Arc<HashMap<String, Arc<dyn ErasedActivity>>>,
    permits: Arc<Semaphore>,
    metrics: Metrics,
}

impl ActivityPool {
    pub(crate) fn new(
        activities: HashMap<String, Arc<dyn ErasedActivity>>,
        max_concurrent: usize,
        metrics: Metrics,
    ) -> Self {
        Self {
            activities: Arc::new(activities),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            metrics,
        }
    }

    pub(crate) async fn execute(
        &self,
        name: &str,
        run_id: &str,
        input: &[u8],
        options: &ActivityOptions,
        shutdown: &CancellationToken,
    ) -> Result<Attempted<Vec<u8>>, ActivityRunError> {
        let Some(activity) = self.activities.get(name).cloned() else {
            return Err(ActivityRunError::Failed {
                message: format!("activity '{name}' is not registered on this worker"),
                attempts: 0,
            });
        };

        let timeout = options.start_to_close_timeout;
        let attempts = options.retry.run_observed(
            |attempt| {
                let activity = activity.clone();
                let permits = self.permits.clone();
                async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| ActivityError::non_retryable("activity pool is closed"))?;
                    debug!(run_id, activity = name, attempt, "Activity attempt started");
                    match tokio::time::timeout(timeout, activity.execute_erased(input)).await {
                        Ok(result) => result,
                        Err(_) => Err(ActivityError::Timeout(timeout)),
                    }
                }
            },
            ActivityError::disposition,
            |err, attempt, delay| {
                self.metrics.increment_retries(1);
                warn!(
                    run_id,
                    activity = name,
                    attempt,
                    retry_in = ?delay,
                    error = %err,
                    "Activity attempt failed, retrying"
                );
            },
        );

        tokio::select! {
            result = attempts => result.map_err(|err| {
                self.metrics.increment_failures(1);
                let attempts = err.attempts();
                ActivityRunError::Failed {
                    message: err.into_inner().to_string(),
                    attempts,
                }
            }),
            _ = shutdown.cancelled() => Err(ActivityRunError::Interrupted),
        }
    }
}
