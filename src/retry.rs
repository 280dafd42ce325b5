use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// Exponential backoff with jitter for retrying failed rounds.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retries` (zero based): the capped
    /// exponential base plus up to half of it again as jitter.
    pub fn backoff(&self, retries: u32) -> Duration {
        let base = self
            .initial_backoff_ms
            .saturating_mul(1u64 << retries.min(16))
            .min(self.max_backoff_ms);
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        Duration::from_millis((base + jitter).min(self.max_backoff_ms))
    }

    /// Run `attempt` until it succeeds, fails with something other than a
    /// round failure, or the attempt budget runs out.
    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last = None;
        for retries in 0..self.max_attempts.max(1) {
            if retries > 0 {
                let delay = self.backoff(retries - 1);
                debug!(retries, ?delay, "backing off before retry");
                tokio::time::sleep(delay).await;
            }
            match attempt().await {
                Err(err) if err.is_round_failure() => last = Some(err),
                other => return other,
            }
        }
        let cause = last.map(|err| err.to_string()).unwrap_or_default();
        Err(Error::ServiceUnavailable(format!(
            "gave up after {} attempts: {cause}",
            self.max_attempts.max(1)
        )))
    }
}
