use core::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::LedgerError;

/// Exponential backoff for ledger calls that failed with
/// [LedgerError::Unavailable].
///
/// Sessions never retry on their own. Wrap idempotent reads with this, or
/// retry a mutating call only after the session has resynchronized.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            multiplier: 2.0,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ms = self.initial_backoff_ms as f64 * self.multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let ms = if ms.is_finite() { ms as u64 } else { u64::MAX };
        Duration::from_millis(ms.min(self.max_backoff_ms))
    }

    /// Run `op` until it succeeds, fails with a non-transient error or the
    /// attempts are used up.
    pub async fn retry<F, Fut, T>(&self, mut op: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.backoff(attempt);
                    warn!(attempt, ?delay, error = %e, "ledger call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                res => return res,
            }
        }
    }
}
