//! Deadlines and conflict retry policy
//!
//! Every call that touches the API server takes a [`Deadline`]. Conflicts
//! on patch are retried with exponential backoff up to a fixed number of
//! attempts.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{KubeError, Result};

/// Point in time after which I/O is abandoned; None waits indefinitely
pub type Deadline = Option<Instant>;

/// Deadline `timeout` from now
pub fn deadline_in(timeout: Duration) -> Deadline {
    Some(Instant::now() + timeout)
}

/// Run `fut`, failing with [`KubeError::Timeout`] once `deadline` passes
pub async fn within<T, F>(deadline: Deadline, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| KubeError::Timeout(operation.to_string()))?,
        None => fut.await,
    }
}

/// Exponential backoff for optimistic concurrency conflicts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy retrying immediately, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            factor: 1.0,
        }
    }

    /// Wait before attempt `attempt + 1`, where `attempt` starts at 1
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_backoff_ms as f64 * self.factor.max(1.0).powi(exponent);
        Duration::from_millis(millis.min(self.max_backoff_ms as f64) as u64)
    }

    /// Run `op` until it succeeds, fails with something other than a
    /// conflict, or the attempts run out
    pub async fn run<T, F, Fut>(&self, resource: &str, deadline: Deadline, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match within(deadline, resource, op(attempt)).await {
                Err(e) if e.is_conflict() => {
                    if attempt >= attempts {
                        return Err(KubeError::ConflictUnresolved {
                            resource: resource.to_string(),
                            attempts,
                        });
                    }
                    let wait = self.backoff(attempt);
                    tracing::warn!(%resource, attempt, ?wait, "conflict, retrying");
                    if let Some(at) = deadline {
                        if Instant::now() + wait >= at {
                            return Err(KubeError::Timeout(resource.to_string()));
                        }
                    }
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
