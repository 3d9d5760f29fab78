use std::future::Future;

use anyhow::{anyhow, Error, Result};
use tracing::debug;

/// Outcome of one attempt handed to [`retry`].
pub enum Attempt<T> {
    /// Stop retrying and return this result, success or permanent failure.
    Done(Result<T>),
    /// Transient failure; try again while attempts remain.
    Again(Error),
}

/// Attempt budget used around per-organization collection.
pub const ORGANIZATION_ATTEMPTS: usize = 5;

/// Run `operation` up to `max_attempts` times. There is no delay between
/// attempts; callers that need backoff sleep inside the operation. When the
/// budget is exhausted the last error is returned as-is.
pub async fn retry<T, F, Fut>(mut operation: F, max_attempts: usize, label: &str) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=max_attempts {
        match operation().await {
            Attempt::Done(result) => return result,
            Attempt::Again(e) => {
                debug!("{label}: attempt {attempt}/{max_attempts} failed: {e:#}");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow!("{label}: no attempts were made")))
}
