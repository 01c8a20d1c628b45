use crate::config::RetryConfig;
use crate::error::WatchError;
use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Run a chain query with a per-attempt timeout and bounded exponential backoff.
///
/// With a `deadline`, each attempt's timeout is cut to the time left and no
/// retry starts once it has passed. `what` names the query in logs and in
/// the resulting [`WatchError::QueryFailed`].
pub(crate) async fn query<T, F, Fut>(
    retry: &RetryConfig,
    timeout: Duration,
    deadline: Option<Instant>,
    what: &str,
    mut op: F,
) -> Result<T, WatchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempts = 0usize;
    let attempt = || {
        attempts += 1;
        let limit = match deadline {
            Some(deadline) => timeout.min(deadline.saturating_duration_since(Instant::now())),
            None => timeout,
        };
        let fut = op();
        async move {
            match tokio::time::timeout(limit, fut).await {
                Ok(res) => res,
                Err(_) => Err(anyhow::anyhow!("timed out after {limit:?}")),
            }
        }
    };

    let backoff = ExponentialBuilder::default()
        .with_min_delay(retry.initial_backoff)
        .with_max_delay(retry.max_backoff)
        .with_max_times(retry.max_retries);

    let result = attempt
        .retry(backoff)
        .when(|_: &anyhow::Error| deadline.map_or(true, |deadline| Instant::now() < deadline))
        .notify(|err: &anyhow::Error, after: Duration| {
            tracing::warn!(query = what, reason = %err, ?after, "chain query failed, retrying");
        })
        .await;

    result.map_err(|e| WatchError::QueryFailed {
        what: what.to_string(),
        attempts,
        source: e.into(),
    })
}
