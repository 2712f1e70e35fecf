use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::DbError;

const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Runs `operation`, retrying exactly once when it fails with `DbError::Transient`.
/// Every other outcome, including a second transient failure, is returned as is.
pub async fn retry_transient<T, F, Fut>(label: &str, mut operation: F) -> Result<T, DbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbError>>,
{
    match operation().await {
        Err(DbError::Transient(reason)) => {
            warn!("{} hit a transient store error ({}), retrying once", label, reason);
            tokio::time::sleep(RETRY_DELAY).await;
            operation().await
        }
        outcome => outcome,
    }
}
