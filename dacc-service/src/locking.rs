// SPDX-License-Identifier: GPL-3.0-only

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use dacc_contracts::Mutex;

use crate::error::ServiceError;

/// Run `work` while holding `mutex`
///
/// `work` is not polled until the lock is held, and the lock is released on
/// every outcome of `work`.
pub async fn with_lock<T, F>(
    mutex: &dyn Mutex,
    timeout: Duration,
    cancel: &CancellationToken,
    work: F,
) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    mutex.lock(timeout, cancel).await?;
    tracing::debug!(lock = %mutex.name(), "lock held");

    let result = work.await;

    if let Err(e) = mutex.unlock().await {
        tracing::warn!(lock = %mutex.name(), "unable to release lock: {e}");
    } else {
        tracing::debug!(lock = %mutex.name(), "lock released");
    }
    result
}
