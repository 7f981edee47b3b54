// SPDX-License-Identifier: GPL-3.0-only

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::RegistryError;

/// Cluster wide mutual exclusion
///
/// A holder that dies releases the lock once its lease expires.
#[async_trait]
pub trait Mutex: Send + Sync {
    fn name(&self) -> &str;

    /// Wait until the lock is held, failing with `Timeout` after `timeout`
    /// or `Cancelled` when `cancel` fires
    async fn lock(&self, timeout: Duration, cancel: &CancellationToken)
    -> Result<(), RegistryError>;

    async fn unlock(&self) -> Result<(), RegistryError>;
}
