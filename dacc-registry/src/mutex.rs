// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex as SyncMutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dacc_contracts::{KeyEvent, Keystore, LeaseId, Mutex, RegistryError, RegistryErrorKind, Revision};

/// Lock held by owning a key attached to a renewed lease
///
/// Waiters watch the key and race to recreate it once it is deleted. A
/// holder that stops renewing loses the lock after one lease TTL.
pub struct KeystoreMutex {
    keystore: Arc<dyn Keystore>,
    key: String,
    holder: String,
    ttl: Duration,
    held: SyncMutex<Option<Held>>,
}

struct Held {
    lease: LeaseId,
    revision: Revision,
    renew: CancellationToken,
}

impl KeystoreMutex {
    pub fn new(keystore: Arc<dyn Keystore>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            keystore,
            key: key.into(),
            holder: Uuid::new_v4().to_string(),
            ttl,
            held: SyncMutex::new(None),
        }
    }

    /// Each attempt takes a fresh lease so a long wait never outlives one
    async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(LeaseId, Revision), RegistryError> {
        loop {
            // watch before trying so a release between the two is not missed
            let watch_cancel = cancel.child_token();
            let _stop_watch = watch_cancel.clone().drop_guard();
            let mut events = self
                .keystore
                .watch(&self.key, false, watch_cancel)
                .await?;

            let lease = self.keystore.grant_lease(self.ttl).await?;
            match self
                .keystore
                .atomic_add(&self.key, self.holder.clone().into_bytes(), Some(lease))
                .await
            {
                Ok(kv) => return Ok((lease, kv.mod_revision)),
                Err(e) => {
                    if let Err(revoke) = self.keystore.revoke_lease(lease).await {
                        tracing::debug!(lock = %self.key, "unable to revoke unused lease: {revoke}");
                    }
                    if !e.is(RegistryErrorKind::AlreadyExists) {
                        return Err(e);
                    }
                    tracing::debug!(lock = %self.key, "lock busy, waiting");
                }
            }

            loop {
                match events.next().await {
                    Some(KeyEvent::Deleted(_)) => break,
                    Some(_) => continue,
                    None if cancel.is_cancelled() => {
                        return Err(RegistryError::new(
                            RegistryErrorKind::Cancelled,
                            format!("cancelled waiting for lock: {}", self.key),
                        ));
                    }
                    None => break,
                }
            }
        }
    }

    fn spawn_renewal(&self, lease: LeaseId, renew: CancellationToken) {
        let keystore = self.keystore.clone();
        let key = self.key.clone();
        let period = (self.ttl / 3).max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = renew.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = keystore.keep_alive(lease).await {
                            tracing::warn!(lock = %key, "lost lock lease: {e}");
                            break;
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Mutex for KeystoreMutex {
    fn name(&self) -> &str {
        &self.key
    }

    async fn lock(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), RegistryError> {
        if self.held.lock().is_some() {
            return Err(RegistryError::conflict(format!(
                "lock already held: {}",
                self.key
            )));
        }

        let deadline = Instant::now() + timeout;
        let (lease, revision) = match tokio::time::timeout_at(deadline, self.acquire(cancel)).await {
            Ok(acquired) => acquired?,
            Err(_) => {
                return Err(RegistryError::new(
                    RegistryErrorKind::Timeout,
                    format!("timed out waiting for lock: {}", self.key),
                ));
            }
        };

        let renew = CancellationToken::new();
        self.spawn_renewal(lease, renew.clone());
        *self.held.lock() = Some(Held {
            lease,
            revision,
            renew,
        });
        tracing::debug!(lock = %self.key, "lock acquired");
        Ok(())
    }

    async fn unlock(&self) -> Result<(), RegistryError> {
        let Some(held) = self.held.lock().take() else {
            return Ok(());
        };
        held.renew.cancel();

        let released = self
            .keystore
            .compare_and_delete(&self.key, held.revision)
            .await;
        if let Err(e) = &released {
            tracing::warn!(lock = %self.key, "lock was lost before release: {e}");
        }
        self.keystore.revoke_lease(held.lease).await?;
        tracing::debug!(lock = %self.key, "lock released");
        Ok(())
    }
}
