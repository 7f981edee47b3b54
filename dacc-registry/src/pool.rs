// SPDX-License-Identifier: GPL-3.0-only

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use dacc_contracts::{
    Keystore, LeaseId, Mutex, PoolRegistry, RegistryError, RegistryErrorKind, WatchStream,
};
use dacc_types::{Brick, BrickAllocation, BrickInfo, Pool, PoolInfo};

use crate::codec::{decode, encode, typed_events};
use crate::keys;
use crate::mutex::KeystoreMutex;

#[derive(Clone)]
pub struct KeystorePoolRegistry {
    keystore: Arc<dyn Keystore>,
    keepalive_ttl: Duration,
    lock_ttl: Duration,
}

/// Everything needed to answer pool questions, read in one pass
struct Snapshot {
    registered: Vec<BrickInfo>,
    allocations: Vec<BrickAllocation>,
    alive: HashSet<String>,
}

impl Snapshot {
    fn pools(&self) -> BTreeMap<String, Pool> {
        let mut pools: BTreeMap<String, Pool> = BTreeMap::new();
        for brick in &self.registered {
            pools
                .entry(brick.pool_name.clone())
                .and_modify(|pool| {
                    pool.granularity_bytes = pool.granularity_bytes.min(brick.capacity_bytes)
                })
                .or_insert_with(|| Pool {
                    name: brick.pool_name.clone(),
                    granularity_bytes: brick.capacity_bytes,
                });
        }
        pools
    }

    fn pool_info(&self, pool: Pool) -> PoolInfo {
        let taken: HashSet<Brick> = self.allocations.iter().map(|a| a.brick()).collect();
        let available_bricks = self
            .registered
            .iter()
            .filter(|brick| brick.pool_name == pool.name)
            .filter(|brick| self.alive.contains(&brick.hostname))
            .map(BrickInfo::brick)
            .filter(|brick| !taken.contains(brick))
            .collect();
        let allocated_bricks = self
            .allocations
            .iter()
            .filter(|allocation| allocation.pool_name == pool.name)
            .cloned()
            .collect();
        PoolInfo {
            pool,
            available_bricks,
            allocated_bricks,
        }
    }
}

impl KeystorePoolRegistry {
    pub fn new(keystore: Arc<dyn Keystore>, keepalive_ttl: Duration, lock_ttl: Duration) -> Self {
        Self {
            keystore,
            keepalive_ttl,
            lock_ttl,
        }
    }

    async fn snapshot(&self) -> Result<Snapshot, RegistryError> {
        let registered = self
            .keystore
            .get_all(keys::REGISTERED_BRICKS)
            .await?
            .iter()
            .map(decode)
            .collect::<Result<Vec<BrickInfo>, _>>()?;
        let allocations = self.all_allocations().await?;
        let alive = self
            .keystore
            .get_all(keys::ALIVE_HOSTS)
            .await?
            .iter()
            .filter_map(|kv| keys::hostname_from_alive(&kv.key).map(str::to_string))
            .collect();
        Ok(Snapshot {
            registered,
            allocations,
            alive,
        })
    }

    async fn all_allocations(&self) -> Result<Vec<BrickAllocation>, RegistryError> {
        self.keystore
            .get_all(keys::ALLOCATIONS)
            .await?
            .iter()
            .map(decode)
            .collect()
    }

    async fn register_alive(
        keystore: &Arc<dyn Keystore>,
        hostname: &str,
        ttl: Duration,
    ) -> Result<LeaseId, RegistryError> {
        let lease = keystore.grant_lease(ttl).await?;
        keystore
            .put(&keys::alive_host(hostname), hostname.as_bytes().to_vec(), Some(lease))
            .await?;
        Ok(lease)
    }

    /// Set `deallocate_requested` on one record, retrying lost races
    async fn request_deallocation(&self, allocation: &BrickAllocation) -> Result<(), RegistryError> {
        let key = keys::allocation(&allocation.hostname, &allocation.device);
        loop {
            let Some(kv) = self.keystore.get(&key).await? else {
                return Ok(());
            };
            let mut current: BrickAllocation = decode(&kv)?;
            if current.allocated_volume != allocation.allocated_volume
                || current.deallocate_requested
            {
                return Ok(());
            }
            current.deallocate_requested = true;
            match self
                .keystore
                .compare_and_put(&key, encode(&current)?, kv.mod_revision)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) if e.is(RegistryErrorKind::Conflict) => continue,
                Err(e) if e.is(RegistryErrorKind::NotFound) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl PoolRegistry for KeystorePoolRegistry {
    async fn update_host(&self, bricks: &[BrickInfo]) -> Result<(), RegistryError> {
        for brick in bricks {
            keys::check_segment("hostname", &brick.hostname)?;
            keys::check_segment("device", &brick.device)?;
            keys::check_segment("pool name", &brick.pool_name)?;
        }
        for brick in bricks {
            self.keystore
                .put(
                    &keys::registered_brick(&brick.hostname, &brick.device),
                    encode(brick)?,
                    None,
                )
                .await?;
        }
        tracing::debug!(bricks = bricks.len(), "registered host bricks");
        Ok(())
    }

    async fn keep_alive_host(
        &self,
        hostname: &str,
        cancel: CancellationToken,
    ) -> Result<(), RegistryError> {
        keys::check_segment("hostname", hostname)?;
        let ttl = self.keepalive_ttl;
        let mut lease = Self::register_alive(&self.keystore, hostname, ttl).await?;
        tracing::info!(host = %hostname, ttl_secs = ttl.as_secs(), "host marked alive");

        let keystore = self.keystore.clone();
        let hostname = hostname.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval((ttl / 3).max(Duration::from_millis(100)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Err(e) = keystore.revoke_lease(lease).await {
                            tracing::warn!(host = %hostname, "unable to revoke liveness lease: {e}");
                        }
                        break;
                    }
                    _ = ticker.tick() => match keystore.keep_alive(lease).await {
                        Ok(()) => {}
                        Err(e) if e.is(RegistryErrorKind::NotFound) => {
                            tracing::warn!(host = %hostname, "liveness lease expired, re-registering");
                            match Self::register_alive(&keystore, &hostname, ttl).await {
                                Ok(renewed) => lease = renewed,
                                Err(e) => tracing::warn!(host = %hostname, "unable to re-register: {e}"),
                            }
                        }
                        Err(e) => tracing::warn!(host = %hostname, "keep alive failed: {e}"),
                    },
                }
            }
            tracing::debug!(host = %hostname, "keep alive stopped");
        });
        Ok(())
    }

    async fn pools(&self) -> Result<Vec<Pool>, RegistryError> {
        Ok(self.snapshot().await?.pools().into_values().collect())
    }

    async fn get_pool(&self, name: &str) -> Result<Pool, RegistryError> {
        self.snapshot()
            .await?
            .pools()
            .remove(name)
            .ok_or_else(|| RegistryError::not_found(format!("unable to find pool: {name}")))
    }

    async fn get_pool_info(&self, name: &str) -> Result<PoolInfo, RegistryError> {
        let snapshot = self.snapshot().await?;
        let pool = snapshot
            .pools()
            .remove(name)
            .ok_or_else(|| RegistryError::not_found(format!("unable to find pool: {name}")))?;
        Ok(snapshot.pool_info(pool))
    }

    async fn get_all_pool_infos(&self) -> Result<Vec<PoolInfo>, RegistryError> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .pools()
            .into_values()
            .map(|pool| snapshot.pool_info(pool))
            .collect())
    }

    async fn get_allocations_for_host(
        &self,
        hostname: &str,
    ) -> Result<Vec<BrickAllocation>, RegistryError> {
        self.keystore
            .get_all(&keys::host_allocations(hostname))
            .await?
            .iter()
            .map(decode)
            .collect()
    }

    async fn get_allocations_for_volume(
        &self,
        volume: &str,
    ) -> Result<Vec<BrickAllocation>, RegistryError> {
        let mut allocations: Vec<_> = self
            .all_allocations()
            .await?
            .into_iter()
            .filter(|allocation| allocation.allocated_volume == volume)
            .collect();
        allocations.sort_by_key(|allocation| allocation.allocated_index);
        Ok(allocations)
    }

    async fn allocate_bricks(
        &self,
        volume: &str,
        pool_name: &str,
        bricks: &[Brick],
    ) -> Result<Vec<BrickAllocation>, RegistryError> {
        keys::check_segment("volume name", volume)?;
        let mut added: Vec<BrickAllocation> = Vec::with_capacity(bricks.len());

        for (index, brick) in bricks.iter().enumerate() {
            let allocation = BrickAllocation {
                device: brick.device.clone(),
                hostname: brick.hostname.clone(),
                pool_name: pool_name.to_string(),
                allocated_volume: volume.to_string(),
                allocated_index: index as u32,
                deallocate_requested: false,
            };
            let key = keys::allocation(&brick.hostname, &brick.device);
            let outcome = match encode(&allocation) {
                Ok(value) => self.keystore.atomic_add(&key, value, None).await,
                Err(e) => Err(e),
            };

            if let Err(e) = outcome {
                for undo in &added {
                    if let Err(undo_err) = self.remove_allocation(undo).await {
                        tracing::warn!(volume = %volume, brick = %undo.brick(), "unable to roll back allocation: {undo_err}");
                    }
                }
                if e.is(RegistryErrorKind::AlreadyExists) {
                    return Err(RegistryError::already_exists(format!(
                        "brick already allocated: {brick}"
                    )));
                }
                return Err(e);
            }
            added.push(allocation);
        }

        tracing::info!(volume = %volume, pool = %pool_name, bricks = added.len(), "bricks allocated");
        Ok(added)
    }

    async fn deallocate_bricks(&self, volume: &str) -> Result<(), RegistryError> {
        for allocation in self.get_allocations_for_volume(volume).await? {
            self.request_deallocation(&allocation).await?;
        }
        tracing::info!(volume = %volume, "brick deallocation requested");
        Ok(())
    }

    async fn remove_allocation(&self, allocation: &BrickAllocation) -> Result<(), RegistryError> {
        let key = keys::allocation(&allocation.hostname, &allocation.device);
        let Some(kv) = self.keystore.get(&key).await? else {
            return Ok(());
        };
        let current: BrickAllocation = decode(&kv)?;
        if current.allocated_volume != allocation.allocated_volume {
            tracing::debug!(brick = %allocation.brick(), "allocation already reassigned");
            return Ok(());
        }
        match self.keystore.compare_and_delete(&key, kv.mod_revision).await {
            Err(e) if e.is(RegistryErrorKind::NotFound) => Ok(()),
            other => other,
        }
    }

    async fn watch_host_brick_allocations(
        &self,
        hostname: &str,
        cancel: CancellationToken,
    ) -> Result<WatchStream<BrickAllocation>, RegistryError> {
        let events = self
            .keystore
            .watch(&keys::host_allocations(hostname), true, cancel)
            .await?;
        Ok(typed_events(events))
    }

    fn allocation_mutex(&self) -> Result<Box<dyn Mutex>, RegistryError> {
        Ok(Box::new(KeystoreMutex::new(
            self.keystore.clone(),
            keys::ALLOCATION_LOCK,
            self.lock_ttl,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryKeystore;
    use futures::StreamExt;
    use dacc_contracts::WatchEvent;

    fn brick_info(host: &str, device: &str, pool: &str, capacity: u64) -> BrickInfo {
        BrickInfo {
            device: device.to_string(),
            hostname: host.to_string(),
            pool_name: pool.to_string(),
            capacity_bytes: capacity,
        }
    }

    fn brick(host: &str, device: &str) -> Brick {
        Brick {
            device: device.to_string(),
            hostname: host.to_string(),
        }
    }

    async fn registry_with_hosts() -> KeystorePoolRegistry {
        let registry = KeystorePoolRegistry::new(
            Arc::new(MemoryKeystore::new()),
            Duration::from_secs(10),
            Duration::from_secs(30),
        );
        registry
            .update_host(&[
                brick_info("host1", "nvme0n1", "pool1", 2048),
                brick_info("host1", "nvme1n1", "pool1", 1024),
                brick_info("host1", "nvme2n1", "pool2", 4096),
            ])
            .await
            .unwrap();
        registry
            .update_host(&[brick_info("host2", "nvme0n1", "pool1", 2048)])
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn pools_derive_granularity_from_smallest_brick() {
        let registry = registry_with_hosts().await;

        let pools = registry.pools().await.unwrap();
        assert_eq!(pools.len(), 2);
        assert_eq!(registry.get_pool("pool1").await.unwrap().granularity_bytes, 1024);
        assert_eq!(registry.get_pool("pool2").await.unwrap().granularity_bytes, 4096);

        let err = registry.get_pool("pool3").await.unwrap_err();
        assert_eq!(err.message, "unable to find pool: pool3");
    }

    #[tokio::test]
    async fn only_bricks_on_live_hosts_are_available() {
        let registry = registry_with_hosts().await;
        assert!(registry.get_pool_info("pool1").await.unwrap().available_bricks.is_empty());

        let cancel = CancellationToken::new();
        registry.keep_alive_host("host1", cancel.clone()).await.unwrap();

        let info = registry.get_pool_info("pool1").await.unwrap();
        assert_eq!(info.available_bricks.len(), 2);
        assert!(info.available_bricks.iter().all(|b| b.hostname == "host1"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn allocated_bricks_leave_the_available_set() {
        let registry = registry_with_hosts().await;
        let cancel = CancellationToken::new();
        registry.keep_alive_host("host1", cancel.clone()).await.unwrap();
        registry.keep_alive_host("host2", cancel.clone()).await.unwrap();

        let allocated = registry
            .allocate_bricks("job1", "pool1", &[brick("host2", "nvme0n1"), brick("host1", "nvme0n1")])
            .await
            .unwrap();
        assert!(allocated[0].is_primary());
        assert_eq!(allocated[1].allocated_index, 1);

        let info = registry.get_pool_info("pool1").await.unwrap();
        assert_eq!(info.available_bricks, vec![brick("host1", "nvme1n1")]);
        assert_eq!(info.allocated_bricks.len(), 2);
        cancel.cancel();
    }

    #[tokio::test]
    async fn clashing_allocation_leaves_no_partial_reservation() {
        let registry = registry_with_hosts().await;
        registry
            .allocate_bricks("job1", "pool1", &[brick("host1", "nvme0n1")])
            .await
            .unwrap();

        let err = registry
            .allocate_bricks("job2", "pool1", &[brick("host2", "nvme0n1"), brick("host1", "nvme0n1")])
            .await
            .unwrap_err();
        assert!(err.is(RegistryErrorKind::AlreadyExists));
        assert!(registry.get_allocations_for_volume("job2").await.unwrap().is_empty());
        assert!(registry.get_allocations_for_host("host2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deallocation_flags_then_removal_frees_bricks() {
        let registry = registry_with_hosts().await;
        let cancel = CancellationToken::new();
        let mut events = registry
            .watch_host_brick_allocations("host1", cancel.clone())
            .await
            .unwrap();

        registry
            .allocate_bricks("job1", "pool1", &[brick("host1", "nvme0n1")])
            .await
            .unwrap();
        registry.deallocate_bricks("job1").await.unwrap();

        assert!(matches!(events.next().await, Some(WatchEvent::Created(a)) if a.is_primary()));
        let Some(WatchEvent::Updated { old, new }) = events.next().await else {
            panic!("expected an update");
        };
        assert!(!old.deallocate_requested && new.deallocate_requested);

        registry.remove_allocation(&new).await.unwrap();
        assert!(matches!(events.next().await, Some(WatchEvent::Deleted(_))));
        assert!(registry.get_allocations_for_volume("job1").await.unwrap().is_empty());
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_survives_past_ttl_and_stops_on_cancel() {
        let keystore = Arc::new(MemoryKeystore::new());
        let registry = KeystorePoolRegistry::new(
            keystore.clone(),
            Duration::from_secs(3),
            Duration::from_secs(30),
        );
        let cancel = CancellationToken::new();
        registry.keep_alive_host("host1", cancel.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(keystore.get(&keys::alive_host("host1")).await.unwrap().is_some());

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(keystore.get(&keys::alive_host("host1")).await.unwrap().is_none());
    }
}
