// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use dacc_contracts::{PoolRegistry, Provider, VolumeProvider, VolumeRegistry};
use dacc_types::{BrickAllocation, BrickInfo, bytes_to_pretty};

use super::volume::VolumeStateMachine;
use super::watches::VolumeWatches;
use super::{AllocationChange, classify};
use crate::error::ServiceError;

/// Per host daemon reacting to the allocation of this host's bricks
pub struct HostWatcher {
    hostname: String,
    bricks: Vec<BrickInfo>,
    pools: Arc<dyn PoolRegistry>,
    volumes: Arc<dyn VolumeRegistry>,
    provider: Arc<dyn Provider>,
    watches: VolumeWatches,
}

impl HostWatcher {
    pub fn new(
        hostname: impl Into<String>,
        bricks: Vec<BrickInfo>,
        pools: Arc<dyn PoolRegistry>,
        volumes: Arc<dyn VolumeRegistry>,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            bricks,
            pools,
            volumes,
            provider,
            watches: VolumeWatches::new(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn watches(&self) -> &VolumeWatches {
        &self.watches
    }

    /// Register this host's bricks and start reporting it alive
    pub async fn start(&self, cancel: &CancellationToken) -> Result<(), ServiceError> {
        self.pools.update_host(&self.bricks).await?;
        tracing::info!(host = %self.hostname, bricks = self.bricks.len(), "bricks registered");

        self.pools
            .keep_alive_host(&self.hostname, cancel.child_token())
            .await?;
        self.log_state().await;
        Ok(())
    }

    /// Consume allocation changes until `cancel` fires, then stop every
    /// volume watch
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ServiceError> {
        let mut events = self
            .pools
            .watch_host_brick_allocations(&self.hostname, cancel.clone())
            .await?;

        // allocations made while this host was down
        for allocation in self.pools.get_allocations_for_host(&self.hostname).await? {
            if allocation.deallocate_requested {
                self.release(allocation);
            } else if allocation.is_primary() {
                self.watch_volume(&allocation.allocated_volume, &cancel);
            }
        }

        while let Some(event) = events.next().await {
            match classify(event) {
                AllocationChange::PrimaryAssigned(allocation) => {
                    tracing::info!(host = %self.hostname, session = %allocation.allocated_volume, "primary brick assigned");
                    self.watch_volume(&allocation.allocated_volume, &cancel);
                }
                AllocationChange::DeallocateRequested(allocation) => self.release(allocation),
                AllocationChange::Ignored => {}
            }
        }

        self.watches.shutdown().await;
        tracing::info!(host = %self.hostname, "host watcher stopped");
        Ok(())
    }

    fn watch_volume(&self, volume: &str, cancel: &CancellationToken) {
        let machine = VolumeStateMachine::new(
            volume,
            self.hostname.clone(),
            self.volumes.clone(),
            self.provider.clone(),
        );
        let name = volume.to_string();
        let started = self.watches.start(volume, cancel, move |token| async move {
            match machine.run(token).await {
                Ok(Some(state)) => tracing::info!(session = %name, state = ?state, "volume watch done"),
                Ok(None) => tracing::debug!(session = %name, "volume watch ended"),
                Err(e) => tracing::error!(session = %name, "volume watch failed: {e}"),
            }
        });
        if !started {
            tracing::debug!(session = %volume, "volume already watched");
        }
    }

    /// Wipe a brick the volume no longer needs, then return it to the pool
    fn release(&self, allocation: BrickAllocation) {
        tracing::info!(
            host = %self.hostname,
            session = %allocation.allocated_volume,
            index = allocation.allocated_index,
            device = %allocation.device,
            "brick release requested"
        );
        let provider = self.provider.clone();
        let pools = self.pools.clone();
        tokio::spawn(async move {
            if let Err(message) = provider.release_brick(&allocation).await {
                tracing::error!(brick = %allocation.brick(), error = %message, "unable to release brick");
                return;
            }
            match pools.remove_allocation(&allocation).await {
                Ok(()) => tracing::info!(brick = %allocation.brick(), "brick returned to pool"),
                Err(e) => tracing::error!(brick = %allocation.brick(), "unable to free brick: {e}"),
            }
        });
    }

    async fn log_state(&self) {
        match self.pools.get_allocations_for_host(&self.hostname).await {
            Ok(allocations) => {
                tracing::info!(host = %self.hostname, allocations = allocations.len(), "current allocations")
            }
            Err(e) => tracing::warn!(host = %self.hostname, "unable to list allocations: {e}"),
        }
        match self.pools.pools().await {
            Ok(pools) => {
                for pool in pools {
                    tracing::info!(
                        pool = %pool.name,
                        granularity = %bytes_to_pretty(pool.granularity_bytes, false),
                        "pool"
                    );
                }
            }
            Err(e) => tracing::warn!("unable to list pools: {e}"),
        }
    }
}
