// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use dacc_types::{Brick, BrickAllocation, BrickInfo, Pool, PoolInfo};

use crate::{Mutex, RegistryError, WatchStream};

#[async_trait]
pub trait PoolRegistry: Send + Sync {
    /// Idempotently record the bricks a host owns
    async fn update_host(&self, bricks: &[BrickInfo]) -> Result<(), RegistryError>;

    /// Publish a liveness record for `hostname` and keep renewing it until
    /// `cancel` fires
    async fn keep_alive_host(
        &self,
        hostname: &str,
        cancel: CancellationToken,
    ) -> Result<(), RegistryError>;

    async fn pools(&self) -> Result<Vec<Pool>, RegistryError>;

    /// `NotFound` when no brick reports this pool
    async fn get_pool(&self, name: &str) -> Result<Pool, RegistryError>;

    async fn get_pool_info(&self, name: &str) -> Result<PoolInfo, RegistryError>;

    async fn get_all_pool_infos(&self) -> Result<Vec<PoolInfo>, RegistryError>;

    async fn get_allocations_for_host(
        &self,
        hostname: &str,
    ) -> Result<Vec<BrickAllocation>, RegistryError>;

    async fn get_allocations_for_volume(
        &self,
        volume: &str,
    ) -> Result<Vec<BrickAllocation>, RegistryError>;

    /// Reserve `bricks` for `volume` in order; the first brick is primary.
    /// Fails without leaving a partial reservation if any brick is taken.
    async fn allocate_bricks(
        &self,
        volume: &str,
        pool_name: &str,
        bricks: &[Brick],
    ) -> Result<Vec<BrickAllocation>, RegistryError>;

    /// Flag every brick of `volume` for release by its owning host
    async fn deallocate_bricks(&self, volume: &str) -> Result<(), RegistryError>;

    /// Drop an allocation record, returning the brick to the pool
    async fn remove_allocation(&self, allocation: &BrickAllocation) -> Result<(), RegistryError>;

    async fn watch_host_brick_allocations(
        &self,
        hostname: &str,
        cancel: CancellationToken,
    ) -> Result<WatchStream<BrickAllocation>, RegistryError>;

    /// The single lock ordering every brick reservation in the cluster
    fn allocation_mutex(&self) -> Result<Box<dyn Mutex>, RegistryError>;
}
