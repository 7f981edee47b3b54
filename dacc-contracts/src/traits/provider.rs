// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use dacc_types::{BrickAllocation, Configuration, Volume};

/// Failure reported by a provider, carried as text into the volume status
pub type ProviderResult = Result<(), String>;

#[async_trait]
pub trait VolumeProvider: Send + Sync {
    async fn setup_volume(&self, volume: &Volume) -> ProviderResult;

    async fn copy_data_in(&self, volume: &Volume) -> ProviderResult;

    async fn copy_data_out(&self, volume: &Volume) -> ProviderResult;

    async fn teardown_volume(&self, volume: &Volume) -> ProviderResult;

    /// Wipe one brick once its volume has let go of it
    async fn release_brick(&self, allocation: &BrickAllocation) -> ProviderResult;
}

#[async_trait]
pub trait Mounter: Send + Sync {
    async fn mount(
        &self,
        volume: &Volume,
        configuration: &Configuration,
        hostname: &str,
    ) -> ProviderResult;

    async fn unmount(
        &self,
        volume: &Volume,
        configuration: &Configuration,
        hostname: &str,
    ) -> ProviderResult;
}

/// Everything a host needs to drive volumes through their lifecycle
pub trait Provider: VolumeProvider + Mounter {}

impl<T: VolumeProvider + Mounter> Provider for T {}
