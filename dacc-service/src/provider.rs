// SPDX-License-Identifier: GPL-3.0-only

//! Provider that only logs
//!
//! Stands in for a real filesystem and data mover. Individual operations can
//! be set to fail with a fixed message, which is how failure paths are
//! exercised.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use dacc_contracts::{Mounter, ProviderResult, VolumeProvider};
use dacc_types::{BrickAllocation, Configuration, Volume};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOp {
    SetupVolume,
    CopyDataIn,
    CopyDataOut,
    TeardownVolume,
    ReleaseBrick,
    Mount,
    Unmount,
}

/// One recorded provider call: the operation and the volume it targeted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    pub op: ProviderOp,
    pub volume: String,
    pub host: Option<String>,
}

#[derive(Default)]
pub struct FakeProvider {
    failures: Mutex<HashMap<ProviderOp, String>>,
    calls: Mutex<Vec<ProviderCall>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `op` fail with `message`
    pub fn fail(&self, op: ProviderOp, message: impl Into<String>) {
        self.failures.lock().insert(op, message.into());
    }

    pub fn succeed(&self, op: ProviderOp) {
        self.failures.lock().remove(&op);
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, op: ProviderOp) -> usize {
        self.calls.lock().iter().filter(|c| c.op == op).count()
    }

    fn record(&self, op: ProviderOp, volume: &str, host: Option<&str>) -> ProviderResult {
        tracing::info!(op = ?op, session = %volume, host = host.unwrap_or(""), "provider call");
        self.calls.lock().push(ProviderCall {
            op,
            volume: volume.to_string(),
            host: host.map(str::to_string),
        });
        match self.failures.lock().get(&op) {
            Some(message) => Err(message.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl VolumeProvider for FakeProvider {
    async fn setup_volume(&self, volume: &Volume) -> ProviderResult {
        self.record(ProviderOp::SetupVolume, &volume.name, None)
    }

    async fn copy_data_in(&self, volume: &Volume) -> ProviderResult {
        self.record(ProviderOp::CopyDataIn, &volume.name, None)
    }

    async fn copy_data_out(&self, volume: &Volume) -> ProviderResult {
        self.record(ProviderOp::CopyDataOut, &volume.name, None)
    }

    async fn teardown_volume(&self, volume: &Volume) -> ProviderResult {
        self.record(ProviderOp::TeardownVolume, &volume.name, None)
    }

    async fn release_brick(&self, allocation: &BrickAllocation) -> ProviderResult {
        self.record(
            ProviderOp::ReleaseBrick,
            &allocation.allocated_volume,
            Some(&allocation.hostname),
        )
    }
}

#[async_trait]
impl Mounter for FakeProvider {
    async fn mount(
        &self,
        volume: &Volume,
        configuration: &Configuration,
        hostname: &str,
    ) -> ProviderResult {
        tracing::debug!(path = %configuration.mount_path, "mount");
        self.record(ProviderOp::Mount, &volume.name, Some(hostname))
    }

    async fn unmount(
        &self,
        volume: &Volume,
        configuration: &Configuration,
        hostname: &str,
    ) -> ProviderResult {
        tracing::debug!(path = %configuration.mount_path, "unmount");
        self.record(ProviderOp::Unmount, &volume.name, Some(hostname))
    }
}
