// SPDX-License-Identifier: GPL-3.0-only

//! Scheduler facing phase commands
//!
//! Each data or mount phase requests a state on the volume and blocks until
//! the host holding the primary brick reports the paired completion state.
//! Sessions without bricks have nothing to drive and skip every phase.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use dacc_contracts::{PoolRegistry, SessionRegistry, VolumeRegistry};
use dacc_types::{Capacity, Configuration, Session, Volume, VolumeRequest, VolumeState};

use crate::error::ServiceError;
use crate::facade::SessionFacade;

/// A buffer requested through `setup` or `create_persistent`
#[derive(Debug, Clone)]
pub struct BufferRequest {
    pub token: String,
    pub capacity: Capacity,
    pub caller: String,
    pub user: u32,
    pub group: u32,
    pub job_file: String,
    pub access: String,
    pub buffer_type: String,
    pub persistent: bool,
}

impl BufferRequest {
    pub fn into_session(self) -> Session {
        let mut session = Session::new(
            self.token,
            VolumeRequest {
                pool_name: self.capacity.pool,
                total_capacity_bytes: self.capacity.bytes,
                access: self.access,
                buffer_type: self.buffer_type,
            },
        );
        session.caller = self.caller;
        session.owner = self.user;
        session.group = self.group;
        session.job_file = self.job_file;
        session.is_persistent = self.persistent;
        session
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub id: String,
    pub units: &'static str,
    pub granularity: u64,
    pub quantity: usize,
    pub free: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealSize {
    pub token: String,
    pub capacity: u64,
    pub units: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    DataIn,
    PreRun,
    PostRun,
    DataOut,
}

impl Phase {
    pub fn requested(self) -> VolumeState {
        match self {
            Self::DataIn => VolumeState::DataInRequested,
            Self::PreRun => VolumeState::MountRequested,
            Self::PostRun => VolumeState::UnmountRequested,
            Self::DataOut => VolumeState::DataOutRequested,
        }
    }

    pub fn awaited(self) -> VolumeState {
        match self {
            Self::DataIn => VolumeState::DataInComplete,
            Self::PreRun => VolumeState::MountComplete,
            Self::PostRun => VolumeState::UnmountComplete,
            Self::DataOut => VolumeState::DataOutComplete,
        }
    }
}

pub struct SessionWorkflow {
    facade: Arc<SessionFacade>,
    sessions: Arc<dyn SessionRegistry>,
    volumes: Arc<dyn VolumeRegistry>,
    pools: Arc<dyn PoolRegistry>,
    state_timeout: Duration,
}

impl SessionWorkflow {
    pub fn new(
        facade: Arc<SessionFacade>,
        sessions: Arc<dyn SessionRegistry>,
        volumes: Arc<dyn VolumeRegistry>,
        pools: Arc<dyn PoolRegistry>,
    ) -> Self {
        let state_timeout = facade.timeouts().state;
        Self {
            facade,
            sessions,
            volumes,
            pools,
            state_timeout,
        }
    }

    pub async fn setup(
        &self,
        request: BufferRequest,
        cancel: &CancellationToken,
    ) -> Result<Session, ServiceError> {
        self.facade
            .create_session(request.into_session(), cancel)
            .await
    }

    pub async fn teardown(
        &self,
        token: &str,
        hurry: bool,
        cancel: &CancellationToken,
    ) -> Result<(), ServiceError> {
        self.facade.delete_session(token, hurry, cancel).await
    }

    pub async fn pools(&self) -> Result<Vec<PoolSummary>, ServiceError> {
        Ok(self
            .pools
            .get_all_pool_infos()
            .await?
            .into_iter()
            .map(|info| PoolSummary {
                quantity: info.quantity(),
                free: info.available_bricks.len(),
                granularity: info.pool.granularity_bytes,
                id: info.pool.name,
                units: "bytes",
            })
            .collect())
    }

    pub async fn sessions(&self) -> Result<Vec<Session>, ServiceError> {
        Ok(self.sessions.all_sessions().await?)
    }

    pub async fn real_size(&self, token: &str) -> Result<RealSize, ServiceError> {
        let session = self.sessions.get_session(token).await?;
        Ok(RealSize {
            token: session.name,
            capacity: session.actual_size_bytes,
            units: "bytes",
        })
    }

    /// Environment lines telling the job where its buffer is mounted
    pub async fn paths(&self, token: &str) -> Result<Vec<String>, ServiceError> {
        let session = self.sessions.get_session(token).await?;
        let configuration = Configuration::for_session(&session);
        Ok(vec![format!("DW_JOB_STRIPED={}", configuration.mount_path)])
    }

    pub async fn data_in(&self, token: &str) -> Result<Volume, ServiceError> {
        self.run_phase(token, Phase::DataIn).await
    }

    /// Record the compute hosts, then mount on them
    pub async fn pre_run(&self, token: &str, hosts: &[String]) -> Result<Volume, ServiceError> {
        if !hosts.is_empty() {
            self.volumes.update_attachments(token, hosts).await?;
        }
        self.run_phase(token, Phase::PreRun).await
    }

    pub async fn post_run(&self, token: &str) -> Result<Volume, ServiceError> {
        self.run_phase(token, Phase::PostRun).await
    }

    pub async fn data_out(&self, token: &str) -> Result<Volume, ServiceError> {
        self.run_phase(token, Phase::DataOut).await
    }

    pub async fn run_phase(&self, token: &str, phase: Phase) -> Result<Volume, ServiceError> {
        let volume = self.volumes.volume(token).await?;
        if !volume.has_bricks() {
            tracing::info!(session = %token, phase = ?phase, "no bricks, skipping phase");
            return Ok(volume);
        }
        if volume.state == VolumeState::Error {
            return Err(ServiceError::ActionFailed(format!(
                "session {token} is in error state: {}",
                volume.status.error
            )));
        }

        self.volumes.update_state(token, phase.requested()).await?;
        let reached = self
            .volumes
            .wait_for_state(token, phase.awaited(), self.state_timeout)
            .await?;

        if reached.state == VolumeState::Error {
            let message = if reached.status.error.is_empty() {
                format!("session {token} moved to error during {phase:?}")
            } else {
                reached.status.error.clone()
            };
            return Err(ServiceError::ActionFailed(message));
        }
        Ok(reached)
    }
}

/// Compute host names listed one per line
pub fn parse_host_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
