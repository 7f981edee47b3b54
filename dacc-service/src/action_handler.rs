// SPDX-License-Identifier: GPL-3.0-only

//! Host side of the session action channel
//!
//! A create action succeeds once the volume reports its bricks provisioned.
//! A delete action drives the volume to `BricksDeleted`, hands the bricks
//! back for release and removes the session record.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use dacc_contracts::{
    PoolRegistry, RegistryErrorKind, SessionActions, SessionRegistry, VolumeRegistry, WatchEvent,
};
use dacc_types::{SessionAction, SessionActionKind, SessionActionRequest, VolumeState};

use crate::error::ServiceError;

#[derive(Clone)]
pub struct ActionHandler {
    hostname: Arc<str>,
    actions: Arc<dyn SessionActions>,
    sessions: Arc<dyn SessionRegistry>,
    volumes: Arc<dyn VolumeRegistry>,
    pools: Arc<dyn PoolRegistry>,
    state_timeout: Duration,
}

impl ActionHandler {
    pub fn new(
        hostname: &str,
        actions: Arc<dyn SessionActions>,
        sessions: Arc<dyn SessionRegistry>,
        volumes: Arc<dyn VolumeRegistry>,
        pools: Arc<dyn PoolRegistry>,
        state_timeout: Duration,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            actions,
            sessions,
            volumes,
            pools,
            state_timeout,
        }
    }

    /// Handle action requests addressed to this host until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ServiceError> {
        let mut requests = self
            .actions
            .watch_action_requests(&self.hostname, cancel.clone())
            .await?;
        tracing::info!(host = %self.hostname, "listening for session actions");

        while let Some(event) = requests.next().await {
            let WatchEvent::Created(request) = event else {
                continue;
            };
            let handler = self.clone();
            tokio::spawn(async move { handler.handle(request).await });
        }
        Ok(())
    }

    pub async fn handle(&self, request: SessionActionRequest) {
        let name = request.session.name.clone();
        tracing::info!(session = %name, action = ?request.kind, id = %request.id, "handling action");

        let outcome = match request.kind {
            SessionActionKind::CreateFilesystem => self.create_filesystem(&name).await,
            SessionActionKind::Delete => self.delete(&name).await,
        };
        let result = match outcome {
            Ok(()) => SessionAction::success(request.kind, &name),
            Err(e) => {
                tracing::warn!(session = %name, action = ?request.kind, "action failed: {e}");
                SessionAction::failure(request.kind, &name, e.to_string())
            }
        };

        if let Err(e) = self.actions.complete_action(&request, result).await {
            tracing::error!(session = %name, action = ?request.kind, "unable to report action result: {e}");
        }
    }

    async fn create_filesystem(&self, name: &str) -> Result<(), ServiceError> {
        let volume = self.volumes.volume(name).await?;
        if !volume.has_bricks() {
            return Ok(());
        }
        self.await_state(name, VolumeState::BricksProvisioned).await
    }

    async fn delete(&self, name: &str) -> Result<(), ServiceError> {
        let volume = match self.volumes.volume(name).await {
            Ok(volume) => volume,
            Err(e) if e.is(RegistryErrorKind::NotFound) => {
                tracing::info!(session = %name, "session already gone");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if volume.has_bricks() {
            match volume.state {
                VolumeState::Error => {
                    return Err(ServiceError::ActionFailed(format!(
                        "unable to delete session {name} in error state: {}",
                        volume.status.error
                    )));
                }
                VolumeState::BricksDeleted => {}
                _ => {
                    self.volumes
                        .update_state(name, VolumeState::DeleteRequested)
                        .await?;
                    self.await_state(name, VolumeState::BricksDeleted).await?;
                }
            }
            self.pools.deallocate_bricks(name).await?;
        }

        self.sessions.delete_session(name).await?;
        tracing::info!(session = %name, "session deleted");
        Ok(())
    }

    async fn await_state(&self, name: &str, state: VolumeState) -> Result<(), ServiceError> {
        let reached = self
            .volumes
            .wait_for_state(name, state, self.state_timeout)
            .await?;
        if reached.state == VolumeState::Error {
            return Err(ServiceError::ActionFailed(reached.status.error));
        }
        Ok(())
    }
}
