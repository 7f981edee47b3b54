// SPDX-License-Identifier: GPL-3.0-only

//! Session create and delete
//!
//! Lock order is always session mutex, then allocation mutex. The allocation
//! mutex only covers choosing and reserving bricks; it is released before
//! the provisioning action is dispatched so slow hosts never stall other
//! allocations.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use dacc_contracts::{PoolRegistry, RegistryErrorKind, SessionActions, SessionRegistry};
use dacc_types::{Session, SessionActionKind};

use crate::allocator::{BrickAllocator, informational_primary_host};
use crate::error::ServiceError;
use crate::locking::with_lock;

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// How long to wait for a session or allocation lock
    pub lock: Duration,
    /// How long to wait for a dispatched action's result
    pub action: Duration,
    /// How long a phase command waits for its completion state
    pub state: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            lock: Duration::from_secs(600),
            action: Duration::from_secs(600),
            state: Duration::from_secs(600),
        }
    }
}

pub struct SessionFacade {
    sessions: Arc<dyn SessionRegistry>,
    pools: Arc<dyn PoolRegistry>,
    actions: Arc<dyn SessionActions>,
    allocator: Arc<BrickAllocator>,
    timeouts: Timeouts,
}

impl SessionFacade {
    pub fn new(
        sessions: Arc<dyn SessionRegistry>,
        pools: Arc<dyn PoolRegistry>,
        actions: Arc<dyn SessionActions>,
        allocator: Arc<BrickAllocator>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            sessions,
            pools,
            actions,
            allocator,
            timeouts,
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Allocate bricks for `initial`, persist it, and wait for its host to
    /// provision it
    pub async fn create_session(
        &self,
        initial: Session,
        cancel: &CancellationToken,
    ) -> Result<Session, ServiceError> {
        self.pools.get_pool(&initial.volume_request.pool_name).await?;

        let mutex = self.sessions.session_mutex(&initial.name)?;
        with_lock(
            mutex.as_ref(),
            self.timeouts.lock,
            cancel,
            self.create_locked(initial, cancel),
        )
        .await
    }

    async fn create_locked(
        &self,
        mut session: Session,
        cancel: &CancellationToken,
    ) -> Result<Session, ServiceError> {
        match self.sessions.get_session(&session.name).await {
            Ok(_) => {
                return Err(ServiceError::AlreadyExists(format!(
                    "session already exists: {}",
                    session.name
                )));
            }
            Err(e) if e.is(RegistryErrorKind::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        if session.volume_request.total_capacity_bytes == 0 {
            let pool_infos = self.pools.get_all_pool_infos().await?;
            if let Some(host) =
                informational_primary_host(&pool_infos, &session.volume_request.pool_name)
            {
                session.primary_brick_host = host;
            }
        } else {
            let mutex = self.pools.allocation_mutex()?;
            with_lock(
                mutex.as_ref(),
                self.timeouts.lock,
                cancel,
                self.reserve_bricks(&mut session),
            )
            .await?;
        }

        let created = match self.sessions.create_session(&session).await {
            Ok(created) => created,
            Err(e) => {
                if session.has_bricks() {
                    self.release_reservation(&session.name).await;
                }
                return Err(e.into());
            }
        };

        if created.primary_brick_host.is_empty() {
            tracing::info!(session = %created.name, "no host to provision session, skipping action");
            return Ok(created);
        }
        self.run_action(SessionActionKind::CreateFilesystem, &created, cancel)
            .await?;
        Ok(created)
    }

    async fn reserve_bricks(&self, session: &mut Session) -> Result<(), ServiceError> {
        let request = &session.volume_request;
        let pool_info = self.pools.get_pool_info(&request.pool_name).await?;
        let allocation = self
            .allocator
            .allocate(&pool_info, request.total_capacity_bytes)
            .map_err(|e| e.for_session(&session.name))?;

        self.pools
            .allocate_bricks(&session.name, &request.pool_name, &allocation.bricks)
            .await?;

        tracing::info!(
            session = %session.name,
            pool = %request.pool_name,
            bricks = allocation.bricks.len(),
            actual_size_bytes = allocation.actual_size_bytes,
            primary = %allocation.primary_brick_host,
            "bricks reserved"
        );
        session.allocated_bricks = allocation.bricks;
        session.actual_size_bytes = allocation.actual_size_bytes;
        session.primary_brick_host = allocation.primary_brick_host;
        Ok(())
    }

    async fn release_reservation(&self, name: &str) {
        let allocations = match self.pools.get_allocations_for_volume(name).await {
            Ok(allocations) => allocations,
            Err(e) => {
                tracing::warn!(session = %name, "unable to list reserved bricks for rollback: {e}");
                return;
            }
        };
        for allocation in allocations {
            if let Err(e) = self.pools.remove_allocation(&allocation).await {
                tracing::warn!(session = %name, brick = %allocation.brick(), "unable to roll back brick: {e}");
            }
        }
    }

    /// Flag `name` for deletion and wait for its host to tear it down
    pub async fn delete_session(
        &self,
        name: &str,
        hurry: bool,
        cancel: &CancellationToken,
    ) -> Result<(), ServiceError> {
        let mutex = self.sessions.session_mutex(name)?;
        with_lock(
            mutex.as_ref(),
            self.timeouts.lock,
            cancel,
            self.delete_locked(name, hurry, cancel),
        )
        .await
    }

    async fn delete_locked(
        &self,
        name: &str,
        hurry: bool,
        cancel: &CancellationToken,
    ) -> Result<(), ServiceError> {
        let updated = self.sessions.request_delete(name, hurry).await?;

        if updated.primary_brick_host.is_empty() {
            self.sessions.delete_session(name).await?;
            return Ok(());
        }
        self.run_action(SessionActionKind::Delete, &updated, cancel)
            .await
    }

    async fn run_action(
        &self,
        kind: SessionActionKind,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<(), ServiceError> {
        let result = self.actions.send_session_action(kind, session).await?;

        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ServiceError::Cancelled(format!(
                    "cancelled waiting for {kind:?} on session: {}",
                    session.name
                )));
            }
            received = tokio::time::timeout(self.timeouts.action, result) => received,
        };

        match received {
            Err(_) => Err(ServiceError::LockTimeout(format!(
                "timed out waiting for {kind:?} on session: {}",
                session.name
            ))),
            Ok(Err(_)) => Err(ServiceError::NoActionResult {
                session: session.name.clone(),
            }),
            Ok(Ok(action)) if action.is_success() => {
                tracing::info!(session = %session.name, action = ?kind, "action succeeded");
                Ok(())
            }
            Ok(Ok(action)) => {
                tracing::warn!(session = %session.name, action = ?kind, error = %action.error, "action failed");
                Err(ServiceError::ActionFailed(action.error))
            }
        }
    }
}
