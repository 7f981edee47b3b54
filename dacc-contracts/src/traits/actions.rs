// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use dacc_types::{Session, SessionAction, SessionActionKind, SessionActionRequest};

use crate::{RegistryError, WatchStream};

/// Delivers at most one result; closing without one means none arrived
pub type ActionReceiver = oneshot::Receiver<SessionAction>;

#[async_trait]
pub trait SessionActions: Send + Sync {
    /// Hand an action to the host provisioning `session`
    async fn send_session_action(
        &self,
        kind: SessionActionKind,
        session: &Session,
    ) -> Result<ActionReceiver, RegistryError>;

    /// Pending and future requests addressed to `hostname`
    async fn watch_action_requests(
        &self,
        hostname: &str,
        cancel: CancellationToken,
    ) -> Result<WatchStream<SessionActionRequest>, RegistryError>;

    /// Publish the single result for `request` and retire it
    async fn complete_action(
        &self,
        request: &SessionActionRequest,
        result: SessionAction,
    ) -> Result<(), RegistryError>;
}
