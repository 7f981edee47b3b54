// SPDX-License-Identifier: GPL-3.0-only

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use dacc_types::{Session, Volume, VolumeState};

use crate::{Mutex, RegistryError, WatchStream};

#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// `AlreadyExists` when the name is taken
    async fn create_session(&self, session: &Session) -> Result<Session, RegistryError>;

    async fn get_session(&self, name: &str) -> Result<Session, RegistryError>;

    /// Mark the session for deletion without touching any other field.
    /// `hurry` also asks the host to skip copying data out.
    async fn request_delete(&self, name: &str, hurry: bool) -> Result<Session, RegistryError>;

    async fn delete_session(&self, name: &str) -> Result<(), RegistryError>;

    async fn all_sessions(&self) -> Result<Vec<Session>, RegistryError>;

    fn session_mutex(&self, name: &str) -> Result<Box<dyn Mutex>, RegistryError>;
}

/// Host side view of sessions
#[async_trait]
pub trait VolumeRegistry: Send + Sync {
    async fn volume(&self, name: &str) -> Result<Volume, RegistryError>;

    async fn update_state(&self, name: &str, state: VolumeState) -> Result<Volume, RegistryError>;

    /// Move to `VolumeState::Error`, recording why
    async fn record_error(&self, name: &str, message: &str) -> Result<Volume, RegistryError>;

    async fn update_attachments(
        &self,
        name: &str,
        hosts: &[String],
    ) -> Result<Volume, RegistryError>;

    async fn watch_volume_changes(
        &self,
        name: &str,
        cancel: CancellationToken,
    ) -> Result<WatchStream<Volume>, RegistryError>;

    /// Resolve once the volume is in `state` or in `VolumeState::Error`
    async fn wait_for_state(
        &self,
        name: &str,
        state: VolumeState,
        timeout: Duration,
    ) -> Result<Volume, RegistryError>;
}
