// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use dacc_contracts::{
    Keystore, Mutex, RegistryError, RegistryErrorKind, SessionRegistry, VolumeRegistry,
    WatchEvent, WatchStream,
};
use dacc_types::{Session, Volume, VolumeState};

use crate::codec::{decode, encode, typed_events};
use crate::keys;
use crate::mutex::KeystoreMutex;

/// Sessions and volumes are the same records seen from two sides
#[derive(Clone)]
pub struct KeystoreSessionRegistry {
    keystore: Arc<dyn Keystore>,
    lock_ttl: Duration,
}

fn session_not_found(name: &str) -> RegistryError {
    RegistryError::not_found(format!("unable to find session: {name}"))
}

impl KeystoreSessionRegistry {
    pub fn new(keystore: Arc<dyn Keystore>, lock_ttl: Duration) -> Self {
        Self { keystore, lock_ttl }
    }

    /// Read-modify-write with compare-and-put, retried until no other writer
    /// slipped in between
    async fn modify<F>(&self, name: &str, change: F) -> Result<Session, RegistryError>
    where
        F: Fn(&mut Session) + Send + Sync,
    {
        let key = keys::session(name);
        loop {
            let kv = self
                .keystore
                .get(&key)
                .await?
                .ok_or_else(|| session_not_found(name))?;
            let mut session: Session = decode(&kv)?;
            change(&mut session);

            match self
                .keystore
                .compare_and_put(&key, encode(&session)?, kv.mod_revision)
                .await
            {
                Ok(_) => return Ok(session),
                Err(e) if e.is(RegistryErrorKind::Conflict) => {
                    tracing::debug!(session = %name, "concurrent update, retrying");
                }
                Err(e) if e.is(RegistryErrorKind::NotFound) => return Err(session_not_found(name)),
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl SessionRegistry for KeystoreSessionRegistry {
    async fn create_session(&self, session: &Session) -> Result<Session, RegistryError> {
        keys::check_segment("session name", &session.name)?;
        match self
            .keystore
            .atomic_add(&keys::session(&session.name), encode(session)?, None)
            .await
        {
            Ok(_) => {
                tracing::info!(session = %session.name, "session created");
                Ok(session.clone())
            }
            Err(e) if e.is(RegistryErrorKind::AlreadyExists) => Err(
                RegistryError::already_exists(format!("session already exists: {}", session.name)),
            ),
            Err(e) => Err(e),
        }
    }

    async fn get_session(&self, name: &str) -> Result<Session, RegistryError> {
        let kv = self
            .keystore
            .get(&keys::session(name))
            .await?
            .ok_or_else(|| session_not_found(name))?;
        decode(&kv)
    }

    async fn request_delete(&self, name: &str, hurry: bool) -> Result<Session, RegistryError> {
        let session = self
            .modify(name, |session| {
                session.status.delete_requested = true;
                if hurry {
                    session.status.delete_skip_copy_data_out = true;
                }
            })
            .await?;
        tracing::info!(session = %name, hurry, "delete requested");
        Ok(session)
    }

    async fn delete_session(&self, name: &str) -> Result<(), RegistryError> {
        if self.keystore.delete(&keys::session(name)).await? {
            tracing::info!(session = %name, "session deleted");
            Ok(())
        } else {
            Err(session_not_found(name))
        }
    }

    async fn all_sessions(&self) -> Result<Vec<Session>, RegistryError> {
        self.keystore
            .get_all(keys::SESSIONS)
            .await?
            .iter()
            .map(decode)
            .collect()
    }

    fn session_mutex(&self, name: &str) -> Result<Box<dyn Mutex>, RegistryError> {
        keys::check_segment("session name", name)?;
        Ok(Box::new(KeystoreMutex::new(
            self.keystore.clone(),
            keys::session_lock(name),
            self.lock_ttl,
        )))
    }
}

#[async_trait]
impl VolumeRegistry for KeystoreSessionRegistry {
    async fn volume(&self, name: &str) -> Result<Volume, RegistryError> {
        self.get_session(name).await
    }

    async fn update_state(&self, name: &str, state: VolumeState) -> Result<Volume, RegistryError> {
        let volume = self.modify(name, |volume| volume.state = state).await?;
        tracing::info!(session = %name, state = ?state, "volume state updated");
        Ok(volume)
    }

    async fn record_error(&self, name: &str, message: &str) -> Result<Volume, RegistryError> {
        let volume = self
            .modify(name, |volume| {
                volume.state = VolumeState::Error;
                volume.status.error = message.to_string();
            })
            .await?;
        tracing::warn!(session = %name, error = %message, "volume moved to error");
        Ok(volume)
    }

    async fn update_attachments(
        &self,
        name: &str,
        hosts: &[String],
    ) -> Result<Volume, RegistryError> {
        self.modify(name, |volume| volume.attachments = hosts.to_vec())
            .await
    }

    async fn watch_volume_changes(
        &self,
        name: &str,
        cancel: CancellationToken,
    ) -> Result<WatchStream<Volume>, RegistryError> {
        let events = self
            .keystore
            .watch(&keys::session(name), false, cancel)
            .await?;
        Ok(typed_events(events))
    }

    async fn wait_for_state(
        &self,
        name: &str,
        state: VolumeState,
        timeout: Duration,
    ) -> Result<Volume, RegistryError> {
        let cancel = CancellationToken::new();
        let _stop_watch = cancel.clone().drop_guard();
        let reached = |volume: &Volume| volume.state == state || volume.state == VolumeState::Error;

        let wait = async {
            let mut events = self.watch_volume_changes(name, cancel.clone()).await?;
            let current = self.volume(name).await?;
            if reached(&current) {
                return Ok(current);
            }
            while let Some(event) = events.next().await {
                match event {
                    WatchEvent::Deleted(_) => {
                        return Err(RegistryError::not_found(format!(
                            "session {name} deleted while waiting for {state}"
                        )));
                    }
                    WatchEvent::Created(volume) | WatchEvent::Updated { new: volume, .. } => {
                        if reached(&volume) {
                            return Ok(volume);
                        }
                    }
                }
            }
            Err(RegistryError::new(
                RegistryErrorKind::Cancelled,
                format!("watch on session {name} ended"),
            ))
        };

        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            RegistryError::new(
                RegistryErrorKind::Timeout,
                format!("timed out waiting for session {name} to reach {state}"),
            )
        })?
    }
}
