// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use dacc_contracts::{
    Mounter, Provider, RegistryError, RegistryErrorKind, VolumeProvider, VolumeRegistry, WatchEvent,
};
use dacc_types::{Configuration, Volume, VolumeState};

/// Provider work a host performs for one observed state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Provision,
    DataIn,
    Mount,
    Unmount,
    DataOut,
    Delete,
}

impl Transition {
    pub fn success_state(self) -> VolumeState {
        match self {
            Self::Provision => VolumeState::BricksProvisioned,
            Self::DataIn => VolumeState::DataInComplete,
            Self::Mount => VolumeState::MountComplete,
            Self::Unmount => VolumeState::UnmountComplete,
            Self::DataOut => VolumeState::DataOutComplete,
            Self::Delete => VolumeState::BricksDeleted,
        }
    }
}

pub fn transition_for(state: VolumeState) -> Option<Transition> {
    match state {
        VolumeState::Registered => Some(Transition::Provision),
        VolumeState::DataInRequested => Some(Transition::DataIn),
        VolumeState::MountRequested => Some(Transition::Mount),
        VolumeState::UnmountRequested => Some(Transition::Unmount),
        VolumeState::DataOutRequested => Some(Transition::DataOut),
        VolumeState::DeleteRequested => Some(Transition::Delete),
        _ => None,
    }
}

/// Drives one volume whose primary brick lives on this host
pub struct VolumeStateMachine {
    name: String,
    hostname: String,
    volumes: Arc<dyn VolumeRegistry>,
    provider: Arc<dyn Provider>,
    /// State this machine last wrote; events are stale until it comes back
    awaiting_echo: Option<VolumeState>,
    provisioned: bool,
}

impl VolumeStateMachine {
    pub fn new(
        name: impl Into<String>,
        hostname: impl Into<String>,
        volumes: Arc<dyn VolumeRegistry>,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            name: name.into(),
            hostname: hostname.into(),
            volumes,
            provider,
            awaiting_echo: None,
            provisioned: false,
        }
    }

    /// Run until the volume reaches a terminal state, is deleted, or `cancel`
    /// fires. Returns the terminal state if one was reached.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
    ) -> Result<Option<VolumeState>, RegistryError> {
        // watch first: the record may be written after the brick is reserved
        let mut events = self
            .volumes
            .watch_volume_changes(&self.name, cancel)
            .await?;

        match self.volumes.volume(&self.name).await {
            Ok(volume) => {
                tracing::info!(session = %self.name, state = ?volume.state, "found volume to drive");
                if let Some(done) = self.handle(&volume).await {
                    return Ok(Some(done));
                }
            }
            Err(e) if e.is(RegistryErrorKind::NotFound) => {
                tracing::debug!(session = %self.name, "waiting for session record");
            }
            Err(e) => return Err(e),
        }

        while let Some(event) = events.next().await {
            match event {
                WatchEvent::Deleted(_) => {
                    tracing::info!(session = %self.name, "volume deleted, stopping watch");
                    return Ok(None);
                }
                WatchEvent::Created(volume) => {
                    if let Some(done) = self.observe(None, &volume).await {
                        return Ok(Some(done));
                    }
                }
                WatchEvent::Updated { old, new } => {
                    if let Some(done) = self.observe(Some(&old), &new).await {
                        return Ok(Some(done));
                    }
                }
            }
        }
        Ok(None)
    }

    async fn observe(&mut self, old: Option<&Volume>, new: &Volume) -> Option<VolumeState> {
        // writes queued before our own were read before we acted
        if let Some(expected) = self.awaiting_echo {
            if new.state == expected {
                self.awaiting_echo = None;
            }
            return None;
        }
        // only state changes matter, other fields are touched freely
        if old.is_some_and(|old| old.state == new.state) {
            return None;
        }
        self.handle(new).await
    }

    async fn handle(&mut self, volume: &Volume) -> Option<VolumeState> {
        if volume.state.is_terminal() {
            tracing::info!(session = %self.name, state = ?volume.state, "volume reached terminal state");
            return Some(volume.state);
        }

        let transition = match transition_for(volume.state) {
            Some(Transition::Provision) if self.provisioned => None,
            Some(transition) => Some(transition),
            None => {
                tracing::debug!(session = %self.name, state = ?volume.state, "ignoring state");
                None
            }
        }?;
        if transition == Transition::Provision {
            self.provisioned = true;
        }

        let reached = self.apply(transition, volume).await;
        if reached.is_terminal() {
            return Some(reached);
        }
        self.awaiting_echo = Some(reached);
        None
    }

    async fn apply(&self, transition: Transition, volume: &Volume) -> VolumeState {
        tracing::info!(session = %self.name, host = %self.hostname, transition = ?transition, "running provider");
        let outcome = match transition {
            Transition::Provision => self.provider.setup_volume(volume).await,
            Transition::DataIn => self.provider.copy_data_in(volume).await,
            Transition::DataOut => self.provider.copy_data_out(volume).await,
            Transition::Delete => self.provider.teardown_volume(volume).await,
            Transition::Mount | Transition::Unmount => self.mount_all(transition, volume).await,
        };

        let target = match outcome {
            Ok(()) => transition.success_state(),
            Err(message) => {
                tracing::error!(session = %self.name, transition = ?transition, error = %message, "provider failed");
                return self.fail(&message).await;
            }
        };

        match self.volumes.update_state(&self.name, target).await {
            Ok(_) => target,
            Err(e) => {
                tracing::error!(session = %self.name, state = ?target, "unable to record state: {e}");
                self.fail(&format!("unable to record state {target}: {e}"))
                    .await
            }
        }
    }

    async fn mount_all(&self, transition: Transition, volume: &Volume) -> Result<(), String> {
        let configuration = Configuration::for_session(volume);
        for host in volume.attach_hosts() {
            if transition == Transition::Mount {
                self.provider.mount(volume, &configuration, &host).await?;
            } else {
                self.provider.unmount(volume, &configuration, &host).await?;
            }
        }
        Ok(())
    }

    async fn fail(&self, message: &str) -> VolumeState {
        if let Err(e) = self.volumes.record_error(&self.name, message).await {
            tracing::error!(session = %self.name, host = %self.hostname, "unable to move volume to error: {e}");
        }
        VolumeState::Error
    }
}
