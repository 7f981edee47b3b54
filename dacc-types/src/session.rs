// SPDX-License-Identifier: GPL-3.0-only

//! Session (volume) types
//!
//! A session is the buffer itself. The scheduler integration calls it a
//! session, the hosts that provision it call it a volume; both names refer
//! to the same persisted entity.

use serde::{Deserialize, Serialize};

use crate::brick::Brick;

/// Lifecycle state of a volume
///
/// `*Requested` states are written by the scheduler integration, the paired
/// `*Complete` states by the host holding the primary brick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeState {
    #[default]
    Registered,
    BricksProvisioned,
    DataInRequested,
    DataInComplete,
    MountRequested,
    MountComplete,
    UnmountRequested,
    UnmountComplete,
    DataOutRequested,
    DataOutComplete,
    DeleteRequested,
    BricksDeleted,
    Error,
}

impl VolumeState {
    /// The state a host moves to after handling this requested state
    pub fn completion(self) -> Option<VolumeState> {
        match self {
            Self::Registered => Some(Self::BricksProvisioned),
            Self::DataInRequested => Some(Self::DataInComplete),
            Self::MountRequested => Some(Self::MountComplete),
            Self::UnmountRequested => Some(Self::UnmountComplete),
            Self::DataOutRequested => Some(Self::DataOutComplete),
            Self::DeleteRequested => Some(Self::BricksDeleted),
            _ => None,
        }
    }

    /// No host drives a volume out of these states
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::BricksDeleted | Self::Error)
    }
}

impl std::fmt::Display for VolumeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// What the job asked for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRequest {
    pub pool_name: String,
    pub total_capacity_bytes: u64,

    /// Access mode from the job script (e.g., "striped")
    #[serde(default)]
    pub access: String,

    /// Buffer type from the job script (e.g., "scratch")
    #[serde(default)]
    pub buffer_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    #[serde(default)]
    pub delete_requested: bool,

    /// Teardown was requested with `--hurry`
    #[serde(default)]
    pub delete_skip_copy_data_out: bool,

    /// Last provisioning error, set together with `VolumeState::Error`
    #[serde(default)]
    pub error: String,
}

/// A provisioned buffer instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Job id or persistent buffer name, unique across the cluster
    pub name: String,

    #[serde(default)]
    pub state: VolumeState,

    pub volume_request: VolumeRequest,

    /// Granted size: allocated bricks times pool granularity
    #[serde(default)]
    pub actual_size_bytes: u64,

    /// Allocated bricks, the first entry is the primary brick
    #[serde(default)]
    pub allocated_bricks: Vec<Brick>,

    /// Host of the primary brick; informational only for zero brick sessions
    #[serde(default)]
    pub primary_brick_host: String,

    #[serde(default)]
    pub status: SessionStatus,

    #[serde(default)]
    pub owner: u32,

    #[serde(default)]
    pub group: u32,

    /// System that created the session (e.g., "SLURM")
    #[serde(default)]
    pub caller: String,

    /// Path of the job script the session was created for
    #[serde(default)]
    pub job_file: String,

    #[serde(default)]
    pub is_persistent: bool,

    /// Compute hosts the buffer is attached to
    #[serde(default)]
    pub attachments: Vec<String>,

    /// Unix timestamp of creation
    #[serde(default)]
    pub created_at: i64,
}

/// The host side of the data model refers to sessions as volumes
pub type Volume = Session;

impl Session {
    pub fn new(name: impl Into<String>, volume_request: VolumeRequest) -> Self {
        Self {
            name: name.into(),
            volume_request,
            created_at: chrono::Utc::now().timestamp(),
            ..Default::default()
        }
    }

    /// Attach-only sessions are allocated no bricks and skip host phases
    pub fn has_bricks(&self) -> bool {
        !self.allocated_bricks.is_empty()
    }

    /// Hosts that mount and unmount the buffer
    pub fn attach_hosts(&self) -> Vec<String> {
        if self.attachments.is_empty() {
            vec![self.primary_brick_host.clone()]
        } else {
            self.attachments.clone()
        }
    }
}

/// Mount configuration handed to the provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    pub mount_path: String,
}

impl Configuration {
    pub const MOUNT_ROOT: &'static str = "/dac";

    pub fn for_session(session: &Session) -> Self {
        Self {
            name: session.name.clone(),
            mount_path: format!("{}/{}", Self::MOUNT_ROOT, session.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_states_pair_with_completions() {
        assert_eq!(
            VolumeState::DataInRequested.completion(),
            Some(VolumeState::DataInComplete)
        );
        assert_eq!(
            VolumeState::DeleteRequested.completion(),
            Some(VolumeState::BricksDeleted)
        );
        assert_eq!(VolumeState::MountComplete.completion(), None);
        assert_eq!(VolumeState::Error.completion(), None);
    }

    #[test]
    fn volume_state_serializes_snake_case() {
        let json = serde_json::to_string(&VolumeState::DataOutRequested).expect("serialize");
        assert_eq!(json, "\"data_out_requested\"");
    }

    #[test]
    fn attach_hosts_fall_back_to_primary_host() {
        let mut session = Session::new("job1", VolumeRequest::default());
        session.primary_brick_host = "host1".to_string();
        assert_eq!(session.attach_hosts(), vec!["host1".to_string()]);

        session.attachments = vec!["cpu1".to_string(), "cpu2".to_string()];
        assert_eq!(session.attach_hosts().len(), 2);
    }

    #[test]
    fn older_records_without_optional_fields_still_parse() {
        let json = r#"{"name":"job1","volume_request":{"pool_name":"pool1","total_capacity_bytes":1024}}"#;
        let session: Session = serde_json::from_str(json).expect("deserialize");
        assert_eq!(session.state, VolumeState::Registered);
        assert!(session.allocated_bricks.is_empty());
    }
}
