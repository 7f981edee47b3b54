// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionActionKind {
    CreateFilesystem,
    Delete,
}

/// Request delivered to the host that provisions a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionActionRequest {
    /// Unique per dispatched action, names the result key
    pub id: String,
    pub kind: SessionActionKind,
    pub session: Session,
}

/// Outcome of a dispatched action; an empty `error` means success
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAction {
    pub kind: SessionActionKind,
    pub session: String,
    #[serde(default)]
    pub error: String,
}

impl SessionAction {
    pub fn success(kind: SessionActionKind, session: impl Into<String>) -> Self {
        Self {
            kind,
            session: session.into(),
            error: String::new(),
        }
    }

    pub fn failure(kind: SessionActionKind, session: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            kind,
            session: session.into(),
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}
