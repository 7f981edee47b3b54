// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryErrorKind {
    InvalidInput,
    NotFound,
    AlreadyExists,
    /// Compare-and-swap lost against a concurrent writer
    Conflict,
    /// The keystore could not be reached
    Unavailable,
    Timeout,
    Cancelled,
    Serialization,
    Internal,
}

impl RegistryErrorKind {
    pub fn code(self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::NotFound => 404,
            Self::AlreadyExists => 409,
            Self::Conflict => 409,
            Self::Unavailable => 503,
            Self::Timeout => 504,
            Self::Cancelled => 499,
            Self::Serialization => 422,
            Self::Internal => 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct RegistryError {
    pub kind: RegistryErrorKind,
    pub message: String,
}

impl RegistryError {
    pub fn new(kind: RegistryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RegistryErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(RegistryErrorKind::AlreadyExists, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(RegistryErrorKind::Conflict, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RegistryErrorKind::Unavailable, message)
    }

    pub fn is(&self, kind: RegistryErrorKind) -> bool {
        self.kind == kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_error_roundtrips() {
        let error = RegistryError::already_exists("session already exists: job1");
        let json = serde_json::to_string(&error).expect("serialize error");
        let parsed: RegistryError = serde_json::from_str(&json).expect("deserialize error");
        assert_eq!(parsed, error);
    }

    #[test]
    fn registry_error_kind_http_family_codes_are_stable() {
        assert_eq!(RegistryErrorKind::InvalidInput.code(), 400);
        assert_eq!(RegistryErrorKind::NotFound.code(), 404);
        assert_eq!(RegistryErrorKind::AlreadyExists.code(), 409);
        assert_eq!(RegistryErrorKind::Conflict.code(), 409);
        assert_eq!(RegistryErrorKind::Unavailable.code(), 503);
        assert_eq!(RegistryErrorKind::Internal.code(), 500);
    }

    #[test]
    fn display_includes_kind_and_message() {
        let error = RegistryError::not_found("unable to find pool: pool1");
        assert_eq!(error.to_string(), "NotFound: unable to find pool: pool1");
    }
}
