// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

use dacc_contracts::{RegistryError, RegistryErrorKind};

/// Why the allocator could not pick bricks
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("pool ({pool}) has no granularity to size bricks by")]
    InvalidGranularity { pool: String },

    #[error("unable to get number of requested bricks ({requested_bricks}) for given pool ({pool})")]
    InsufficientCapacity {
        pool: String,
        requested_bricks: u64,
        available_bricks: usize,
    },
}

impl AllocationError {
    pub fn for_session(self, session: &str) -> ServiceError {
        let session = session.to_string();
        match self {
            Self::InvalidGranularity { pool } => ServiceError::InvalidGranularity { session, pool },
            Self::InsufficientCapacity {
                pool,
                requested_bricks,
                available_bricks,
            } => ServiceError::InsufficientCapacity {
                session,
                pool,
                requested_bricks,
                available_bricks,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error(
        "can't allocate for session: {session} due to unable to get number of requested bricks ({requested_bricks}) for given pool ({pool})"
    )]
    InsufficientCapacity {
        session: String,
        pool: String,
        requested_bricks: u64,
        available_bricks: usize,
    },

    #[error("can't allocate for session: {session} due to pool ({pool}) has no granularity")]
    InvalidGranularity { session: String, pool: String },

    #[error("{0}")]
    LockTimeout(String),

    #[error("{0}")]
    Cancelled(String),

    /// Error text reported by the provider, unchanged
    #[error("{0}")]
    ActionFailed(String),

    #[error("no result received for action on session: {session}")]
    NoActionResult { session: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Registry(RegistryError),
}

impl From<RegistryError> for ServiceError {
    fn from(err: RegistryError) -> Self {
        match err.kind {
            RegistryErrorKind::NotFound => Self::NotFound(err.message),
            RegistryErrorKind::AlreadyExists => Self::AlreadyExists(err.message),
            RegistryErrorKind::Timeout => Self::LockTimeout(err.message),
            RegistryErrorKind::Cancelled => Self::Cancelled(err.message),
            RegistryErrorKind::Unavailable => Self::StoreUnavailable(err.message),
            RegistryErrorKind::InvalidInput => Self::InvalidArgument(err.message),
            _ => Self::Registry(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_capacity_names_session_pool_and_count() {
        let err = AllocationError::InsufficientCapacity {
            pool: "pool1".to_string(),
            requested_bricks: 2,
            available_bricks: 1,
        }
        .for_session("foo");
        assert_eq!(
            err.to_string(),
            "can't allocate for session: foo due to unable to get number of requested bricks (2) for given pool (pool1)"
        );
    }

    #[test]
    fn action_failures_display_provider_text() {
        assert_eq!(ServiceError::ActionFailed("fake".to_string()).to_string(), "fake");
    }

    #[test]
    fn registry_kinds_map_onto_service_errors() {
        let err: ServiceError = RegistryError::not_found("unable to find pool: p").into();
        assert!(matches!(err, ServiceError::NotFound(ref m) if m == "unable to find pool: p"));

        let err: ServiceError = RegistryError::unavailable("etcd down").into();
        assert!(matches!(err, ServiceError::StoreUnavailable(_)));

        let err: ServiceError = RegistryError::conflict("lost race").into();
        assert!(matches!(err, ServiceError::Registry(_)));
    }
}
