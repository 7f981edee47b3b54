// SPDX-License-Identifier: GPL-3.0-only

//! Registry layer
//!
//! Typed pools, sessions, brick allocations, locks and actions stored in a
//! [`Keystore`]. Two keystores are provided: [`MemoryKeystore`] for a single
//! process and tests, and `EtcdKeystore` behind the `etcd` feature.

pub mod actions;
pub mod codec;
#[cfg(feature = "etcd")]
pub mod etcd;
pub mod keys;
pub mod memory;
pub mod mutex;
pub mod pool;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use dacc_contracts::{Keystore, PoolRegistry, SessionActions, SessionRegistry, VolumeRegistry};

pub use actions::KeystoreSessionActions;
#[cfg(feature = "etcd")]
pub use etcd::EtcdKeystore;
pub use memory::MemoryKeystore;
pub use mutex::KeystoreMutex;
pub use pool::KeystorePoolRegistry;
pub use session::KeystoreSessionRegistry;

#[derive(Debug, Clone, Copy)]
pub struct RegistryOptions {
    /// TTL of the host liveness record
    pub keepalive_ttl: Duration,
    /// TTL of a lock whose holder stopped renewing it
    pub lock_ttl: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            keepalive_ttl: Duration::from_secs(10),
            lock_ttl: Duration::from_secs(30),
        }
    }
}

pub struct Registries {
    pub pools: Arc<dyn PoolRegistry>,
    pub sessions: Arc<dyn SessionRegistry>,
    pub volumes: Arc<dyn VolumeRegistry>,
    pub actions: Arc<dyn SessionActions>,
}

pub fn build_registries(keystore: Arc<dyn Keystore>, options: RegistryOptions) -> Registries {
    let sessions = Arc::new(KeystoreSessionRegistry::new(
        keystore.clone(),
        options.lock_ttl,
    ));

    Registries {
        pools: Arc::new(KeystorePoolRegistry::new(
            keystore.clone(),
            options.keepalive_ttl,
            options.lock_ttl,
        )),
        sessions: sessions.clone(),
        volumes: sessions,
        actions: Arc::new(KeystoreSessionActions::new(keystore)),
    }
}
