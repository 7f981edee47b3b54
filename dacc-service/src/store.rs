// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;

use anyhow::Result;

use dacc_contracts::Keystore;
use dacc_registry::MemoryKeystore;

use crate::config::{StoreBackend, StoreConfig};

/// Open the keystore selected by `config`
pub async fn connect_keystore(config: &StoreConfig) -> Result<Arc<dyn Keystore>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store, state is local to this process");
            Ok(Arc::new(MemoryKeystore::new()))
        }
        StoreBackend::Etcd => connect_etcd(&config.etcd_endpoints).await,
    }
}

/// Open a keystore other processes can see. Commands that hand work to host
/// daemons are useless against a store only they can read.
pub async fn connect_shared_keystore(config: &StoreConfig) -> Result<Arc<dyn Keystore>> {
    if config.backend == StoreBackend::Memory {
        anyhow::bail!(
            "the in-memory store is not shared with the host daemons, \
             set DACC_ETCD_ENDPOINTS or `store.backend = \"etcd\"`"
        );
    }
    connect_keystore(config).await
}

#[cfg(feature = "etcd")]
async fn connect_etcd(endpoints: &[String]) -> Result<Arc<dyn Keystore>> {
    let keystore = dacc_registry::EtcdKeystore::connect(endpoints).await?;
    tracing::info!(endpoints = ?endpoints, "connected to etcd");
    Ok(Arc::new(keystore))
}

#[cfg(not(feature = "etcd"))]
async fn connect_etcd(_endpoints: &[String]) -> Result<Arc<dyn Keystore>> {
    anyhow::bail!("etcd store selected but this build lacks the `etcd` feature")
}
