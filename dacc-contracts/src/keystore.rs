// SPDX-License-Identifier: GPL-3.0-only

//! The key-value store the registry is built on
//!
//! Implementations must be linearizable: every successful mutation gets a
//! revision from a single increasing counter, and watchers observe changes to
//! a key in revision order.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::RegistryError;

pub type Revision = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(pub i64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    pub create_revision: Revision,
    pub mod_revision: Revision,
    pub lease: Option<LeaseId>,
}

/// A single change to a watched key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEvent {
    Created(KeyValue),
    Updated { old: KeyValue, new: KeyValue },
    Deleted(KeyValue),
}

impl KeyEvent {
    pub fn key(&self) -> &str {
        match self {
            Self::Created(kv) | Self::Deleted(kv) => &kv.key,
            Self::Updated { new, .. } => &new.key,
        }
    }
}

pub type KeyEventStream = Pin<Box<dyn Stream<Item = KeyEvent> + Send>>;

#[async_trait]
pub trait Keystore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, RegistryError>;

    /// All keys starting with `prefix`, in key order
    async fn get_all(&self, prefix: &str) -> Result<Vec<KeyValue>, RegistryError>;

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<KeyValue, RegistryError>;

    /// Insert only if the key is absent, otherwise `AlreadyExists`
    async fn atomic_add(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<KeyValue, RegistryError>;

    /// Replace the value only if it was last modified at `mod_revision`,
    /// otherwise `Conflict` (or `NotFound` once the key is gone)
    async fn compare_and_put(
        &self,
        key: &str,
        value: Vec<u8>,
        mod_revision: Revision,
    ) -> Result<KeyValue, RegistryError>;

    /// Returns whether a key was removed
    async fn delete(&self, key: &str) -> Result<bool, RegistryError>;

    async fn compare_and_delete(
        &self,
        key: &str,
        mod_revision: Revision,
    ) -> Result<(), RegistryError>;

    /// Keys attached to a lease are deleted when it expires or is revoked
    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, RegistryError>;

    /// `NotFound` once the lease has expired
    async fn keep_alive(&self, lease: LeaseId) -> Result<(), RegistryError>;

    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), RegistryError>;

    /// Stream every change to `key` (or every key under it when `prefix`)
    /// made after the call returns, until `cancel` fires
    async fn watch(
        &self,
        key: &str,
        prefix: bool,
        cancel: CancellationToken,
    ) -> Result<KeyEventStream, RegistryError>;
}
