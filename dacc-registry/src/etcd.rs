// SPDX-License-Identifier: GPL-3.0-only

//! etcd backed keystore

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, EventType, GetOptions, PutOptions, Txn, TxnOp, WatchOptions,
};
use tokio_util::sync::CancellationToken;

use dacc_contracts::{
    KeyEvent, KeyEventStream, KeyValue, Keystore, LeaseId, RegistryError, Revision,
};

#[derive(Clone)]
pub struct EtcdKeystore {
    client: Client,
}

fn store_error(err: etcd_client::Error) -> RegistryError {
    RegistryError::unavailable(err.to_string())
}

fn key_value(kv: &etcd_client::KeyValue) -> KeyValue {
    KeyValue {
        key: String::from_utf8_lossy(kv.key()).into_owned(),
        value: kv.value().to_vec(),
        create_revision: kv.create_revision() as Revision,
        mod_revision: kv.mod_revision() as Revision,
        lease: (kv.lease() != 0).then(|| LeaseId(kv.lease())),
    }
}

fn put_options(lease: Option<LeaseId>) -> Option<PutOptions> {
    lease.map(|id| PutOptions::new().with_lease(id.0))
}

impl EtcdKeystore {
    pub async fn connect(endpoints: &[String]) -> Result<Self, RegistryError> {
        let client = Client::connect(endpoints, None).await.map_err(|e| {
            RegistryError::unavailable(format!(
                "unable to connect to etcd at {}: {e}",
                endpoints.join(", ")
            ))
        })?;
        tracing::info!(endpoints = %endpoints.join(","), "connected to etcd");
        Ok(Self { client })
    }

    /// Written key plus the revision the server assigned to the write
    fn written(
        key: &str,
        value: Vec<u8>,
        revision: i64,
        prev: Option<&etcd_client::KeyValue>,
        lease: Option<LeaseId>,
    ) -> KeyValue {
        let revision = revision as Revision;
        KeyValue {
            key: key.to_string(),
            value,
            create_revision: prev.map_or(revision, |kv| kv.create_revision() as Revision),
            mod_revision: revision,
            lease,
        }
    }

    async fn missing_or_conflict(&self, key: &str, expected: Revision) -> RegistryError {
        match self.get(key).await {
            Ok(None) => RegistryError::not_found(format!("key not found: {key}")),
            Ok(Some(kv)) => RegistryError::conflict(format!(
                "{key} modified at revision {}, expected {expected}",
                kv.mod_revision
            )),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl Keystore for EtcdKeystore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, RegistryError> {
        let mut client = self.client.clone();
        let response = client.get(key, None).await.map_err(store_error)?;
        Ok(response.kvs().first().map(key_value))
    }

    async fn get_all(&self, prefix: &str) -> Result<Vec<KeyValue>, RegistryError> {
        let mut client = self.client.clone();
        let response = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(store_error)?;
        Ok(response.kvs().iter().map(key_value).collect())
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<KeyValue, RegistryError> {
        let mut client = self.client.clone();
        let mut options = PutOptions::new().with_prev_key();
        if let Some(id) = lease {
            options = options.with_lease(id.0);
        }
        let response = client
            .put(key, value.clone(), Some(options))
            .await
            .map_err(store_error)?;
        let revision = response.header().map_or(0, |h| h.revision());
        Ok(Self::written(key, value, revision, response.prev_key(), lease))
    }

    async fn atomic_add(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<KeyValue, RegistryError> {
        let mut client = self.client.clone();
        let txn = Txn::new()
            .when([Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then([TxnOp::put(key, value.clone(), put_options(lease))]);
        let response = client.txn(txn).await.map_err(store_error)?;
        if !response.succeeded() {
            return Err(RegistryError::already_exists(format!(
                "key already exists: {key}"
            )));
        }
        let revision = response.header().map_or(0, |h| h.revision());
        Ok(Self::written(key, value, revision, None, lease))
    }

    async fn compare_and_put(
        &self,
        key: &str,
        value: Vec<u8>,
        mod_revision: Revision,
    ) -> Result<KeyValue, RegistryError> {
        let mut client = self.client.clone();
        let txn = Txn::new()
            .when([Compare::mod_revision(
                key,
                CompareOp::Equal,
                mod_revision as i64,
            )])
            .and_then([TxnOp::put(
                key,
                value.clone(),
                Some(PutOptions::new().with_ignore_lease()),
            )]);
        let response = client.txn(txn).await.map_err(store_error)?;
        if !response.succeeded() {
            return Err(self.missing_or_conflict(key, mod_revision).await);
        }
        // create and lease are unchanged by a compare-and-put
        let current = self.get(key).await?;
        let revision = response.header().map_or(0, |h| h.revision()) as Revision;
        Ok(KeyValue {
            key: key.to_string(),
            value,
            create_revision: current.as_ref().map_or(revision, |kv| kv.create_revision),
            mod_revision: revision,
            lease: current.and_then(|kv| kv.lease),
        })
    }

    async fn delete(&self, key: &str) -> Result<bool, RegistryError> {
        let mut client = self.client.clone();
        let response = client.delete(key, None).await.map_err(store_error)?;
        Ok(response.deleted() > 0)
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        mod_revision: Revision,
    ) -> Result<(), RegistryError> {
        let mut client = self.client.clone();
        let txn = Txn::new()
            .when([Compare::mod_revision(
                key,
                CompareOp::Equal,
                mod_revision as i64,
            )])
            .and_then([TxnOp::delete(key, None)]);
        let response = client.txn(txn).await.map_err(store_error)?;
        if response.succeeded() {
            Ok(())
        } else {
            Err(self.missing_or_conflict(key, mod_revision).await)
        }
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, RegistryError> {
        let mut client = self.client.clone();
        let ttl = ttl.as_secs().max(1) as i64;
        let response = client.lease_grant(ttl, None).await.map_err(store_error)?;
        Ok(LeaseId(response.id()))
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<(), RegistryError> {
        let mut client = self.client.clone();
        let (mut keeper, mut responses) = client
            .lease_keep_alive(lease.0)
            .await
            .map_err(store_error)?;
        keeper.keep_alive().await.map_err(store_error)?;
        match responses.message().await.map_err(store_error)? {
            Some(response) if response.ttl() > 0 => Ok(()),
            _ => Err(RegistryError::not_found(format!(
                "lease not found: {}",
                lease.0
            ))),
        }
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), RegistryError> {
        let mut client = self.client.clone();
        client.lease_revoke(lease.0).await.map_err(store_error)?;
        Ok(())
    }

    async fn watch(
        &self,
        key: &str,
        prefix: bool,
        cancel: CancellationToken,
    ) -> Result<KeyEventStream, RegistryError> {
        let mut client = self.client.clone();
        let mut options = WatchOptions::new().with_prev_key();
        if prefix {
            options = options.with_prefix();
        }
        let (mut watcher, mut stream) = client
            .watch(key, Some(options))
            .await
            .map_err(store_error)?;
        let key = key.to_string();

        Ok(Box::pin(async_stream::stream! {
            loop {
                let message = tokio::select! {
                    _ = cancel.cancelled() => break,
                    message = stream.message() => message,
                };
                let response = match message {
                    Ok(Some(response)) => response,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(key = %key, "etcd watch failed: {e}");
                        break;
                    }
                };
                if response.canceled() {
                    break;
                }
                for event in response.events() {
                    let event = match (event.event_type(), event.prev_kv(), event.kv()) {
                        (EventType::Put, Some(old), Some(new)) => KeyEvent::Updated {
                            old: key_value(old),
                            new: key_value(new),
                        },
                        (EventType::Put, None, Some(new)) => KeyEvent::Created(key_value(new)),
                        (EventType::Delete, Some(old), _) => KeyEvent::Deleted(key_value(old)),
                        (EventType::Delete, None, Some(kv)) => KeyEvent::Deleted(key_value(kv)),
                        _ => continue,
                    };
                    yield event;
                }
            }
            let _ = watcher.cancel().await;
        }))
    }
}
