// SPDX-License-Identifier: GPL-3.0-only

//! In-process keystore
//!
//! Every mutation happens under one lock and is stamped with the next global
//! revision; watchers are notified before the lock is released, so each
//! watcher sees changes in revision order. Leases expire on a tokio timer and
//! take their keys with them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use dacc_contracts::{
    KeyEvent, KeyEventStream, KeyValue, Keystore, LeaseId, RegistryError, RegistryErrorKind,
    Revision,
};

#[derive(Clone, Default)]
pub struct MemoryKeystore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, KeyValue>,
    revision: Revision,
    next_lease: i64,
    leases: HashMap<LeaseId, Lease>,
    watchers: Vec<Watcher>,
}

struct Lease {
    ttl: Duration,
    deadline: Instant,
    keys: BTreeSet<String>,
}

struct Watcher {
    key: String,
    prefix: bool,
    tx: mpsc::UnboundedSender<KeyEvent>,
}

impl Watcher {
    fn matches(&self, key: &str) -> bool {
        if self.prefix {
            key.starts_with(&self.key)
        } else {
            key == self.key
        }
    }
}

fn lease_not_found(lease: LeaseId) -> RegistryError {
    RegistryError::not_found(format!("lease not found: {}", lease.0))
}

impl Inner {
    fn check_lease(&self, lease: Option<LeaseId>) -> Result<(), RegistryError> {
        match lease {
            Some(id) if !self.leases.contains_key(&id) => Err(lease_not_found(id)),
            _ => Ok(()),
        }
    }

    fn store(&mut self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> KeyValue {
        self.revision += 1;
        let old = self.entries.get(key).cloned();

        if let Some(previous) = old.as_ref().and_then(|kv| kv.lease)
            && Some(previous) != lease
            && let Some(state) = self.leases.get_mut(&previous)
        {
            state.keys.remove(key);
        }
        if let Some(id) = lease
            && let Some(state) = self.leases.get_mut(&id)
        {
            state.keys.insert(key.to_string());
        }

        let kv = KeyValue {
            key: key.to_string(),
            value,
            create_revision: old
                .as_ref()
                .map_or(self.revision, |previous| previous.create_revision),
            mod_revision: self.revision,
            lease,
        };
        self.entries.insert(key.to_string(), kv.clone());

        let event = match old {
            Some(old) => KeyEvent::Updated {
                old,
                new: kv.clone(),
            },
            None => KeyEvent::Created(kv.clone()),
        };
        self.notify(event);
        kv
    }

    fn remove(&mut self, key: &str) -> Option<KeyValue> {
        let old = self.entries.remove(key)?;
        self.revision += 1;
        if let Some(id) = old.lease
            && let Some(state) = self.leases.get_mut(&id)
        {
            state.keys.remove(key);
        }
        self.notify(KeyEvent::Deleted(old.clone()));
        Some(old)
    }

    fn expire(&mut self, lease: LeaseId) {
        if let Some(state) = self.leases.remove(&lease) {
            for key in state.keys {
                self.remove(&key);
            }
        }
    }

    fn notify(&mut self, event: KeyEvent) {
        self.watchers.retain(|watcher| !watcher.tx.is_closed());
        for watcher in self.watchers.iter().filter(|w| w.matches(event.key())) {
            let _ = watcher.tx.send(event.clone());
        }
    }
}

impl MemoryKeystore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revision(&self) -> Revision {
        self.inner.lock().revision
    }

    /// Expire a lease now, as if its holder had stopped renewing it
    pub fn expire_lease(&self, lease: LeaseId) {
        self.inner.lock().expire(lease);
    }

    fn spawn_expiry(inner: Weak<Mutex<Inner>>, lease: LeaseId) {
        tokio::spawn(async move {
            loop {
                let deadline = {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    let guard = inner.lock();
                    match guard.leases.get(&lease) {
                        Some(state) => state.deadline,
                        None => return,
                    }
                };

                tokio::time::sleep_until(deadline).await;

                let Some(inner) = inner.upgrade() else {
                    return;
                };
                let mut guard = inner.lock();
                match guard.leases.get(&lease) {
                    Some(state) if state.deadline <= Instant::now() => {
                        tracing::debug!(lease = lease.0, "lease expired");
                        guard.expire(lease);
                        return;
                    }
                    Some(_) => {}
                    None => return,
                }
            }
        });
    }
}

#[async_trait]
impl Keystore for MemoryKeystore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, RegistryError> {
        Ok(self.inner.lock().entries.get(key).cloned())
    }

    async fn get_all(&self, prefix: &str) -> Result<Vec<KeyValue>, RegistryError> {
        let inner = self.inner.lock();
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, kv)| kv.clone())
            .collect())
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<KeyValue, RegistryError> {
        let mut inner = self.inner.lock();
        inner.check_lease(lease)?;
        Ok(inner.store(key, value, lease))
    }

    async fn atomic_add(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<KeyValue, RegistryError> {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(key) {
            return Err(RegistryError::already_exists(format!(
                "key already exists: {key}"
            )));
        }
        inner.check_lease(lease)?;
        Ok(inner.store(key, value, lease))
    }

    async fn compare_and_put(
        &self,
        key: &str,
        value: Vec<u8>,
        mod_revision: Revision,
    ) -> Result<KeyValue, RegistryError> {
        let mut inner = self.inner.lock();
        let lease = match inner.entries.get(key) {
            None => return Err(RegistryError::not_found(format!("key not found: {key}"))),
            Some(kv) if kv.mod_revision != mod_revision => {
                return Err(RegistryError::conflict(format!(
                    "{key} modified at revision {}, expected {mod_revision}",
                    kv.mod_revision
                )));
            }
            Some(kv) => kv.lease,
        };
        Ok(inner.store(key, value, lease))
    }

    async fn delete(&self, key: &str) -> Result<bool, RegistryError> {
        Ok(self.inner.lock().remove(key).is_some())
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        mod_revision: Revision,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            None => Err(RegistryError::not_found(format!("key not found: {key}"))),
            Some(kv) if kv.mod_revision != mod_revision => Err(RegistryError::conflict(format!(
                "{key} modified at revision {}, expected {mod_revision}",
                kv.mod_revision
            ))),
            Some(_) => {
                inner.remove(key);
                Ok(())
            }
        }
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, RegistryError> {
        let lease = {
            let mut inner = self.inner.lock();
            inner.next_lease += 1;
            let lease = LeaseId(inner.next_lease);
            inner.leases.insert(
                lease,
                Lease {
                    ttl,
                    deadline: Instant::now() + ttl,
                    keys: BTreeSet::new(),
                },
            );
            lease
        };
        Self::spawn_expiry(Arc::downgrade(&self.inner), lease);
        Ok(lease)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        let state = inner
            .leases
            .get_mut(&lease)
            .ok_or_else(|| lease_not_found(lease))?;
        state.deadline = Instant::now() + state.ttl;
        Ok(())
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), RegistryError> {
        self.inner.lock().expire(lease);
        Ok(())
    }

    async fn watch(
        &self,
        key: &str,
        prefix: bool,
        cancel: CancellationToken,
    ) -> Result<KeyEventStream, RegistryError> {
        if cancel.is_cancelled() {
            return Err(RegistryError::new(
                RegistryErrorKind::Cancelled,
                format!("watch on {key} cancelled"),
            ));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.inner.lock().watchers.push(Watcher {
            key: key.to_string(),
            prefix,
            tx,
        });

        Ok(Box::pin(async_stream::stream! {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => yield event,
                        None => break,
                    },
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn atomic_add_rejects_existing_keys() {
        let store = MemoryKeystore::new();
        store.atomic_add("/a", b"1".to_vec(), None).await.unwrap();

        let err = store
            .atomic_add("/a", b"2".to_vec(), None)
            .await
            .unwrap_err();
        assert!(err.is(RegistryErrorKind::AlreadyExists));
        assert_eq!(store.get("/a").await.unwrap().unwrap().value, b"1".to_vec());
    }

    #[tokio::test]
    async fn compare_and_put_detects_concurrent_writes() {
        let store = MemoryKeystore::new();
        let first = store.put("/a", b"1".to_vec(), None).await.unwrap();
        store
            .compare_and_put("/a", b"2".to_vec(), first.mod_revision)
            .await
            .unwrap();

        let err = store
            .compare_and_put("/a", b"3".to_vec(), first.mod_revision)
            .await
            .unwrap_err();
        assert!(err.is(RegistryErrorKind::Conflict));
    }

    #[tokio::test]
    async fn prefix_scan_stays_inside_prefix() {
        let store = MemoryKeystore::new();
        store.put("/p/a", vec![], None).await.unwrap();
        store.put("/p/b", vec![], None).await.unwrap();
        store.put("/q/a", vec![], None).await.unwrap();

        let keys: Vec<_> = store
            .get_all("/p/")
            .await
            .unwrap()
            .into_iter()
            .map(|kv| kv.key)
            .collect();
        assert_eq!(keys, vec!["/p/a".to_string(), "/p/b".to_string()]);
    }

    #[tokio::test]
    async fn watch_delivers_tagged_events_in_order() {
        let store = MemoryKeystore::new();
        let cancel = CancellationToken::new();
        let mut events = store.watch("/w/", true, cancel.clone()).await.unwrap();

        store.put("/w/a", b"1".to_vec(), None).await.unwrap();
        store.put("/w/a", b"2".to_vec(), None).await.unwrap();
        store.put("/other", b"x".to_vec(), None).await.unwrap();
        store.delete("/w/a").await.unwrap();

        assert!(matches!(events.next().await, Some(KeyEvent::Created(kv)) if kv.value == b"1"));
        assert!(matches!(
            events.next().await,
            Some(KeyEvent::Updated { old, new }) if old.value == b"1" && new.value == b"2"
        ));
        assert!(matches!(events.next().await, Some(KeyEvent::Deleted(kv)) if kv.value == b"2"));

        cancel.cancel();
        assert!(events.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_deletes_attached_keys() {
        let store = MemoryKeystore::new();
        let lease = store.grant_lease(Duration::from_secs(5)).await.unwrap();
        store.put("/alive/h1", vec![], Some(lease)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        store.keep_alive(lease).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(store.get("/alive/h1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(store.get("/alive/h1").await.unwrap().is_none());
        assert!(
            store
                .keep_alive(lease)
                .await
                .unwrap_err()
                .is(RegistryErrorKind::NotFound)
        );
    }

    #[tokio::test]
    async fn revoke_emits_deleted_events() {
        let store = MemoryKeystore::new();
        let lease = store.grant_lease(Duration::from_secs(60)).await.unwrap();
        store.put("/lock", b"me".to_vec(), Some(lease)).await.unwrap();

        let cancel = CancellationToken::new();
        let mut events = store.watch("/lock", false, cancel).await.unwrap();
        store.revoke_lease(lease).await.unwrap();

        assert!(matches!(events.next().await, Some(KeyEvent::Deleted(_))));
        assert!(store.get("/lock").await.unwrap().is_none());
    }
}
