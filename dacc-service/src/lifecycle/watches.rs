// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use slab::Slab;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Entry {
    volume: String,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Inner {
    entries: Slab<Entry>,
    index: HashMap<String, usize>,
}

/// Handles of the running per-volume watch tasks, keyed by volume name
///
/// A task leaves the registry when it finishes on its own or when it is
/// cancelled; at most one task runs per volume.
#[derive(Clone, Default)]
pub struct VolumeWatches {
    inner: Arc<Mutex<Inner>>,
}

impl VolumeWatches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, volume: &str) -> bool {
        self.inner.lock().index.contains_key(volume)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn volumes(&self) -> Vec<String> {
        let mut volumes: Vec<String> = self.inner.lock().index.keys().cloned().collect();
        volumes.sort();
        volumes
    }

    /// Spawn `task` for `volume` with a token cancelled by `parent` or by
    /// [`VolumeWatches::cancel`]. Returns false if the volume is already
    /// being watched.
    pub fn start<F, Fut>(&self, volume: &str, parent: &CancellationToken, task: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.inner.lock();
        if inner.index.contains_key(volume) {
            return false;
        }

        let cancel = parent.child_token();
        let key = inner.entries.vacant_key();
        let work = task(cancel.clone());
        let watches = self.clone();
        let name = volume.to_string();
        let handle = tokio::spawn(async move {
            work.await;
            watches.finished(&name, key);
        });

        inner.entries.insert(Entry {
            volume: volume.to_string(),
            cancel,
            handle: Some(handle),
        });
        inner.index.insert(volume.to_string(), key);
        tracing::debug!(session = %volume, "volume watch started");
        true
    }

    /// Stop watching `volume`; returns whether a watch was running
    pub fn cancel(&self, volume: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(key) = inner.index.remove(volume) else {
            return false;
        };
        let entry = inner.entries.remove(key);
        entry.cancel.cancel();
        tracing::debug!(session = %volume, "volume watch cancelled");
        true
    }

    /// Cancel every watch and wait for the tasks to exit
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut inner = self.inner.lock();
            inner.index.clear();
            inner
                .entries
                .drain()
                .filter_map(|mut entry| {
                    entry.cancel.cancel();
                    entry.handle.take()
                })
                .collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("volume watch task failed: {e}");
            }
        }
    }

    fn finished(&self, volume: &str, key: usize) {
        let mut inner = self.inner.lock();
        if inner.index.get(volume) == Some(&key) {
            inner.index.remove(volume);
            let entry = inner.entries.remove(key);
            tracing::debug!(session = %entry.volume, "volume watch finished");
        }
    }
}
