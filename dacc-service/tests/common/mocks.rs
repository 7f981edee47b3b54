// SPDX-License-Identifier: GPL-3.0-only

//! Registry doubles that record every call into a shared log

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore, oneshot};
use tokio_util::sync::CancellationToken;

use dacc_contracts::{
    ActionReceiver, Mounter, Mutex as RegistryMutex, PoolRegistry, ProviderResult, RegistryError,
    SessionActions, SessionRegistry, VolumeProvider, WatchStream,
};
use dacc_types::{
    Brick, BrickAllocation, BrickInfo, Configuration, Pool, PoolInfo, Session, SessionAction,
    SessionActionKind, SessionActionRequest, Volume,
};

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == entry).count()
    }
}

pub struct RecordingMutex {
    name: String,
    log: CallLog,
}

impl RecordingMutex {
    pub fn new(name: impl Into<String>, log: CallLog) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }
}

#[async_trait]
impl RegistryMutex for RecordingMutex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lock(
        &self,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Result<(), RegistryError> {
        self.log.push(format!("lock {}", self.name));
        Ok(())
    }

    async fn unlock(&self) -> Result<(), RegistryError> {
        self.log.push(format!("unlock {}", self.name));
        Ok(())
    }
}

pub struct RecordingSessions {
    sessions: Mutex<HashMap<String, Session>>,
    log: CallLog,
}

impl RecordingSessions {
    pub fn new(log: CallLog) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            log,
        }
    }

    pub fn stored(&self, name: &str) -> Option<Session> {
        self.sessions.lock().get(name).cloned()
    }

    pub fn insert(&self, session: Session) {
        self.sessions.lock().insert(session.name.clone(), session);
    }
}

#[async_trait]
impl SessionRegistry for RecordingSessions {
    async fn create_session(&self, session: &Session) -> Result<Session, RegistryError> {
        self.log.push("create_session");
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&session.name) {
            return Err(RegistryError::already_exists(format!(
                "session already exists: {}",
                session.name
            )));
        }
        sessions.insert(session.name.clone(), session.clone());
        Ok(session.clone())
    }

    async fn get_session(&self, name: &str) -> Result<Session, RegistryError> {
        self.stored(name)
            .ok_or_else(|| RegistryError::not_found(format!("unable to find session: {name}")))
    }

    async fn request_delete(&self, name: &str, hurry: bool) -> Result<Session, RegistryError> {
        self.log.push("request_delete");
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(name)
            .ok_or_else(|| RegistryError::not_found(format!("unable to find session: {name}")))?;
        session.status.delete_requested = true;
        if hurry {
            session.status.delete_skip_copy_data_out = true;
        }
        Ok(session.clone())
    }

    async fn delete_session(&self, name: &str) -> Result<(), RegistryError> {
        self.log.push("delete_session");
        self.sessions.lock().remove(name);
        Ok(())
    }

    async fn all_sessions(&self) -> Result<Vec<Session>, RegistryError> {
        Ok(self.sessions.lock().values().cloned().collect())
    }

    fn session_mutex(&self, name: &str) -> Result<Box<dyn RegistryMutex>, RegistryError> {
        Ok(Box::new(RecordingMutex::new(
            format!("session/{name}"),
            self.log.clone(),
        )))
    }
}

pub struct RecordingPools {
    infos: Mutex<HashMap<String, PoolInfo>>,
    allocations: Mutex<Vec<BrickAllocation>>,
    allocation_mutex_calls: AtomicUsize,
    log: CallLog,
}

impl RecordingPools {
    pub fn new(infos: Vec<PoolInfo>, log: CallLog) -> Self {
        Self {
            infos: Mutex::new(
                infos
                    .into_iter()
                    .map(|info| (info.pool.name.clone(), info))
                    .collect(),
            ),
            allocations: Mutex::new(Vec::new()),
            allocation_mutex_calls: AtomicUsize::new(0),
            log,
        }
    }

    pub fn allocation_mutex_calls(&self) -> usize {
        self.allocation_mutex_calls.load(Ordering::SeqCst)
    }

    pub fn allocations(&self) -> Vec<BrickAllocation> {
        self.allocations.lock().clone()
    }
}

#[async_trait]
impl PoolRegistry for RecordingPools {
    async fn update_host(&self, _bricks: &[BrickInfo]) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn keep_alive_host(
        &self,
        _hostname: &str,
        _cancel: CancellationToken,
    ) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn pools(&self) -> Result<Vec<Pool>, RegistryError> {
        Ok(self.infos.lock().values().map(|i| i.pool.clone()).collect())
    }

    async fn get_pool(&self, name: &str) -> Result<Pool, RegistryError> {
        self.get_pool_info(name).await.map(|info| info.pool)
    }

    async fn get_pool_info(&self, name: &str) -> Result<PoolInfo, RegistryError> {
        self.infos
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(format!("unable to find pool: {name}")))
    }

    async fn get_all_pool_infos(&self) -> Result<Vec<PoolInfo>, RegistryError> {
        Ok(self.infos.lock().values().cloned().collect())
    }

    async fn get_allocations_for_host(
        &self,
        hostname: &str,
    ) -> Result<Vec<BrickAllocation>, RegistryError> {
        Ok(self
            .allocations
            .lock()
            .iter()
            .filter(|a| a.hostname == hostname)
            .cloned()
            .collect())
    }

    async fn get_allocations_for_volume(
        &self,
        volume: &str,
    ) -> Result<Vec<BrickAllocation>, RegistryError> {
        Ok(self
            .allocations
            .lock()
            .iter()
            .filter(|a| a.allocated_volume == volume)
            .cloned()
            .collect())
    }

    async fn allocate_bricks(
        &self,
        volume: &str,
        pool_name: &str,
        bricks: &[Brick],
    ) -> Result<Vec<BrickAllocation>, RegistryError> {
        self.log.push("allocate_bricks");
        let created: Vec<BrickAllocation> = bricks
            .iter()
            .enumerate()
            .map(|(index, brick)| BrickAllocation {
                device: brick.device.clone(),
                hostname: brick.hostname.clone(),
                pool_name: pool_name.to_string(),
                allocated_volume: volume.to_string(),
                allocated_index: index as u32,
                deallocate_requested: false,
            })
            .collect();
        self.allocations.lock().extend(created.iter().cloned());
        Ok(created)
    }

    async fn deallocate_bricks(&self, volume: &str) -> Result<(), RegistryError> {
        self.log.push("deallocate_bricks");
        for allocation in self.allocations.lock().iter_mut() {
            if allocation.allocated_volume == volume {
                allocation.deallocate_requested = true;
            }
        }
        Ok(())
    }

    async fn remove_allocation(&self, allocation: &BrickAllocation) -> Result<(), RegistryError> {
        self.log.push("remove_allocation");
        self.allocations
            .lock()
            .retain(|a| a.brick() != allocation.brick());
        Ok(())
    }

    async fn watch_host_brick_allocations(
        &self,
        _hostname: &str,
        _cancel: CancellationToken,
    ) -> Result<WatchStream<BrickAllocation>, RegistryError> {
        Ok(Box::pin(futures::stream::empty()))
    }

    fn allocation_mutex(&self) -> Result<Box<dyn RegistryMutex>, RegistryError> {
        self.allocation_mutex_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingMutex::new("allocation", self.log.clone())))
    }
}

/// What the action channel answers
#[derive(Debug, Clone)]
pub enum Reply {
    Success,
    Failure(String),
    /// Close the channel without a result
    Nothing,
}

pub struct ScriptedActions {
    reply: Mutex<Reply>,
    sent: Mutex<Vec<(SessionActionKind, Session)>>,
    log: CallLog,
}

impl ScriptedActions {
    pub fn new(log: CallLog) -> Self {
        Self {
            reply: Mutex::new(Reply::Success),
            sent: Mutex::new(Vec::new()),
            log,
        }
    }

    pub fn reply_with(&self, reply: Reply) {
        *self.reply.lock() = reply;
    }

    pub fn sent(&self) -> Vec<(SessionActionKind, Session)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl SessionActions for ScriptedActions {
    async fn send_session_action(
        &self,
        kind: SessionActionKind,
        session: &Session,
    ) -> Result<ActionReceiver, RegistryError> {
        self.log.push("send_session_action");
        self.sent.lock().push((kind, session.clone()));

        let (tx, rx) = oneshot::channel();
        let reply = self.reply.lock().clone();
        match reply {
            Reply::Success => {
                let _ = tx.send(SessionAction::success(kind, &session.name));
            }
            Reply::Failure(error) => {
                let _ = tx.send(SessionAction::failure(kind, &session.name, error));
            }
            Reply::Nothing => drop(tx),
        }
        Ok(rx)
    }

    async fn watch_action_requests(
        &self,
        _hostname: &str,
        _cancel: CancellationToken,
    ) -> Result<WatchStream<SessionActionRequest>, RegistryError> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn complete_action(
        &self,
        _request: &SessionActionRequest,
        _result: SessionAction,
    ) -> Result<(), RegistryError> {
        Ok(())
    }
}

/// Provider whose data-in copy blocks until the test lets it finish
pub struct GatedProvider {
    copies_in: AtomicUsize,
    mounts: AtomicUsize,
    started: Notify,
    release: Semaphore,
}

impl GatedProvider {
    pub fn new() -> Self {
        Self {
            copies_in: AtomicUsize::new(0),
            mounts: AtomicUsize::new(0),
            started: Notify::new(),
            release: Semaphore::new(0),
        }
    }

    pub async fn copy_started(&self) {
        self.started.notified().await;
    }

    pub fn finish_copy(&self) {
        self.release.add_permits(1);
    }

    pub fn copies_in(&self) -> usize {
        self.copies_in.load(Ordering::SeqCst)
    }

    pub fn mounts(&self) -> usize {
        self.mounts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VolumeProvider for GatedProvider {
    async fn setup_volume(&self, _volume: &Volume) -> ProviderResult {
        Ok(())
    }

    async fn copy_data_in(&self, _volume: &Volume) -> ProviderResult {
        self.copies_in.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        let permit = self
            .release
            .acquire()
            .await
            .map_err(|e| e.to_string())?;
        permit.forget();
        Ok(())
    }

    async fn copy_data_out(&self, _volume: &Volume) -> ProviderResult {
        Ok(())
    }

    async fn teardown_volume(&self, _volume: &Volume) -> ProviderResult {
        Ok(())
    }

    async fn release_brick(&self, _allocation: &BrickAllocation) -> ProviderResult {
        Ok(())
    }
}

#[async_trait]
impl Mounter for GatedProvider {
    async fn mount(
        &self,
        _volume: &Volume,
        _configuration: &Configuration,
        _hostname: &str,
    ) -> ProviderResult {
        self.mounts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unmount(
        &self,
        _volume: &Volume,
        _configuration: &Configuration,
        _hostname: &str,
    ) -> ProviderResult {
        Ok(())
    }
}
