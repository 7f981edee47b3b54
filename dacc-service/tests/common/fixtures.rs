// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dacc_contracts::{Keystore, PoolRegistry};
use dacc_registry::{MemoryKeystore, Registries, RegistryOptions, build_registries};
use dacc_service::config::DeviceConfig;
use dacc_service::devices::DeviceEnumerator;
use dacc_service::{
    ActionHandler, BrickAllocator, BufferRequest, FakeProvider, HostWatcher, SessionFacade,
    SessionWorkflow, Timeouts,
};
use dacc_types::{Brick, Pool, PoolInfo};

use super::mocks::{CallLog, RecordingPools, RecordingSessions, ScriptedActions};

pub const POOL: &str = "pool1";
pub const BRICK_GB: u64 = 1600;
pub const BRICK_BYTES: u64 = BRICK_GB * 1_000_000_000;

pub fn short_timeouts() -> Timeouts {
    Timeouts {
        lock: Duration::from_secs(5),
        action: Duration::from_secs(5),
        state: Duration::from_secs(5),
    }
}

pub fn pool_info(name: &str, granularity: u64, bricks: &[(&str, &str)]) -> PoolInfo {
    PoolInfo {
        pool: Pool {
            name: name.to_string(),
            granularity_bytes: granularity,
        },
        available_bricks: bricks
            .iter()
            .map(|(host, device)| Brick {
                hostname: host.to_string(),
                device: device.to_string(),
            })
            .collect(),
        allocated_bricks: Vec::new(),
    }
}

pub fn buffer_request(token: &str, capacity: &str) -> BufferRequest {
    BufferRequest {
        token: token.to_string(),
        capacity: capacity.parse().unwrap(),
        caller: "SLURM".to_string(),
        user: 1001,
        group: 1001,
        job_file: format!("/tmp/{token}.sh"),
        access: "striped".to_string(),
        buffer_type: "scratch".to_string(),
        persistent: false,
    }
}

/// Facade wired to recording doubles
pub struct MockHarness {
    pub log: CallLog,
    pub sessions: Arc<RecordingSessions>,
    pub pools: Arc<RecordingPools>,
    pub actions: Arc<ScriptedActions>,
    pub facade: SessionFacade,
}

impl MockHarness {
    pub fn new(infos: Vec<PoolInfo>) -> Self {
        let log = CallLog::default();
        let sessions = Arc::new(RecordingSessions::new(log.clone()));
        let pools = Arc::new(RecordingPools::new(infos, log.clone()));
        let actions = Arc::new(ScriptedActions::new(log.clone()));
        let facade = SessionFacade::new(
            sessions.clone(),
            pools.clone(),
            actions.clone(),
            Arc::new(BrickAllocator::seeded(7)),
            short_timeouts(),
        );
        Self {
            log,
            sessions,
            pools,
            actions,
            facade,
        }
    }
}

/// Storage hosts, each running a host watcher and an action handler, over
/// one in-memory keystore
pub struct Cluster {
    pub keystore: Arc<MemoryKeystore>,
    pub registries: Registries,
    pub provider: Arc<FakeProvider>,
    pub facade: Arc<SessionFacade>,
    pub workflow: SessionWorkflow,
    pub cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Cluster {
    pub async fn start(hosts: &[&str], devices_per_host: u32) -> Self {
        let keystore = Arc::new(MemoryKeystore::new());
        let registries = build_registries(
            keystore.clone() as Arc<dyn Keystore>,
            RegistryOptions::default(),
        );
        let provider = Arc::new(FakeProvider::new());
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        for host in hosts {
            let bricks = DeviceEnumerator::new(DeviceConfig {
                pool_name: POOL.to_string(),
                count: devices_per_host,
                capacity_gb: BRICK_GB,
                pattern: "nvme%dn1".to_string(),
            })
            .bricks(host);

            let watcher = HostWatcher::new(
                *host,
                bricks,
                registries.pools.clone(),
                registries.volumes.clone(),
                provider.clone(),
            );
            watcher.start(&cancel).await.unwrap();
            let token = cancel.clone();
            tasks.push(tokio::spawn(async move {
                watcher.run(token).await.unwrap();
            }));

            let handler = ActionHandler::new(
                host,
                registries.actions.clone(),
                registries.sessions.clone(),
                registries.volumes.clone(),
                registries.pools.clone(),
                short_timeouts().state,
            );
            let token = cancel.clone();
            tasks.push(tokio::spawn(async move {
                handler.run(token).await.unwrap();
            }));
        }

        let facade = Arc::new(SessionFacade::new(
            registries.sessions.clone(),
            registries.pools.clone(),
            registries.actions.clone(),
            Arc::new(BrickAllocator::seeded(11)),
            short_timeouts(),
        ));
        let workflow = SessionWorkflow::new(
            facade.clone(),
            registries.sessions.clone(),
            registries.volumes.clone(),
            registries.pools.clone(),
        );

        Self {
            keystore,
            registries,
            provider,
            facade,
            workflow,
            cancel,
            tasks,
        }
    }

    /// Poll until no allocation is left for `volume`
    pub async fn wait_for_release(&self, volume: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let left = self
                    .registries
                    .pools
                    .get_allocations_for_volume(volume)
                    .await
                    .unwrap();
                if left.is_empty() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("bricks released");
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            task.await.unwrap();
        }
    }
}
