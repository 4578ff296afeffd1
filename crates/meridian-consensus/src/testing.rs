//! In-memory collaborators: a mesh of managers wired through a loopback
//! transport, a hash-map data store, and a counting log. Used by this
//! crate's tests; useful for embedding experiments.

use crate::config::ManagerConfig;
use crate::driver::{PhaseDriver, ProtocolDriver};
use crate::error::Result;
use crate::manager::Manager;
use crate::scope::Scope;
use crate::store::{DataStore, LogStore};
use crate::topology::Topology;
use crate::transport::Transport;
use crate::types::{Instance, InstanceId, Instruction, NodeId, Request, Response};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering::*};
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;

/// Key/value store over a hash map. `SET key value` writes, `GET key` reads;
/// values travel as raw bytes.
pub struct MemStore {
    values: Mutex<HashMap<String, String>>,
    applied: Mutex<Vec<Instruction>>,
}

impl MemStore {
    #[must_use]
    pub fn new() -> Self {
        Self { values: Mutex::new(HashMap::new()), applied: Mutex::new(Vec::new()) }
    }

    #[must_use]
    pub fn value_of(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.applied.lock().len()
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataStore for MemStore {
    type Value = Bytes;

    async fn apply(&self, instruction: &Instruction) -> anyhow::Result<Bytes> {
        let value = match instruction.cmd.to_ascii_uppercase().as_str() {
            "SET" => {
                let Some(arg) = instruction.args.first() else {
                    bail!("SET requires a value argument");
                };
                self.values.lock().insert(instruction.key.clone(), arg.clone());
                Bytes::from(arg.clone().into_bytes())
            }
            "GET" => {
                let current = self.values.lock().get(&instruction.key).cloned();
                Bytes::from(current.unwrap_or_default().into_bytes())
            }
            other => bail!("unsupported instruction {other}"),
        };
        self.applied.lock().push(instruction.clone());
        Ok(value)
    }

    fn is_read_only(&self, instruction: &Instruction) -> bool {
        instruction.cmd.eq_ignore_ascii_case("GET")
    }
}

/// A log that records the persistence barrier without a disk.
pub struct MemLog {
    persists: AtomicU64,
    last_image: Mutex<Option<Bytes>>,
}

impl MemLog {
    #[must_use]
    pub fn new() -> Self {
        Self { persists: AtomicU64::new(0), last_image: Mutex::new(None) }
    }

    #[must_use]
    pub fn persist_count(&self) -> u64 {
        self.persists.load(SeqCst)
    }

    #[must_use]
    pub fn last_image(&self) -> Option<Bytes> {
        self.last_image.lock().clone()
    }
}

impl Default for MemLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogStore for MemLog {
    async fn persist(&self, _scope: &str, state: Bytes) -> anyhow::Result<()> {
        self.persists.fetch_add(1, SeqCst);
        *self.last_image.lock() = Some(state);
        Ok(())
    }
}

/// A fixed replica set shared by every scope.
pub struct StaticTopology {
    local: NodeId,
    replicas: Vec<NodeId>,
}

impl StaticTopology {
    #[must_use]
    pub fn new(local: NodeId, replicas: Vec<NodeId>) -> Self {
        Self { local, replicas }
    }
}

impl Topology for StaticTopology {
    fn local_id(&self) -> NodeId {
        self.local
    }

    fn replicas_for(&self, _scope: &str) -> Vec<NodeId> {
        self.replicas.clone()
    }
}

#[derive(Default)]
struct MeshInner {
    managers: DashMap<NodeId, Arc<Manager<MemStore>>>,
    partitioned: DashSet<NodeId>,
}

/// Loopback transport: a send is a direct call into the target manager's
/// handler, unless either side is partitioned.
pub struct MeshTransport {
    inner: Arc<MeshInner>,
    origin: NodeId,
}

#[async_trait]
impl Transport for MeshTransport {
    async fn send(&self, target: NodeId, request: Request) -> anyhow::Result<Response> {
        if self.inner.partitioned.contains(&self.origin) {
            bail!("node {} is partitioned", self.origin);
        }
        if self.inner.partitioned.contains(&target) {
            bail!("node {target} is partitioned");
        }
        let manager = match self.inner.managers.get(&target) {
            Some(entry) => Arc::clone(&entry),
            None => bail!("unknown node {target}"),
        };
        manager.handle_request(request).await.map_err(anyhow::Error::from)
    }
}

/// An in-process cluster of managers.
pub struct Mesh {
    inner: Arc<MeshInner>,
    pub nodes: Vec<NodeId>,
    stores: HashMap<NodeId, Arc<MemStore>>,
    logs: HashMap<NodeId, Arc<MemLog>>,
}

impl Mesh {
    #[must_use]
    pub fn new(size: usize, config: ManagerConfig) -> Self {
        Self::with_drivers(size, config, |_| Arc::new(ProtocolDriver))
    }

    /// Builds a mesh where node `i` runs the driver produced by
    /// `driver_for(i)`.
    #[must_use]
    pub fn with_drivers(
        size: usize,
        config: ManagerConfig,
        driver_for: impl Fn(usize) -> Arc<dyn PhaseDriver<MemStore>>,
    ) -> Self {
        let nodes: Vec<NodeId> = (0..size).map(|_| NodeId::random()).collect();
        let inner = Arc::new(MeshInner::default());
        let mut stores = HashMap::new();
        let mut logs = HashMap::new();

        for (i, &node) in nodes.iter().enumerate() {
            let topology = Arc::new(StaticTopology::new(node, nodes.clone()));
            let transport = Arc::new(MeshTransport { inner: Arc::clone(&inner), origin: node });
            let store = Arc::new(MemStore::new());
            let log = Arc::new(MemLog::new());
            let manager = Arc::new(Manager::with_driver(
                config.clone(),
                topology,
                transport,
                Arc::clone(&log) as Arc<dyn LogStore>,
                Arc::clone(&store),
                driver_for(i),
            ));
            let _ = inner.managers.insert(node, manager);
            let _ = stores.insert(node, store);
            let _ = logs.insert(node, log);
        }

        Self { inner, nodes, stores, logs }
    }

    #[must_use]
    pub fn manager(&self, node: NodeId) -> Arc<Manager<MemStore>> {
        Arc::clone(&self.inner.managers.get(&node).expect("node exists"))
    }

    #[must_use]
    pub fn store(&self, node: NodeId) -> Arc<MemStore> {
        Arc::clone(&self.stores[&node])
    }

    #[must_use]
    pub fn log(&self, node: NodeId) -> Arc<MemLog> {
        Arc::clone(&self.logs[&node])
    }

    /// Cuts the node off: sends from and to it fail until healed.
    pub fn partition(&self, node: NodeId) {
        let _ = self.inner.partitioned.insert(node);
    }

    pub fn heal(&self, node: NodeId) {
        let _ = self.inner.partitioned.remove(&node);
    }
}

/// Counts phase invocations, delegating to the production driver.
pub struct RecordingDriver {
    pub pre_accepts: AtomicUsize,
    pub accepts: AtomicUsize,
    pub commits: AtomicUsize,
    pub prepares: AtomicUsize,
}

impl RecordingDriver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pre_accepts: AtomicUsize::new(0),
            accepts: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            prepares: AtomicUsize::new(0),
        }
    }
}

impl Default for RecordingDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: DataStore> PhaseDriver<S> for RecordingDriver {
    async fn pre_accept_phase(&self, scope: &Scope<S>, proposal: Instance) -> Result<bool> {
        self.pre_accepts.fetch_add(1, SeqCst);
        ProtocolDriver.pre_accept_phase(scope, proposal).await
    }

    async fn accept_phase(&self, scope: &Scope<S>, proposal: Instance) -> Result<()> {
        self.accepts.fetch_add(1, SeqCst);
        ProtocolDriver.accept_phase(scope, proposal).await
    }

    async fn commit_phase(&self, scope: &Scope<S>, proposal: Instance) -> Result<()> {
        self.commits.fetch_add(1, SeqCst);
        ProtocolDriver.commit_phase(scope, proposal).await
    }

    async fn prepare_phase(&self, scope: &Scope<S>, id: InstanceId) -> Result<()> {
        self.prepares.fetch_add(1, SeqCst);
        ProtocolDriver.prepare_phase(scope, id).await
    }
}

/// Runs the protocol up to and including PreAccept, then fails: simulates a
/// coordinator crashing between PreAccept and Accept/Commit.
pub struct HaltAfterPreAcceptDriver;

#[async_trait]
impl<S: DataStore> PhaseDriver<S> for HaltAfterPreAcceptDriver {
    async fn pre_accept_phase(&self, scope: &Scope<S>, proposal: Instance) -> Result<bool> {
        ProtocolDriver.pre_accept_phase(scope, proposal).await
    }

    async fn accept_phase(&self, _scope: &Scope<S>, _proposal: Instance) -> Result<()> {
        Err(anyhow::anyhow!("coordinator crashed before accept").into())
    }

    async fn commit_phase(&self, _scope: &Scope<S>, _proposal: Instance) -> Result<()> {
        Err(anyhow::anyhow!("coordinator crashed before commit").into())
    }

    async fn prepare_phase(&self, scope: &Scope<S>, id: InstanceId) -> Result<()> {
        ProtocolDriver.prepare_phase(scope, id).await
    }
}

/// One instruction writing `value` under `key`.
#[must_use]
pub fn test_instruction(key: &str, value: u64) -> Instruction {
    Instruction::new("SET", key, vec![value.to_string()], 0)
}

/// A scope on a single-node cluster: quorum of one, no network round trips.
pub async fn solo_scope() -> Arc<Scope<MemStore>> {
    let (scope, _) = mesh_scope(1).await;
    scope
}

/// A scope on the first node of a fresh `size`-node mesh, plus the node ids.
pub async fn mesh_scope(size: usize) -> (Arc<Scope<MemStore>>, Vec<NodeId>) {
    let mesh = Mesh::new(size, ManagerConfig::fast());
    let scope = mesh.manager(mesh.nodes[0]).scope("test");
    (scope, mesh.nodes.clone())
}
