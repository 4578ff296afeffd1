//! A scope: one independent consensus group.
//!
//! The scope owns the instance map, the working sets, the per-scope sequence
//! counter, and a dependency manager. All multi-field updates run under the
//! scope's write lock; the lock is held across the persistence barrier so
//! that no externally observable transition precedes durability (lock
//! ordering: scope lock, then dependency lock, never the reverse).

mod accept;
mod commit;
mod execute;
mod preaccept;
mod prepare;

use crate::config::ManagerConfig;
use crate::deps::{DependencyManager, KeyMap};
use crate::driver::PhaseDriver;
use crate::error::{ConsensusError, Result};
use crate::store::{DataStore, LogStore};
use crate::sync::SyncRegistry;
use crate::topology::Topology;
use crate::transport::Transport;
use crate::types::{
    Ballot, Instance, InstanceId, InstanceStatus, Instruction, NodeId, Seq,
};

use std::sync::Arc;
use std::time::Duration;

use meridian_utils::cmp::max_assign;
use meridian_utils::codec;
use meridian_utils::vecset::VecSet;

use fnv::FnvHashMap;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

pub(crate) struct ScopeState {
    pub instances: FnvHashMap<InstanceId, Instance>,
    pub in_progress: VecSet<InstanceId>,
    pub committed: VecSet<InstanceId>,
    /// Apply order, append-only.
    pub executed: Vec<InstanceId>,
    pub max_seq: Seq,
}

impl ScopeState {
    fn new() -> Self {
        Self {
            instances: FnvHashMap::default(),
            in_progress: VecSet::new(),
            committed: VecSet::new(),
            executed: Vec::new(),
            max_seq: Seq::ZERO,
        }
    }
}

/// The logical durable image of a scope, written through the log on every
/// persistence barrier.
#[derive(Serialize, Deserialize)]
pub(crate) struct PersistedScope {
    pub name: String,
    pub instances: Vec<(InstanceId, Instance)>,
    pub in_progress: VecSet<InstanceId>,
    pub committed: VecSet<InstanceId>,
    pub executed: Vec<InstanceId>,
    pub max_seq: Seq,
    pub key_map: KeyMap,
}

/// Serializes a subset of interdependent commands.
pub struct Scope<S: DataStore> {
    name: String,
    config: ManagerConfig,
    state: RwLock<ScopeState>,
    deps: DependencyManager,
    sync: SyncRegistry,
    topology: Arc<dyn Topology>,
    transport: Arc<dyn Transport>,
    log: Arc<dyn LogStore>,
    store: Arc<S>,
    driver: Arc<dyn PhaseDriver<S>>,
}

pub(crate) fn quorum_size(cluster_size: usize) -> usize {
    cluster_size / 2 + 1
}

/// Falls back to the already-stored instance when a transition attempt was
/// subsumed by the local state (the instance is past the attempted status);
/// every other error propagates. Coordinator phases re-apply transitions a
/// faster peer may have already performed, which is not a failure.
pub(crate) fn stored_if_subsumed(
    st: &ScopeState,
    id: InstanceId,
    result: Result<Instance>,
) -> Result<Instance> {
    match result {
        Err(err) if err.is_invalid_status() => Ok(st
            .instances
            .get(&id)
            .cloned()
            .expect("instance exists when the update is subsumed")),
        other => other,
    }
}

impl<S: DataStore> Scope<S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        config: ManagerConfig,
        topology: Arc<dyn Topology>,
        transport: Arc<dyn Transport>,
        log: Arc<dyn LogStore>,
        store: Arc<S>,
        driver: Arc<dyn PhaseDriver<S>>,
    ) -> Self {
        Self {
            name,
            config,
            state: RwLock::new(ScopeState::new()),
            deps: DependencyManager::new(),
            sync: SyncRegistry::new(),
            topology,
            transport,
            log,
            store,
            driver,
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub(crate) fn local_id(&self) -> NodeId {
        self.topology.local_id()
    }

    #[inline]
    pub(crate) fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The scope's replica endpoints other than the local node.
    pub(crate) fn peer_replicas(&self) -> Vec<NodeId> {
        let local = self.local_id();
        let mut replicas = self.topology.replicas_for(&self.name);
        replicas.retain(|r| *r != local);
        replicas
    }

    /// Creates a bare instance for the given instructions: fresh id, the
    /// local node as leader, and a randomly ordered successor list.
    pub(crate) fn make_instance(&self, instructions: Vec<Instruction>) -> Instance {
        let read_only =
            !instructions.is_empty() && instructions.iter().all(|i| self.store.is_read_only(i));
        let mut successors = self.peer_replicas();
        successors.shuffle(&mut rand::thread_rng());

        let mut ins = Instance::placeholder(InstanceId::random(), self.local_id());
        ins.commands = instructions;
        ins.successors = successors;
        ins.read_only = read_only;
        ins
    }

    /// Coordinates a client query: PreAccept, Accept when the attributes
    /// changed, Commit, then execution. The local node becomes the command
    /// leader; call once per client query.
    pub async fn execute_query(
        &self,
        instructions: Vec<Instruction>,
    ) -> Result<Option<S::Value>> {
        let local = self.local_id();
        if !self.topology.replicas_for(&self.name).contains(&local) {
            return Err(ConsensusError::Other(anyhow::anyhow!(
                "node {local} is not eligible to lead scope {}",
                self.name
            )));
        }

        let proposal = self.make_instance(instructions);
        let id = proposal.id;

        let accept_required = self.driver.pre_accept_phase(self, proposal).await?;

        if accept_required {
            let ins = self.expect_snapshot(id).await?;
            self.driver.accept_phase(self, ins).await?;
        }

        let ins = self.expect_snapshot(id).await?;
        self.driver.commit_phase(self, ins).await?;

        self.execute_instance(id).await
    }

    // ------------------------------------------------------------------
    // snapshots and introspection

    /// A deep, independent copy of an instance, taken under the scope lock,
    /// suitable for the wire.
    pub async fn snapshot_copy(&self, id: InstanceId) -> Option<Instance> {
        let st = self.state.read().await;
        st.instances.get(&id).cloned()
    }

    pub(crate) async fn expect_snapshot(&self, id: InstanceId) -> Result<Instance> {
        self.snapshot_copy(id)
            .await
            .ok_or_else(|| ConsensusError::Other(anyhow::anyhow!("unknown instance {id:?}")))
    }

    pub async fn status_of(&self, id: InstanceId) -> Option<InstanceStatus> {
        let st = self.state.read().await;
        st.instances.get(&id).map(|i| i.status)
    }

    /// The apply order so far.
    pub async fn executed_ids(&self) -> Vec<InstanceId> {
        let st = self.state.read().await;
        st.executed.clone()
    }

    /// Instances known but not yet committed.
    pub async fn in_progress_ids(&self) -> Vec<InstanceId> {
        let st = self.state.read().await;
        st.in_progress.as_slice().to_vec()
    }

    // ------------------------------------------------------------------
    // state transitions
    //
    // The `apply_*` functions mutate the in-memory state only; callers hold
    // the write guard across the subsequent `persist_locked` so a crash can
    // never expose an unpersisted transition.

    fn jittered(&self, base: Duration) -> Instant {
        let jitter_cap = (base.as_millis() as u64) / 8;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };
        Instant::now() + base + Duration::from_millis(jitter)
    }

    /// Merges `ins` into the scope as pre-accepted.
    ///
    /// The caller has already settled the attributes (dependencies,
    /// sequence, match flag) and registered the instance with the
    /// dependency manager.
    pub(crate) fn apply_pre_accept(
        &self,
        st: &mut ScopeState,
        ins: &Instance,
        increment_ballot: bool,
    ) -> Result<Instance> {
        let commit_deadline = self.jittered(self.config.pre_accept_commit_timeout());

        let was_known = st.instances.contains_key(&ins.id);
        if !was_known {
            let _ = st.instances.insert(ins.id, ins.clone());
        }
        let entry = st.instances.get_mut(&ins.id).expect("instance present");
        if was_known {
            if entry.status > InstanceStatus::PreAccepted {
                return Err(ConsensusError::InvalidStatusUpdate {
                    current: entry.status,
                    attempted: InstanceStatus::PreAccepted,
                });
            }
            entry.noop |= ins.noop;
            max_assign(&mut entry.max_ballot, ins.max_ballot);
            entry.dependencies = ins.dependencies.clone();
            entry.sequence = ins.sequence;
            entry.dependency_match = ins.dependency_match;
        }

        entry.status = InstanceStatus::PreAccepted;
        if increment_ballot {
            entry.max_ballot = entry.max_ballot.add_one();
        }
        entry.commit_deadline = Some(commit_deadline);
        let snapshot = entry.clone();

        let _ = st.in_progress.insert(ins.id);
        max_assign(&mut st.max_seq, snapshot.sequence);
        Ok(snapshot)
    }

    /// Merges `ins` into the scope as accepted, adopting its attributes as
    /// the committed-to-be value.
    pub(crate) fn apply_accept(
        &self,
        st: &mut ScopeState,
        ins: &Instance,
        increment_ballot: bool,
    ) -> Result<Instance> {
        let commit_deadline = self.jittered(self.config.accept_commit_timeout());

        let was_known = st.instances.contains_key(&ins.id);
        if !was_known {
            let _ = st.instances.insert(ins.id, ins.clone());
        }
        let entry = st.instances.get_mut(&ins.id).expect("instance present");
        if was_known {
            if entry.status > InstanceStatus::Accepted {
                return Err(ConsensusError::InvalidStatusUpdate {
                    current: entry.status,
                    attempted: InstanceStatus::Accepted,
                });
            }
            entry.dependencies = ins.dependencies.clone();
            entry.sequence = ins.sequence;
            entry.noop |= ins.noop;
            max_assign(&mut entry.max_ballot, ins.max_ballot);
        }

        entry.status = InstanceStatus::Accepted;
        if increment_ballot {
            entry.max_ballot = entry.max_ballot.add_one();
        }
        entry.commit_deadline = Some(commit_deadline);
        let snapshot = entry.clone();

        if !was_known {
            self.deps.add_dependency(&snapshot);
        }
        let _ = st.in_progress.insert(ins.id);
        max_assign(&mut st.max_seq, snapshot.sequence);
        Ok(snapshot)
    }

    /// Merges `ins` into the scope as committed. Attributes are frozen from
    /// here on; a commit against an already-committed instance is an
    /// [`InvalidStatusUpdate`](ConsensusError::InvalidStatusUpdate).
    pub(crate) fn apply_commit(
        &self,
        st: &mut ScopeState,
        ins: &Instance,
        increment_ballot: bool,
    ) -> Result<Instance> {
        let execute_deadline = Instant::now() + self.config.execute_timeout();

        let was_known = st.instances.contains_key(&ins.id);
        if !was_known {
            let _ = st.instances.insert(ins.id, ins.clone());
        }
        let entry = st.instances.get_mut(&ins.id).expect("instance present");
        if was_known {
            if entry.status >= InstanceStatus::Committed {
                return Err(ConsensusError::InvalidStatusUpdate {
                    current: entry.status,
                    attempted: InstanceStatus::Committed,
                });
            }
            entry.dependencies = ins.dependencies.clone();
            entry.sequence = ins.sequence;
            entry.noop |= ins.noop;
            max_assign(&mut entry.max_ballot, ins.max_ballot);
        }

        entry.status = InstanceStatus::Committed;
        if increment_ballot {
            entry.max_ballot = entry.max_ballot.add_one();
        }
        entry.execute_deadline = Some(execute_deadline);
        let snapshot = entry.clone();

        if !was_known {
            self.deps.add_dependency(&snapshot);
        }
        let _ = st.in_progress.remove(&ins.id);
        let _ = st.committed.insert(ins.id);
        max_assign(&mut st.max_seq, snapshot.sequence);
        Ok(snapshot)
    }

    /// Absorbs an instance this scope did not know about.
    ///
    /// An incoming `Executed` status is clamped to `Committed`: a joining
    /// replica must re-execute locally.
    fn absorb_unknown(&self, st: &mut ScopeState, mut ins: Instance) {
        if ins.status == InstanceStatus::Executed {
            ins.status = InstanceStatus::Committed;
        }
        ins.commit_deadline = Some(self.jittered(self.config.pre_accept_commit_timeout()));
        match ins.status {
            InstanceStatus::Committed => {
                let _ = st.committed.insert(ins.id);
            }
            _ => {
                let _ = st.in_progress.insert(ins.id);
            }
        }
        max_assign(&mut st.max_seq, ins.sequence);
        self.deps.add_dependency(&ins);
        let id = ins.id;
        let _ = st.instances.insert(id, ins);
    }

    /// Registers instances reported by a remote replica that this scope has
    /// not seen. Known ids are left untouched.
    pub(crate) fn add_missing_instances(&self, st: &mut ScopeState, missing: Vec<Instance>) {
        for ins in missing {
            if !st.instances.contains_key(&ins.id) {
                debug!(id = ?ins.id, status = ?ins.status, "absorbing missing instance");
                self.absorb_unknown(st, ins);
            }
        }
    }

    /// Returns the stored instance for `id`, materializing `proposed` if the
    /// id is unknown. The returned flag reports whether the instance already
    /// existed; proposed fields of a known instance are ignored.
    pub(crate) async fn get_or_create(&self, proposed: Instance) -> Result<(Instance, bool)> {
        let mut st = self.state.write().await;
        if let Some(existing) = st.instances.get(&proposed.id) {
            return Ok((existing.clone(), true));
        }
        let id = proposed.id;
        self.absorb_unknown(&mut st, proposed);
        self.persist_locked(&st).await?;
        let ins = st.instances.get(&id).expect("instance was just inserted").clone();
        Ok((ins, false))
    }

    /// Raises the local ballot to the highest ballot seen in a set of
    /// rejecting responses.
    pub(crate) async fn absorb_ballot(&self, id: InstanceId, highest: Ballot) -> Result<()> {
        let mut st = self.state.write().await;
        if let Some(ins) = st.instances.get_mut(&id) {
            if highest > ins.max_ballot {
                ins.max_ballot = highest;
                self.persist_locked(&st).await?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // persistence barrier

    /// Writes the scope's durable image through the log. Callers hold the
    /// write guard, so the persisted image is exactly the observable state.
    pub(crate) async fn persist_locked(&self, st: &ScopeState) -> Result<()> {
        let image = PersistedScope {
            name: self.name.clone(),
            instances: st.instances.iter().map(|(k, v)| (*k, v.clone())).collect(),
            in_progress: st.in_progress.clone(),
            committed: st.committed.clone(),
            executed: st.executed.clone(),
            max_seq: st.max_seq,
            key_map: self.deps.snapshot(),
        };
        let bytes = codec::encode(&image)?;
        self.log.persist(&self.name, bytes).await?;
        Ok(())
    }

    pub(crate) async fn state_read(&self) -> tokio::sync::RwLockReadGuard<'_, ScopeState> {
        self.state.read().await
    }

    pub(crate) async fn state_write(&self) -> tokio::sync::RwLockWriteGuard<'_, ScopeState> {
        self.state.write().await
    }

    pub(crate) fn dependency_manager(&self) -> &DependencyManager {
        &self.deps
    }

    pub(crate) fn sync_registry(&self) -> &SyncRegistry {
        &self.sync
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn data_store(&self) -> &Arc<S> {
        &self.store
    }

    pub(crate) fn phase_driver(&self) -> &Arc<dyn PhaseDriver<S>> {
        &self.driver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing::{solo_scope, test_instruction};

    #[tokio::test]
    async fn make_instance_shuffles_all_peers() {
        let (scope, nodes) = crate::testing::mesh_scope(5).await;
        let ins = scope.make_instance(vec![test_instruction("a", 1)]);

        assert_eq!(ins.leader_id, scope.local_id());
        assert_eq!(ins.max_ballot, Ballot::ZERO);
        assert_eq!(ins.successors.len(), 4);
        for succ in &ins.successors {
            assert!(nodes.contains(succ));
            assert_ne!(*succ, scope.local_id());
        }
    }

    #[tokio::test]
    async fn pre_accept_transition() {
        let scope = solo_scope().await;
        let ins = scope.make_instance(vec![test_instruction("a", 1)]);
        let id = ins.id;

        let stored = {
            let mut st = scope.state_write().await;
            scope.apply_pre_accept(&mut st, &ins, false).unwrap()
        };
        assert_eq!(stored.status, InstanceStatus::PreAccepted);
        assert_eq!(stored.max_ballot, Ballot::ZERO);

        let st = scope.state_read().await;
        assert!(st.instances.contains_key(&id));
        assert!(st.in_progress.contains(&id));
    }

    #[tokio::test]
    async fn pre_accept_ballot_increment() {
        let scope = solo_scope().await;
        let ins = scope.make_instance(vec![test_instruction("a", 1)]);

        let stored = {
            let mut st = scope.state_write().await;
            scope.apply_pre_accept(&mut st, &ins, true).unwrap()
        };
        assert_eq!(stored.max_ballot, Ballot::from(1));
    }

    #[tokio::test]
    async fn pre_accept_rejected_above_pre_accepted() {
        let scope = solo_scope().await;
        let ins = scope.make_instance(vec![test_instruction("a", 1)]);

        {
            let mut st = scope.state_write().await;
            let _ = scope.apply_accept(&mut st, &ins, false).unwrap();
            let err = scope.apply_pre_accept(&mut st, &ins, false).unwrap_err();
            assert!(err.is_invalid_status());
        }
        assert_eq!(scope.status_of(ins.id).await, Some(InstanceStatus::Accepted));
    }

    #[tokio::test]
    async fn repeat_pre_accept_adopts_noop_and_keeps_entry() {
        let scope = solo_scope().await;
        let ins = scope.make_instance(vec![test_instruction("a", 1)]);

        {
            let mut st = scope.state_write().await;
            let _ = scope.apply_pre_accept(&mut st, &ins, false).unwrap();
        }
        assert!(!scope.snapshot_copy(ins.id).await.unwrap().noop);

        let mut repeat = ins.clone();
        repeat.noop = true;
        {
            let mut st = scope.state_write().await;
            let _ = scope.apply_pre_accept(&mut st, &repeat, false).unwrap();
        }
        assert!(scope.snapshot_copy(ins.id).await.unwrap().noop);
    }

    #[tokio::test]
    async fn accept_adopts_attributes() {
        let scope = solo_scope().await;
        let ins = scope.make_instance(vec![test_instruction("a", 1)]);
        {
            let mut st = scope.state_write().await;
            let _ = scope.apply_pre_accept(&mut st, &ins, false).unwrap();
        }

        let mut update = ins.clone();
        let dep = InstanceId::random();
        let _ = update.dependencies.insert(dep);
        update.sequence = Seq::from(8);
        {
            let mut st = scope.state_write().await;
            let stored = scope.apply_accept(&mut st, &update, false).unwrap();
            assert_eq!(stored.status, InstanceStatus::Accepted);
            assert!(stored.dependencies.contains(&dep));
            assert_eq!(stored.sequence, Seq::from(8));
            assert_eq!(st.max_seq, Seq::from(8));
        }
    }

    #[tokio::test]
    async fn commit_freezes_and_moves_sets() {
        let scope = solo_scope().await;
        let ins = scope.make_instance(vec![test_instruction("a", 1)]);
        let id = ins.id;
        {
            let mut st = scope.state_write().await;
            let _ = scope.apply_pre_accept(&mut st, &ins, false).unwrap();
            let _ = scope.apply_commit(&mut st, &ins, false).unwrap();
            assert!(!st.in_progress.contains(&id));
            assert!(st.committed.contains(&id));

            // second commit is absorbed, attributes stay frozen
            let mut late = ins.clone();
            late.sequence = Seq::from(99);
            let err = scope.apply_commit(&mut st, &late, false).unwrap_err();
            assert!(err.is_invalid_status());
            assert_ne!(st.instances[&id].sequence, Seq::from(99));
        }
    }

    #[tokio::test]
    async fn get_or_create_clamps_executed() {
        let scope = solo_scope().await;
        let mut ins = scope.make_instance(vec![test_instruction("a", 1)]);
        ins.status = InstanceStatus::Executed;

        let (stored, existed) = scope.get_or_create(ins).await.unwrap();
        assert!(!existed);
        assert_eq!(stored.status, InstanceStatus::Committed);

        let st = scope.state_read().await;
        assert!(st.committed.contains(&stored.id));
        assert!(st.executed.is_empty());
    }

    #[tokio::test]
    async fn get_or_create_keeps_existing_fields() {
        let scope = solo_scope().await;
        let ins = scope.make_instance(vec![test_instruction("a", 1)]);
        {
            let mut st = scope.state_write().await;
            let _ = scope.apply_pre_accept(&mut st, &ins, false).unwrap();
        }

        let mut conflicting = ins.clone();
        conflicting.noop = true;
        let (stored, existed) = scope.get_or_create(conflicting).await.unwrap();
        assert!(existed);
        assert!(!stored.noop);
    }

    #[tokio::test]
    async fn add_missing_routes_by_status() {
        let scope = solo_scope().await;
        let make = |status: InstanceStatus| {
            let mut ins = scope.make_instance(vec![test_instruction("a", 1)]);
            ins.status = status;
            ins
        };

        let pre = make(InstanceStatus::PreAccepted);
        let acc = make(InstanceStatus::Accepted);
        let com = make(InstanceStatus::Committed);
        let exe = make(InstanceStatus::Executed);
        {
            let mut st = scope.state_write().await;
            scope.add_missing_instances(
                &mut st,
                vec![pre.clone(), acc.clone(), com.clone(), exe.clone()],
            );
            assert!(st.in_progress.contains(&pre.id));
            assert!(st.in_progress.contains(&acc.id));
            assert!(st.committed.contains(&com.id));
            assert!(st.committed.contains(&exe.id));
            assert_eq!(st.instances[&exe.id].status, InstanceStatus::Committed);
        }
    }

    #[tokio::test]
    async fn absorb_ballot_is_monotone() {
        let scope = solo_scope().await;
        let ins = scope.make_instance(vec![test_instruction("a", 1)]);
        {
            let mut st = scope.state_write().await;
            let _ = scope.apply_pre_accept(&mut st, &ins, false).unwrap();
        }

        scope.absorb_ballot(ins.id, Ballot::from(5)).await.unwrap();
        assert_eq!(scope.snapshot_copy(ins.id).await.unwrap().max_ballot, Ballot::from(5));

        scope.absorb_ballot(ins.id, Ballot::from(3)).await.unwrap();
        assert_eq!(scope.snapshot_copy(ins.id).await.unwrap().max_ballot, Ballot::from(5));
    }

    #[test]
    fn quorum_sizes() {
        assert_eq!(quorum_size(1), 1);
        assert_eq!(quorum_size(3), 2);
        assert_eq!(quorum_size(5), 3);
    }

    #[tokio::test]
    async fn subsumed_transitions_fall_back_to_stored() {
        let scope = solo_scope().await;
        let ins = scope.make_instance(vec![test_instruction("a", 1)]);

        let mut st = scope.state_write().await;
        let _ = scope.apply_commit(&mut st, &ins, false).unwrap();

        // an attempt the local state already subsumes yields the stored copy
        let result = scope.apply_accept(&mut st, &ins, false);
        let stored = stored_if_subsumed(&st, ins.id, result).unwrap();
        assert_eq!(stored.status, InstanceStatus::Committed);

        // every other error still propagates
        let timeout: Result<Instance> = Err(ConsensusError::Timeout { phase: "accept" });
        assert!(stored_if_subsumed(&st, ins.id, timeout).is_err());
    }

    #[tokio::test]
    async fn persisted_image_matches_observable_state() {
        use crate::testing::Mesh;

        let mesh = Mesh::new(1, ManagerConfig::fast());
        let node = mesh.nodes[0];
        let scope = mesh.manager(node).scope("test");
        let log = mesh.log(node);

        let _ = scope.execute_query(vec![test_instruction("a", 1)]).await.unwrap();
        let persists_after_first = log.persist_count();
        assert!(persists_after_first > 0);

        let image: PersistedScope =
            meridian_utils::codec::decode(&log.last_image().unwrap()).unwrap();
        assert_eq!(image.name, "test");
        assert_eq!(image.instances.len(), 1);
        assert_eq!(image.executed.len(), 1);
        assert!(image.in_progress.is_empty());
        assert!(image.committed.is_empty());
        assert_eq!(image.max_seq, Seq::from(1));

        let (id, ins) = &image.instances[0];
        assert_eq!(*id, ins.id);
        assert_eq!(ins.status, InstanceStatus::Executed);
    }
}
