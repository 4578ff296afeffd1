//! Deterministic execution of the committed dependency graph.
//!
//! Given a committed instance, the executor orders the transitive dependency
//! closure by a depth-first traversal with `(sequence, id)` tiebreaks, waits
//! out (or recovers) any dependency that has not committed, and applies each
//! instance exactly once.

use super::{Scope, ScopeState};
use crate::error::{ConsensusError, Result};
use crate::store::DataStore;
use crate::types::{Instance, InstanceId, InstanceStatus};

use std::sync::Arc;

use fnv::{FnvHashMap, FnvHashSet};

use tokio::time::{sleep_until, Instant};
use tracing::debug;

enum Blocker {
    /// A dependency referenced by the closure that this replica has never
    /// materialized.
    Unknown(InstanceId),
    /// A known dependency that has not committed yet.
    Uncommitted(InstanceId),
}

/// The non-executed dependencies of `id`, in `(sequence, id)` order.
fn ordered_deps(st: &ScopeState, id: InstanceId) -> Vec<InstanceId> {
    let Some(ins) = st.instances.get(&id) else { return Vec::new() };
    let mut deps: Vec<&Instance> = ins
        .dependencies
        .iter()
        .filter_map(|dep| st.instances.get(dep))
        .filter(|dep| dep.status != InstanceStatus::Executed)
        .collect();
    deps.sort_by_key(|dep| (dep.sequence, dep.id));
    deps.iter().map(|dep| dep.id).collect()
}

/// Depth-first traversal over the non-executed closure, children visited in
/// `(sequence, id)` order; the target comes last.
///
/// Recovery can close interference loops (a recovered instance picks up
/// dependencies on instances proposed after it), so the traversal collapses
/// strongly connected components and orders the instances inside one by
/// `(sequence, id)`. The resulting order is the same from any entry point:
/// two interfering instances are applied in the same order on every replica.
fn execution_order(st: &ScopeState, target: InstanceId) -> Vec<InstanceId> {
    match st.instances.get(&target) {
        None => return Vec::new(),
        Some(ins) if ins.status == InstanceStatus::Executed => return Vec::new(),
        Some(_) => {}
    }

    enum Step {
        Visit(InstanceId, InstanceId),
        Finish(InstanceId),
    }

    let mut index = FnvHashMap::default();
    let mut lowlink: FnvHashMap<InstanceId, usize> = FnvHashMap::default();
    let mut on_stack = FnvHashSet::default();
    let mut component_stack: Vec<InstanceId> = Vec::new();
    let mut next_index = 0usize;
    let mut order = Vec::new();

    // explicit call frames: (node, sorted children, cursor)
    let mut frames: Vec<(InstanceId, Vec<InstanceId>, usize)> = Vec::new();

    let _ = index.insert(target, next_index);
    let _ = lowlink.insert(target, next_index);
    next_index += 1;
    let _ = on_stack.insert(target);
    component_stack.push(target);
    frames.push((target, ordered_deps(st, target), 0));

    loop {
        let step = {
            let Some(frame) = frames.last_mut() else { break };
            if frame.2 < frame.1.len() {
                let child = frame.1[frame.2];
                frame.2 += 1;
                Step::Visit(frame.0, child)
            } else {
                Step::Finish(frame.0)
            }
        };

        match step {
            Step::Visit(node, child) => {
                if !index.contains_key(&child) {
                    let _ = index.insert(child, next_index);
                    let _ = lowlink.insert(child, next_index);
                    next_index += 1;
                    let _ = on_stack.insert(child);
                    component_stack.push(child);
                    frames.push((child, ordered_deps(st, child), 0));
                } else if on_stack.contains(&child) {
                    let child_index = index[&child];
                    let low = lowlink.get_mut(&node).expect("node was indexed");
                    if child_index < *low {
                        *low = child_index;
                    }
                }
            }
            Step::Finish(node) => {
                let _ = frames.pop();
                let node_low = lowlink[&node];
                if node_low == index[&node] {
                    let mut component = Vec::new();
                    while let Some(member) = component_stack.pop() {
                        let _ = on_stack.remove(&member);
                        component.push(member);
                        if member == node {
                            break;
                        }
                    }
                    component.sort_by_key(|m| (st.instances[m].sequence, *m));
                    order.extend(component);
                }
                if let Some(parent) = frames.last() {
                    let low = lowlink.get_mut(&parent.0).expect("parent was indexed");
                    if node_low < *low {
                        *low = node_low;
                    }
                }
            }
        }
    }
    order
}

/// Finds the first thing preventing deterministic execution of `target`'s
/// closure: an unknown or uncommitted dependency.
fn find_blocker(st: &ScopeState, target: InstanceId) -> Option<Blocker> {
    let mut visited = FnvHashSet::default();
    let mut stack = vec![target];

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        match st.instances.get(&id) {
            None => return Some(Blocker::Unknown(id)),
            Some(ins) => {
                if ins.status == InstanceStatus::Executed {
                    continue;
                }
                if ins.status < InstanceStatus::Committed {
                    return Some(Blocker::Uncommitted(id));
                }
                for dep in ins.dependencies.iter() {
                    stack.push(*dep);
                }
            }
        }
    }
    None
}

impl<S: DataStore> Scope<S> {
    /// Executes the committed instance `id` and everything it transitively
    /// depends on, in dependency order. Returns the value the target
    /// produced, or `None` when the target was a noop or already applied.
    pub(crate) async fn execute_instance(
        &self,
        id: InstanceId,
    ) -> Result<Option<S::Value>> {
        loop {
            let blocker = {
                let st = self.state_read().await;
                find_blocker(&st, id)
            };
            match blocker {
                None => break,
                Some(Blocker::Unknown(dep)) => {
                    debug!(?id, ?dep, "dependency never seen locally, recovering");
                    let placeholder = Instance::placeholder(dep, self.local_id());
                    let _ = self.get_or_create(placeholder).await?;
                    self.recover_instance(dep).await?;
                }
                Some(Blocker::Uncommitted(dep)) => {
                    self.wait_for_dependency(dep).await?;
                }
            }
        }

        let order = {
            let st = self.state_read().await;
            execution_order(&st, id)
        };
        debug!(?id, chain = order.len(), "executing dependency chain");

        let mut result = None;
        for jid in order {
            if jid != id {
                self.await_leader_apply(jid).await;
            }
            let value = self.apply_instance(jid).await?;
            if jid == id {
                result = value;
            }
        }
        Ok(result)
    }

    /// Waits for an uncommitted dependency. The leader's own task gets the
    /// commit grace period when it is local; after that (or for remote
    /// leaders) recovery runs.
    async fn wait_for_dependency(&self, dep: InstanceId) -> Result<()> {
        let Some(ins) = self.snapshot_copy(dep).await else { return Ok(()) };
        if ins.status >= InstanceStatus::Committed {
            return Ok(());
        }

        let now = Instant::now();
        match ins.commit_deadline {
            Some(deadline)
                if ins.leader_id == self.local_id() && !ins.commit_deadline_passed(now) =>
            {
                let sync = self.sync_registry().handle(dep);
                tokio::select! {
                    _ = sync.commit_event.wait() => Ok(()),
                    _ = sleep_until(deadline) => {
                        debug!(?dep, "local leader missed its commit window, recovering");
                        self.recover_instance(dep).await
                    }
                }
            }
            _ => self.recover_instance(dep).await,
        }
    }

    /// Grants the leader's own task the execute grace period before a
    /// non-leader applies the instance itself.
    async fn await_leader_apply(&self, id: InstanceId) {
        let Some(ins) = self.snapshot_copy(id).await else { return };
        if ins.status == InstanceStatus::Executed || ins.leader_id != self.local_id() {
            return;
        }
        let Some(deadline) = ins.execute_deadline else { return };
        if Instant::now() >= deadline {
            return;
        }
        let sync = self.sync_registry().handle(id);
        tokio::select! {
            _ = sync.execute_event.wait() => {}
            _ = sleep_until(deadline) => {}
        }
    }

    /// Applies one committed instance: runs its instructions through the
    /// store (unless noop), marks it executed, moves it into the executed
    /// vector, reports the execution, persists, and signals waiters.
    /// Applying an already-executed instance is a no-op.
    pub(crate) async fn apply_instance(&self, id: InstanceId) -> Result<Option<S::Value>> {
        let sync = self.sync_registry().handle(id);
        let _execute_guard = sync.execute_lock.lock().await;

        let ins = {
            let st = self.state_read().await;
            match st.instances.get(&id) {
                None => {
                    return Err(ConsensusError::Other(anyhow::anyhow!(
                        "cannot apply unknown instance {id:?}"
                    )))
                }
                Some(ins) if ins.status == InstanceStatus::Executed => return Ok(None),
                Some(ins) if ins.status != InstanceStatus::Committed => {
                    return Err(ConsensusError::Other(anyhow::anyhow!(
                        "cannot apply instance {id:?} with status {:?}",
                        ins.status
                    )))
                }
                Some(ins) => ins.clone(),
            }
        };

        let mut value = None;
        if !ins.noop {
            for instruction in &ins.commands {
                value = Some(self.data_store().apply(instruction).await?);
            }
        }

        {
            let mut st = self.state_write().await;
            if let Some(entry) = st.instances.get_mut(&id) {
                entry.status = InstanceStatus::Executed;
            }
            let _ = st.committed.remove(&id);
            st.executed.push(id);
            self.dependency_manager().report_executed(&ins);
            self.persist_locked(&st).await?;
        }

        sync.execute_event.fire();
        debug!(?id, noop = ins.noop, "instance applied");
        Ok(value)
    }
}
