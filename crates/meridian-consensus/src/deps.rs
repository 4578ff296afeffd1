//! Per-key dependency tracking.
//!
//! For every key the manager keeps the live instances that touched it, split
//! by access mode, plus two bookkeeping sets: `acknowledged` (a quorum has
//! durably recorded the dependency edge) and `executed` (the ordering has
//! taken effect). An entry leaves the live sets only once it is in both;
//! either alone is insufficient, because a future instance could still need
//! the edge.
//!
//! Keys are hierarchical: `a:b:c` occupies a tree, and a write to a parent
//! interferes with accesses to its descendants.

use crate::types::{Instance, InstanceId};

use std::collections::HashMap;

use meridian_utils::lock::with_mutex;
use meridian_utils::vecset::VecSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct KeyMap {
    nodes: HashMap<String, KeyNode>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct KeyNode {
    writes: VecSet<InstanceId>,
    reads: VecSet<InstanceId>,
    acknowledged: VecSet<InstanceId>,
    executed: VecSet<InstanceId>,
    children: KeyMap,
}

impl KeyNode {
    /// Dependencies this node contributes: writes always, reads only when
    /// the asking instance is itself a write.
    fn collect_local(&self, read_only: bool, out: &mut VecSet<InstanceId>) {
        out.union(&self.writes);
        if !read_only {
            out.union(&self.reads);
        }
    }

    fn collect_subtree(&self, read_only: bool, out: &mut VecSet<InstanceId>) {
        for child in self.children.nodes.values() {
            child.collect_local(read_only, out);
            child.collect_subtree(read_only, out);
        }
    }

    fn register(&mut self, id: InstanceId, read_only: bool) {
        if read_only {
            let _ = self.reads.insert(id);
        } else {
            let _ = self.writes.insert(id);
        }
    }

    /// Drops entries that are both acknowledged and executed; they are no
    /// longer needed as dependencies of future instances.
    fn prune_ex_acked(&mut self) {
        let mut retired = Vec::new();
        for id in self.acknowledged.iter() {
            if self.executed.contains(id) {
                retired.push(*id);
            }
        }
        for id in &retired {
            let _ = self.writes.remove(id);
            let _ = self.reads.remove(id);
            let _ = self.acknowledged.remove(id);
            let _ = self.executed.remove(id);
        }
    }
}

impl KeyMap {
    fn node_mut(&mut self, segment: &str) -> &mut KeyNode {
        self.nodes.entry(segment.to_owned()).or_default()
    }

    /// Walks to the node for the last path segment, creating nodes on the way.
    fn leaf_mut(&mut self, path: &[&str]) -> &mut KeyNode {
        let (first, rest) = path.split_first().expect("empty key path");
        let node = self.node_mut(first);
        if rest.is_empty() {
            node
        } else {
            node.children.leaf_mut(rest)
        }
    }

    fn get_and_set(
        &mut self,
        path: &[&str],
        id: InstanceId,
        read_only: bool,
        out: &mut VecSet<InstanceId>,
    ) {
        let (first, rest) = path.split_first().expect("empty key path");
        let node = self.node_mut(first);
        node.collect_local(read_only, out);
        if rest.is_empty() {
            node.collect_subtree(read_only, out);
            node.prune_ex_acked();
            node.register(id, read_only);
        } else {
            node.children.get_and_set(rest, id, read_only, out);
        }
    }
}

/// Tracks, per key and access mode, the live instances a new instance must
/// depend on.
///
/// Has its own lock; the documented order is scope lock before dependency
/// lock, never the reverse.
pub struct DependencyManager {
    root: Mutex<KeyMap>,
}

impl DependencyManager {
    #[must_use]
    pub fn new() -> Self {
        Self { root: Mutex::new(KeyMap::default()) }
    }

    /// Computes the dependencies the instance should carry and registers it
    /// so that future instances depend on it. An instance never depends on
    /// itself.
    #[must_use]
    pub fn get_and_set_deps(&self, ins: &Instance) -> VecSet<InstanceId> {
        with_mutex(&self.root, |root| {
            let mut deps = VecSet::new();
            for instr in &ins.commands {
                root.get_and_set(&instr.key_path(), ins.id, ins.read_only, &mut deps);
            }
            let _ = deps.remove(&ins.id);
            deps
        })
    }

    /// Registers the instance under its keys without computing dependencies;
    /// used when materializing an instance forwarded by a remote replica.
    pub fn add_dependency(&self, ins: &Instance) {
        with_mutex(&self.root, |root| {
            for instr in &ins.commands {
                root.leaf_mut(&instr.key_path()).register(ins.id, ins.read_only);
            }
        })
    }

    /// Marks the instance's dependencies acknowledged under its keys: a
    /// quorum has durably recorded the dependency edges.
    pub fn report_acknowledged(&self, ins: &Instance) {
        with_mutex(&self.root, |root| {
            for instr in &ins.commands {
                let node = root.leaf_mut(&instr.key_path());
                for dep in ins.dependencies.iter() {
                    if *dep != ins.id {
                        let _ = node.acknowledged.insert(*dep);
                    }
                }
            }
        })
    }

    /// Marks the instance executed under its keys.
    pub fn report_executed(&self, ins: &Instance) {
        with_mutex(&self.root, |root| {
            for instr in &ins.commands {
                let _ = root.leaf_mut(&instr.key_path()).executed.insert(ins.id);
            }
        })
    }

    /// A serializable copy of the key map, for the persistence barrier.
    pub(crate) fn snapshot(&self) -> KeyMap {
        with_mutex(&self.root, |root| root.clone())
    }
}

impl Default for DependencyManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::types::{Instruction, NodeId};

    fn instance_for(key: &str, read_only: bool) -> Instance {
        let mut ins = Instance::placeholder(InstanceId::random(), NodeId::random());
        ins.commands = vec![Instruction::new("SET", key, vec![], 0)];
        ins.read_only = read_only;
        ins
    }

    #[test]
    fn new_root_node_is_created() {
        let mngr = DependencyManager::new();
        let ins = instance_for("a", false);

        let deps = mngr.get_and_set_deps(&ins);
        assert!(deps.is_empty());

        let snapshot = mngr.snapshot();
        assert!(snapshot.nodes.contains_key("a"));
        assert!(snapshot.nodes["a"].writes.contains(&ins.id));
    }

    #[test]
    fn existing_node_contributes_prior_writes() {
        let mngr = DependencyManager::new();
        let prior = instance_for("a", false);
        let _ = mngr.get_and_set_deps(&prior);

        let next = instance_for("a", false);
        let deps = mngr.get_and_set_deps(&next);
        assert_eq!(deps.as_slice(), &[prior.id]);
    }

    #[test]
    fn reads_are_registered_for_read_only_instances() {
        let mngr = DependencyManager::new();
        let read = instance_for("a", true);
        let _ = mngr.get_and_set_deps(&read);

        let snapshot = mngr.snapshot();
        assert!(snapshot.nodes["a"].reads.contains(&read.id));
        assert!(!snapshot.nodes["a"].writes.contains(&read.id));
    }

    #[test]
    fn no_self_dependence() {
        let mngr = DependencyManager::new();
        let ins = instance_for("a", false);
        // seed the node as if the instance were already registered
        mngr.add_dependency(&ins);

        let deps = mngr.get_and_set_deps(&ins);
        assert!(!deps.contains(&ins.id));
    }

    #[test]
    fn read_deps_are_writes_only() {
        let mngr = DependencyManager::new();
        let write = instance_for("a", false);
        let read = instance_for("a", true);
        let _ = mngr.get_and_set_deps(&write);
        let _ = mngr.get_and_set_deps(&read);

        let next_read = instance_for("a", true);
        let deps = mngr.get_and_set_deps(&next_read);
        assert!(deps.contains(&write.id));
        assert!(!deps.contains(&read.id));
    }

    #[test]
    fn write_deps_include_reads_and_writes() {
        let mngr = DependencyManager::new();
        let write = instance_for("a", false);
        let read = instance_for("a", true);
        let _ = mngr.get_and_set_deps(&write);
        let _ = mngr.get_and_set_deps(&read);

        let next_write = instance_for("a", false);
        let deps = mngr.get_and_set_deps(&next_write);
        assert!(deps.contains(&write.id));
        assert!(deps.contains(&read.id));
    }

    #[test]
    fn acknowledged_marks_dependencies_not_self() {
        let mngr = DependencyManager::new();
        let dep_id = InstanceId::random();
        let mut ins = instance_for("a", false);
        let _ = ins.dependencies.insert(ins.id);
        let _ = ins.dependencies.insert(dep_id);

        mngr.report_acknowledged(&ins);

        let snapshot = mngr.snapshot();
        assert!(snapshot.nodes["a"].acknowledged.contains(&dep_id));
        assert!(!snapshot.nodes["a"].acknowledged.contains(&ins.id));
    }

    #[test]
    fn executed_is_recorded() {
        let mngr = DependencyManager::new();
        let ins = instance_for("a", false);
        mngr.report_executed(&ins);

        let snapshot = mngr.snapshot();
        assert!(snapshot.nodes["a"].executed.contains(&ins.id));
    }

    #[test]
    fn ex_acked_entries_are_pruned() {
        let mngr = DependencyManager::new();
        let executed_only = instance_for("a", false);
        let acked_only = instance_for("a", false);
        let ex_acked = instance_for("a", false);
        for ins in [&executed_only, &acked_only, &ex_acked] {
            mngr.add_dependency(ins);
        }
        mngr.report_executed(&executed_only);
        mngr.report_executed(&ex_acked);
        {
            // acknowledge via a synthetic dependent
            let mut dependent = instance_for("a", false);
            let _ = dependent.dependencies.insert(acked_only.id);
            let _ = dependent.dependencies.insert(ex_acked.id);
            mngr.report_acknowledged(&dependent);
        }

        let probe = instance_for("a", false);
        let deps = mngr.get_and_set_deps(&probe);

        // all three were live at computation time
        assert!(deps.contains(&executed_only.id));
        assert!(deps.contains(&acked_only.id));
        assert!(deps.contains(&ex_acked.id));

        // only the ex-acked entry was retired
        let snapshot = mngr.snapshot();
        let node = &snapshot.nodes["a"];
        assert!(node.writes.contains(&executed_only.id));
        assert!(node.writes.contains(&acked_only.id));
        assert!(!node.writes.contains(&ex_acked.id));
        assert!(node.executed.contains(&executed_only.id));
        assert!(!node.executed.contains(&ex_acked.id));
        assert!(node.acknowledged.contains(&acked_only.id));
        assert!(!node.acknowledged.contains(&ex_acked.id));
    }

    #[test]
    fn single_key_lifecycle() {
        let mngr = DependencyManager::new();
        let mut expected: Vec<InstanceId> = Vec::new();

        let new_write = || {
            let mut ins = instance_for("a", false);
            ins.dependencies = mngr.get_and_set_deps(&ins);
            ins
        };

        let i0 = new_write();
        assert!(i0.dependencies.is_empty());

        expected.push(i0.id);
        let i1 = new_write();
        assert_eq!(i1.dependencies.as_slice(), VecSet::from_vec(expected.clone()).as_slice());

        mngr.report_acknowledged(&i1); // acknowledges i0

        expected.push(i1.id);
        let i2 = new_write();
        assert_eq!(i2.dependencies.as_slice(), VecSet::from_vec(expected.clone()).as_slice());

        mngr.report_executed(&i0);

        expected.push(i2.id);
        let i3 = new_write();
        assert_eq!(i3.dependencies.as_slice(), VecSet::from_vec(expected.clone()).as_slice());

        // i0 is now ex-acked; the next computation sees it once more and
        // then retires it
        expected.push(i3.id);
        let i4 = new_write();
        assert_eq!(i4.dependencies.as_slice(), VecSet::from_vec(expected.clone()).as_slice());

        let snapshot = mngr.snapshot();
        assert!(!snapshot.nodes["a"].writes.contains(&i0.id));

        // and i5 no longer depends on i0
        let i5 = {
            let mut ins = instance_for("a", false);
            ins.dependencies = mngr.get_and_set_deps(&ins);
            ins
        };
        assert!(!i5.dependencies.contains(&i0.id));
        assert!(i5.dependencies.contains(&i4.id));
    }

    #[test]
    fn randomized_instances_never_self_depend() {
        use rand::Rng;

        let mngr = DependencyManager::new();
        let keys = ["a", "a:b", "a:b:c", "a:b1", "d", "d:e:f"];
        let mut rng = rand::thread_rng();

        for _ in 0..500 {
            let key = keys[rng.gen_range(0..keys.len())];
            let read_only = rng.gen_bool(0.5);
            let ins = instance_for(key, read_only);
            let deps = mngr.get_and_set_deps(&ins);
            assert!(!deps.contains(&ins.id), "instance depends on itself");

            if rng.gen_bool(0.3) {
                mngr.report_executed(&ins);
            }
            if rng.gen_bool(0.3) {
                let mut dependent = instance_for(key, false);
                dependent.dependencies = deps;
                mngr.report_acknowledged(&dependent);
            }
        }
    }

    #[test]
    fn hierarchical_deps() {
        let mngr = DependencyManager::new();
        let add = |key: &str, read_only: bool| {
            let ins = instance_for(key, read_only);
            let _ = mngr.get_and_set_deps(&ins);
            ins.id
        };

        let a_write = add("a", false);
        let a_read = add("a", true);
        let ab_write = add("a:b", false);
        let ab_read = add("a:b", true);
        let abc_write = add("a:b:c", false);
        let abc_read = add("a:b:c", true);
        let abcd_write = add("a:b:c:d", false);
        let abcd_read = add("a:b:c:d", true);

        // sibling accesses must never appear
        let sib_write = add("a:b1", false);
        let sib_read = add("a:b1", true);

        let read_probe = instance_for("a:b", true);
        let read_deps = mngr.get_and_set_deps(&read_probe);
        let expected: VecSet<InstanceId> =
            VecSet::from_vec(vec![a_write, ab_write, abc_write, abcd_write]);
        assert_eq!(read_deps.as_slice(), expected.as_slice());

        let write_probe = instance_for("a:b", false);
        let write_deps = mngr.get_and_set_deps(&write_probe);
        let expected: VecSet<InstanceId> = VecSet::from_vec(vec![
            a_write,
            a_read,
            ab_write,
            ab_read,
            abc_write,
            abc_read,
            abcd_write,
            abcd_read,
            read_probe.id,
        ]);
        assert_eq!(write_deps.as_slice(), expected.as_slice());
        assert!(!write_deps.contains(&sib_write));
        assert!(!write_deps.contains(&sib_read));
    }
}
