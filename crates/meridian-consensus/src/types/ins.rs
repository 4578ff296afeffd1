use super::{Ballot, InstanceId, Instruction, NodeId, Seq};

use meridian_utils::vecset::VecSet;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Lifecycle state of an instance. Totally ordered; never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InstanceStatus {
    PreAccepted = 1,
    Accepted = 2,
    Committed = 3,
    Executed = 4,
}

/// A proposed command plus its consensus metadata.
///
/// Instances are plain data: cross-references are ids into the scope's
/// instance map, and the per-instance events and locks live in a separate
/// registry so an instance can be cloned for the wire or the durable log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    /// The node that first coordinated this instance.
    pub leader_id: NodeId,
    /// Replicas that may take over after a commit timeout, in takeover order.
    /// Shuffled at creation so concurrent recoveries spread across the cluster.
    pub successors: Vec<NodeId>,
    pub commands: Vec<Instruction>,
    /// Instances that must execute before this one.
    pub dependencies: VecSet<InstanceId>,
    pub sequence: Seq,
    /// Highest ballot ever seen for this instance.
    pub max_ballot: Ballot,
    pub status: InstanceStatus,
    /// Set when recovery decided the instance must occupy its slot in the
    /// dependency graph without applying its instructions.
    pub noop: bool,
    /// Replica-side: locally computed attributes agreed with the leader's.
    pub dependency_match: bool,
    /// True when every instruction is read-only.
    pub read_only: bool,
    /// After this point recovery may run. Not persisted.
    #[serde(skip)]
    pub commit_deadline: Option<Instant>,
    /// After this point a non-leader may apply the instance itself.
    /// Not persisted.
    #[serde(skip)]
    pub execute_deadline: Option<Instant>,
}

impl Instance {
    /// A placeholder for an instance known only by id, materialized so that
    /// recovery can run against it.
    #[must_use]
    pub fn placeholder(id: InstanceId, leader_id: NodeId) -> Self {
        Self {
            id,
            leader_id,
            successors: Vec::new(),
            commands: Vec::new(),
            dependencies: VecSet::new(),
            sequence: Seq::ZERO,
            max_ballot: Ballot::ZERO,
            status: InstanceStatus::PreAccepted,
            noop: false,
            dependency_match: false,
            read_only: false,
            commit_deadline: None,
            execute_deadline: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn commit_deadline_passed(&self, now: Instant) -> bool {
        self.commit_deadline.map_or(true, |d| now >= d)
    }
}
