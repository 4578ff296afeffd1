use crate::types::NodeId;

/// Cluster topology as seen by the consensus core.
///
/// The replica set returned for a scope is assumed stable for the lifetime
/// of any instance in it; membership changes mid-instance are out of scope.
pub trait Topology: Send + Sync + 'static {
    /// The identity of this node.
    fn local_id(&self) -> NodeId;

    /// The ordered set of replica endpoints participating in a scope,
    /// including the local node when it is a participant.
    fn replicas_for(&self, scope: &str) -> Vec<NodeId>;
}
