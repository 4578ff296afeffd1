//! Accept: runs when the PreAccept attributes were modified. Pins the merged
//! dependencies and sequence at a quorum before Commit.

use super::{quorum_size, Scope};
use crate::error::{ConsensusError, Result};
use crate::store::DataStore;
use crate::types::{
    AcceptRequest, AcceptResponse, Ballot, Instance, NodeId, Request, Response,
};

use std::sync::Arc;

use meridian_utils::chan;
use meridian_utils::clone;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

impl<S: DataStore> Scope<S> {
    /// Coordinator side. Transitions locally (incrementing the ballot),
    /// persists, and requires a quorum of acceptances.
    pub(crate) async fn run_accept_phase(&self, proposal: Instance) -> Result<()> {
        debug!(id = ?proposal.id, scope = %self.name(), "accept phase started");

        let stored = {
            let mut st = self.state_write().await;
            let result = self.apply_accept(&mut st, &proposal, true);
            let stored = super::stored_if_subsumed(&st, proposal.id, result)?;
            self.persist_locked(&st).await?;
            stored
        };

        // the quorum below durably records the dependency edges
        self.dependency_manager().report_acknowledged(&stored);

        let replicas = self.peer_replicas();
        if replicas.is_empty() {
            return Ok(());
        }

        let missing = self.forwardable_dependencies(&stored).await;
        self.send_accept(&stored, missing, &replicas).await
    }

    /// Dependency instances a replica may not have seen yet: anything still
    /// in flight is forwarded alongside the accept.
    async fn forwardable_dependencies(&self, ins: &Instance) -> Vec<Instance> {
        let st = self.state_read().await;
        ins.dependencies
            .iter()
            .filter(|dep| st.in_progress.contains(*dep))
            .filter_map(|dep| st.instances.get(dep).cloned())
            .collect()
    }

    async fn send_accept(
        &self,
        ins: &Instance,
        missing: Vec<Instance>,
        replicas: &[NodeId],
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(replicas.len());
        for &target in replicas {
            let transport = Arc::clone(self.transport());
            let request = Request::Accept(AcceptRequest {
                scope: self.name().to_owned(),
                instance: ins.clone(),
                missing_instances: missing.clone(),
            });
            clone!(tx);
            tokio::spawn(async move {
                match transport.send(target, request).await {
                    Ok(Response::Accept(resp)) => {
                        let _ = tx.send(resp).await;
                    }
                    Ok(_) => warn!(?target, "unexpected accept response type"),
                    Err(err) => warn!(?target, %err, "error receiving accept response"),
                }
            });
        }
        drop(tx);

        let needed = quorum_size(replicas.len() + 1) - 1;
        let deadline = Instant::now() + self.config().accept_timeout();
        let mut responses = Vec::with_capacity(replicas.len());
        while responses.len() < needed {
            match chan::recv_until(&mut rx, deadline).await {
                Ok(Some(resp)) => responses.push(resp),
                Ok(None) | Err(_) => {
                    return Err(ConsensusError::Timeout { phase: "accept" });
                }
            }
        }

        if responses.iter().any(|r| !r.accepted) {
            let highest =
                responses.iter().map(|r| r.max_ballot).max().unwrap_or(Ballot::ZERO);
            self.absorb_ballot(ins.id, highest).await?;
            debug!(id = ?ins.id, ?highest, "accept rejected by ballot");
            return Err(ConsensusError::Ballot { highest });
        }
        Ok(())
    }

    /// Replica side. Adopts the leader's attributes wholesale, absorbs any
    /// forwarded missing instances, persists, and acknowledges.
    pub(crate) async fn handle_accept(&self, request: AcceptRequest) -> Result<AcceptResponse> {
        let mut st = self.state_write().await;
        let incoming = request.instance;

        if let Some(existing) = st.instances.get(&incoming.id) {
            if existing.max_ballot >= incoming.max_ballot {
                debug!(id = ?incoming.id, "accept rejected, stale ballot");
                return Ok(AcceptResponse { accepted: false, max_ballot: existing.max_ballot });
            }
        }

        let stored = match self.apply_accept(&mut st, &incoming, false) {
            Ok(stored) => Some(stored),
            Err(err) if err.is_invalid_status() => None,
            Err(err) => return Err(err),
        };

        self.add_missing_instances(&mut st, request.missing_instances);
        self.persist_locked(&st).await?;

        if let Some(stored) = &stored {
            self.dependency_manager().report_acknowledged(stored);
        }

        let max_ballot = st
            .instances
            .get(&incoming.id)
            .map(|i| i.max_ballot)
            .unwrap_or(incoming.max_ballot);
        Ok(AcceptResponse { accepted: true, max_ballot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing::{solo_scope, test_instruction};
    use crate::types::{InstanceId, InstanceStatus, Seq};

    fn accept_request(ins: &Instance) -> AcceptRequest {
        AcceptRequest {
            scope: "test".into(),
            instance: ins.clone(),
            missing_instances: Vec::new(),
        }
    }

    #[tokio::test]
    async fn handle_adopts_attributes() {
        let scope = solo_scope().await;
        let mut ins = Instance::placeholder(InstanceId::random(), NodeId::random());
        ins.commands = vec![test_instruction("a", 1)];
        ins.max_ballot = Ballot::from(2);
        let dep = InstanceId::random();
        let _ = ins.dependencies.insert(dep);
        ins.sequence = Seq::from(4);

        let resp = scope.handle_accept(accept_request(&ins)).await.unwrap();
        assert!(resp.accepted);

        let stored = scope.snapshot_copy(ins.id).await.unwrap();
        assert_eq!(stored.status, InstanceStatus::Accepted);
        assert!(stored.dependencies.contains(&dep));
        assert_eq!(stored.sequence, Seq::from(4));
    }

    #[tokio::test]
    async fn handle_rejects_stale_ballot() {
        let scope = solo_scope().await;
        let mut ins = Instance::placeholder(InstanceId::random(), NodeId::random());
        ins.commands = vec![test_instruction("a", 1)];
        ins.max_ballot = Ballot::from(5);

        let first = scope.handle_accept(accept_request(&ins)).await.unwrap();
        assert!(first.accepted);

        ins.max_ballot = Ballot::from(5);
        let second = scope.handle_accept(accept_request(&ins)).await.unwrap();
        assert!(!second.accepted);
        assert_eq!(second.max_ballot, Ballot::from(5));
    }

    #[tokio::test]
    async fn handle_absorbs_higher_status_silently() {
        let scope = solo_scope().await;
        let mut ins = Instance::placeholder(InstanceId::random(), NodeId::random());
        ins.commands = vec![test_instruction("a", 1)];
        {
            let mut st = scope.state_write().await;
            let _ = scope.apply_commit(&mut st, &ins, false).unwrap();
        }

        ins.max_ballot = Ballot::from(9);
        ins.sequence = Seq::from(42);
        let resp = scope.handle_accept(accept_request(&ins)).await.unwrap();
        assert!(resp.accepted);

        let stored = scope.snapshot_copy(ins.id).await.unwrap();
        assert_eq!(stored.status, InstanceStatus::Committed);
        assert_ne!(stored.sequence, Seq::from(42));
    }

    #[tokio::test]
    async fn handle_registers_missing_instances() {
        let scope = solo_scope().await;
        let mut missing = Instance::placeholder(InstanceId::random(), NodeId::random());
        missing.commands = vec![test_instruction("b", 2)];
        missing.status = InstanceStatus::PreAccepted;

        let mut ins = Instance::placeholder(InstanceId::random(), NodeId::random());
        ins.commands = vec![test_instruction("a", 1)];
        ins.max_ballot = Ballot::from(1);

        let request = AcceptRequest {
            scope: "test".into(),
            instance: ins.clone(),
            missing_instances: vec![missing.clone()],
        };
        let resp = scope.handle_accept(request).await.unwrap();
        assert!(resp.accepted);
        assert_eq!(
            scope.status_of(missing.id).await,
            Some(InstanceStatus::PreAccepted)
        );
    }
}
