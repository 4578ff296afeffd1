//! PreAccept: the first round. The coordinator proposes attributes, every
//! replica answers with its own view, and agreement lets the coordinator
//! skip Accept entirely (the fast path).

use super::{quorum_size, Scope};
use crate::error::{ConsensusError, Result};
use crate::store::DataStore;
use crate::types::{
    Ballot, Instance, InstanceId, InstanceStatus, NodeId, PreAcceptRequest, PreAcceptResponse,
    Request, Response,
};

use std::sync::Arc;

use meridian_utils::chan;
use meridian_utils::clone;
use meridian_utils::cmp::max_assign;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

impl<S: DataStore> Scope<S> {
    /// Coordinator side. Computes attributes, transitions locally, gathers a
    /// quorum, and merges the returned attributes. Returns whether the
    /// Accept phase must run.
    pub(crate) async fn run_pre_accept_phase(
        &self,
        mut proposal: Instance,
    ) -> Result<bool> {
        debug!(id = ?proposal.id, scope = %self.name(), "pre-accept phase started");

        let stored = {
            let mut st = self.state_write().await;

            // settle attributes: what the dependency manager reports now,
            // merged with anything the proposal already carried (a recovery
            // rerun must not lose the reference instance's attributes)
            let mut deps = self.dependency_manager().get_and_set_deps(&proposal);
            deps.union(&proposal.dependencies);
            let _ = deps.remove(&proposal.id);
            proposal.dependencies = deps;
            max_assign(&mut proposal.sequence, st.max_seq.add_one());

            let result = self.apply_pre_accept(&mut st, &proposal, true);
            let stored = super::stored_if_subsumed(&st, proposal.id, result)?;
            self.persist_locked(&st).await?;
            stored
        };

        let replicas = self.peer_replicas();
        if replicas.is_empty() {
            // single-replica scope: quorum of one, nothing to merge
            return Ok(false);
        }

        let responses = self.send_pre_accept(&stored, &replicas).await?;
        self.merge_pre_accept_attributes(&stored, responses).await
    }

    async fn send_pre_accept(
        &self,
        ins: &Instance,
        replicas: &[NodeId],
    ) -> Result<Vec<PreAcceptResponse>> {
        let (tx, mut rx) = mpsc::channel(replicas.len());
        for &target in replicas {
            let transport = Arc::clone(self.transport());
            let request = Request::PreAccept(PreAcceptRequest {
                scope: self.name().to_owned(),
                instance: ins.clone(),
            });
            clone!(tx);
            tokio::spawn(async move {
                match transport.send(target, request).await {
                    Ok(Response::PreAccept(resp)) => {
                        let _ = tx.send(resp).await;
                    }
                    Ok(_) => warn!(?target, "unexpected pre-accept response type"),
                    Err(err) => warn!(?target, %err, "error receiving pre-accept response"),
                }
            });
        }
        drop(tx);

        let needed = quorum_size(replicas.len() + 1) - 1;
        let deadline = Instant::now() + self.config().pre_accept_timeout();
        let mut responses = Vec::with_capacity(replicas.len());
        while responses.len() < needed {
            match chan::recv_until(&mut rx, deadline).await {
                Ok(Some(resp)) => responses.push(resp),
                Ok(None) | Err(_) => {
                    return Err(ConsensusError::Timeout { phase: "pre-accept" });
                }
            }
        }

        if responses.iter().any(|r| !r.accepted) {
            let highest =
                responses.iter().map(|r| r.max_ballot).max().unwrap_or(Ballot::ZERO);
            self.absorb_ballot(ins.id, highest).await?;
            debug!(id = ?ins.id, ?highest, "pre-accept rejected by ballot");
            return Err(ConsensusError::Ballot { highest });
        }
        Ok(responses)
    }

    /// Merges replica attributes into the local instance: dependencies are
    /// unioned, the sequence takes the maximum, and missing instances
    /// reported by replicas are absorbed. Returns whether Accept is
    /// required: the merge changed something, or some replica's locally
    /// computed attributes disagreed with the leader's.
    pub(crate) async fn merge_pre_accept_attributes(
        &self,
        sent: &Instance,
        responses: Vec<PreAcceptResponse>,
    ) -> Result<bool> {
        let mut merged_deps = sent.dependencies.clone();
        let mut merged_seq = sent.sequence;
        let mut all_match = true;
        let mut missing = Vec::new();

        for resp in responses {
            match resp.instance {
                Some(remote) => {
                    if !remote.dependency_match {
                        all_match = false;
                    }
                    merged_deps.union(&remote.dependencies);
                    max_assign(&mut merged_seq, remote.sequence);
                }
                None => all_match = false,
            }
            missing.extend(resp.missing_instances);
        }
        let _ = merged_deps.remove(&sent.id);

        let changes = merged_deps != sent.dependencies || merged_seq != sent.sequence;

        let mut st = self.state_write().await;
        if changes {
            if let Some(entry) = st.instances.get_mut(&sent.id) {
                entry.dependencies = merged_deps;
                entry.sequence = merged_seq;
            }
            max_assign(&mut st.max_seq, merged_seq);
        }
        self.add_missing_instances(&mut st, missing);
        self.persist_locked(&st).await?;

        debug!(id = ?sent.id, changes, all_match, "pre-accept responses merged");
        Ok(changes || !all_match)
    }

    /// Replica side. Recomputes the attributes locally, stores the instance
    /// pre-accepted, and reports back its own view plus any dependencies the
    /// leader did not list.
    pub(crate) async fn handle_pre_accept(
        &self,
        request: PreAcceptRequest,
    ) -> Result<PreAcceptResponse> {
        let mut st = self.state_write().await;
        let incoming = request.instance;

        if let Some(existing) = st.instances.get_mut(&incoming.id) {
            if existing.max_ballot >= incoming.max_ballot {
                debug!(id = ?incoming.id, "pre-accept rejected, stale ballot");
                return Ok(PreAcceptResponse {
                    accepted: false,
                    max_ballot: existing.max_ballot,
                    instance: Some(existing.clone()),
                    missing_instances: Vec::new(),
                });
            }
            if existing.status > InstanceStatus::PreAccepted {
                // already accepted or committed here; answer with the local
                // attributes so the coordinator can catch up, and never
                // transition backwards
                existing.max_ballot = incoming.max_ballot;
                let copy = existing.clone();
                self.persist_locked(&st).await?;
                return Ok(PreAcceptResponse {
                    accepted: true,
                    max_ballot: copy.max_ballot,
                    instance: Some(copy),
                    missing_instances: Vec::new(),
                });
            }
        }

        let leader_deps = incoming.dependencies.clone();
        let leader_seq = incoming.sequence;

        // this replica's own view of the attributes; the leader is the one
        // that merges the views
        let mut ins = incoming;
        let local_deps = self.dependency_manager().get_and_set_deps(&ins);
        let local_seq = st.max_seq.add_one();

        ins.dependency_match = local_deps == leader_deps && local_seq == leader_seq;
        let local_only: Vec<InstanceId> =
            local_deps.iter().filter(|d| !leader_deps.contains(*d)).copied().collect();
        ins.dependencies = local_deps;
        ins.sequence = local_seq.max(leader_seq);
        let stored = self.apply_pre_accept(&mut st, &ins, false)?;

        let missing_instances: Vec<Instance> = local_only
            .iter()
            .filter_map(|dep| st.instances.get(dep).cloned())
            .collect();

        self.persist_locked(&st).await?;

        debug!(
            id = ?stored.id,
            dependency_match = stored.dependency_match,
            missing = missing_instances.len(),
            "pre-accept handled"
        );
        Ok(PreAcceptResponse {
            accepted: true,
            max_ballot: stored.max_ballot,
            instance: Some(stored),
            missing_instances,
        })
    }
}
