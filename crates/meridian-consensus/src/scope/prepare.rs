//! Explicit recovery. When an instance's commit deadline expires, a replica
//! first defers to the instance's successor list, then takes over: it raises
//! the ballot, asks a quorum what they have seen, and resumes the protocol
//! from the highest-status instance observed.

use super::{quorum_size, Scope};
use crate::error::{ConsensusError, Result};
use crate::store::DataStore;
use crate::types::{
    Ballot, Instance, InstanceId, InstanceStatus, PrepareRequest, PrepareResponse,
    PrepareSuccessorRequest, PrepareSuccessorResponse, Request, Response,
};

use std::sync::Arc;

use meridian_utils::chan;
use meridian_utils::clone;
use meridian_utils::cmp::max_assign;

use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};

/// Picks, among responses carrying the highest ballot, the instance with the
/// highest status. This reference instance drives the resumption.
pub(crate) fn analyze_prepare_responses(responses: &[PrepareResponse]) -> Option<Instance> {
    let max_ballot =
        responses.iter().filter_map(|r| r.instance.as_ref()).map(|i| i.max_ballot).max()?;
    responses
        .iter()
        .filter_map(|r| r.instance.as_ref())
        .filter(|i| i.max_ballot == max_ballot)
        .max_by_key(|i| i.status)
        .cloned()
}

impl<S: DataStore> Scope<S> {
    /// Recovery entry point: runs Prepare for an instance suspected of a
    /// failed coordinator, retrying ballot losses with a successor-ranked
    /// backoff. Returns once the instance is committed, recovery is in
    /// better hands, or the retries are exhausted.
    pub async fn recover_instance(&self, id: InstanceId) -> Result<()> {
        let successor_position = {
            let local = self.local_id();
            match self.snapshot_copy(id).await {
                Some(ins) => ins
                    .successors
                    .iter()
                    .position(|n| *n == local)
                    .unwrap_or(ins.successors.len()),
                None => 0,
            }
        };
        let sync = self.sync_registry().handle(id);

        for attempt in 0..self.config().ballot_failure_retries {
            if self.status_of(id).await.map_or(false, |s| s >= InstanceStatus::Committed) {
                return Ok(());
            }
            match self.phase_driver().prepare_phase(self, id).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_ballot() => {
                    let wait = self
                        .config()
                        .ballot_failure_wait()
                        .saturating_mul(successor_position as u32);
                    debug!(?id, attempt, ?wait, "prepare lost the ballot race, backing off");
                    tokio::select! {
                        _ = sync.commit_event.wait() => return Ok(()),
                        _ = sleep(wait) => {}
                    }
                }
                Err(err) => {
                    warn!(?id, attempt, %err, "recovery attempt failed");
                }
            }
        }
        Ok(())
    }

    /// One full prepare pass for the instance: materialize it if unknown,
    /// take the prepare lock, honor the commit grace period, defer to
    /// earlier successors, and only then run the prepare rounds.
    pub(crate) async fn run_prepare_phase(&self, id: InstanceId) -> Result<()> {
        let placeholder = Instance::placeholder(id, self.local_id());
        let _ = self.get_or_create(placeholder).await?;

        let sync = self.sync_registry().handle(id);
        let _prepare_guard = sync.prepare_lock.lock().await;

        if !self.prepare_should_proceed(id).await {
            return Ok(());
        }

        let mut deferred = self.defer_to_successor(id).await?;
        while !deferred {
            if self.status_of(id).await.map_or(true, |s| s >= InstanceStatus::Committed) {
                return Ok(());
            }
            tokio::select! {
                _ = sync.commit_event.wait() => return Ok(()),
                _ = sleep(self.config().successor_contact_interval()) => {}
            }
            deferred = self.defer_to_successor(id).await?;
        }

        // the deferral may have taken a while; re-check
        if !self.prepare_should_proceed(id).await {
            return Ok(());
        }

        debug!(?id, "prepare phase started");
        let result = self.run_prepare_rounds(id).await;
        debug!(?id, ok = result.is_ok(), "prepare phase completed");
        result
    }

    /// Whether recovery should run: the instance is uncommitted and its
    /// commit grace period has expired. Blocks until the deadline or the
    /// commit event, whichever comes first.
    async fn prepare_should_proceed(&self, id: InstanceId) -> bool {
        let Some(ins) = self.snapshot_copy(id).await else { return false };
        if ins.status >= InstanceStatus::Committed {
            return false;
        }
        let now = Instant::now();
        match ins.commit_deadline {
            Some(deadline) if !ins.commit_deadline_passed(now) => {
                debug!(?id, "waiting on the commit grace period");
                let sync = self.sync_registry().handle(id);
                tokio::select! {
                    _ = sync.commit_event.wait() => false,
                    _ = sleep_until(deadline) => {
                        self.status_of(id).await.map_or(false, |s| s < InstanceStatus::Committed)
                    }
                }
            }
            _ => true,
        }
    }

    /// Contacts the successors preceding the local node, in order. Returns
    /// `true` when this replica should proceed (or the instance committed),
    /// `false` when an earlier successor is alive and driving recovery.
    async fn defer_to_successor(&self, id: InstanceId) -> Result<bool> {
        let Some(ins) = self.snapshot_copy(id).await else { return Ok(true) };
        if ins.status >= InstanceStatus::Committed {
            return Ok(true);
        }

        let local = self.local_id();
        let replicas = self.peer_replicas();
        let sync = self.sync_registry().handle(id);

        for nid in &ins.successors {
            if *nid == local {
                break;
            }
            if !replicas.contains(nid) {
                continue;
            }

            debug!(?id, successor = ?nid, "contacting successor");
            let request = Request::PrepareSuccessor(PrepareSuccessorRequest {
                scope: self.name().to_owned(),
                instance_id: id,
            });
            let outcome = tokio::select! {
                result = self.transport().send(*nid, request) => Some(result),
                _ = sync.commit_event.wait() => return Ok(true),
                _ = sleep(self.config().successor_timeout()) => None,
            };

            let response = match outcome {
                None => {
                    debug!(?id, successor = ?nid, "successor timed out");
                    continue;
                }
                Some(Err(err)) => {
                    warn!(?id, successor = ?nid, %err, "successor unreachable");
                    continue;
                }
                Some(Ok(Response::PrepareSuccessor(resp))) => resp,
                Some(Ok(_)) => {
                    warn!(?id, successor = ?nid, "unexpected successor response type");
                    continue;
                }
            };

            let Some(remote) = response.instance else {
                // successor has never heard of the instance
                continue;
            };

            if remote.status > ins.status {
                match remote.status {
                    InstanceStatus::Accepted => {
                        let mut st = self.state_write().await;
                        if self.apply_accept(&mut st, &remote, false).is_ok() {
                            self.persist_locked(&st).await?;
                        }
                        return Ok(false);
                    }
                    InstanceStatus::Committed | InstanceStatus::Executed => {
                        let mut st = self.state_write().await;
                        if self.apply_commit(&mut st, &remote, false).is_ok() {
                            self.persist_locked(&st).await?;
                        }
                        drop(st);
                        self.sync_registry().handle(id).commit_event.fire();
                        return Ok(true);
                    }
                    _ => {}
                }
            }
            // the successor knows the instance and is at least as far along;
            // leave the recovery to it
            return Ok(false);
        }

        Ok(true)
    }

    /// The prepare exchange itself: raise the ballot, gather a quorum of
    /// views, and resume the protocol from the reference instance.
    async fn run_prepare_rounds(&self, id: InstanceId) -> Result<()> {
        if self.status_of(id).await.map_or(false, |s| s >= InstanceStatus::Committed) {
            return Ok(());
        }
        let responses = self.send_prepare(id).await?;
        self.apply_prepare_result(id, responses).await
    }

    async fn send_prepare(&self, id: InstanceId) -> Result<Vec<PrepareResponse>> {
        let ballot = {
            let mut st = self.state_write().await;
            let entry = st.instances.get_mut(&id).ok_or_else(|| {
                ConsensusError::Other(anyhow::anyhow!("preparing unknown instance {id:?}"))
            })?;
            entry.max_ballot = entry.max_ballot.add_one();
            let ballot = entry.max_ballot;
            self.persist_locked(&st).await?;
            ballot
        };

        let replicas = self.peer_replicas();
        if replicas.is_empty() {
            return Ok(Vec::new());
        }

        let (tx, mut rx) = mpsc::channel(replicas.len());
        for &target in &replicas {
            let transport = Arc::clone(self.transport());
            let request = Request::Prepare(PrepareRequest {
                scope: self.name().to_owned(),
                instance_id: id,
                ballot,
            });
            clone!(tx);
            tokio::spawn(async move {
                match transport.send(target, request).await {
                    Ok(Response::Prepare(resp)) => {
                        let _ = tx.send(resp).await;
                    }
                    Ok(_) => warn!(?target, "unexpected prepare response type"),
                    Err(err) => warn!(?target, %err, "error receiving prepare response"),
                }
            });
        }
        drop(tx);

        let needed = quorum_size(replicas.len() + 1) - 1;
        let deadline = Instant::now() + self.config().prepare_timeout();
        let mut responses = Vec::with_capacity(replicas.len());
        while responses.len() < needed {
            match chan::recv_until(&mut rx, deadline).await {
                Ok(Some(resp)) => responses.push(resp),
                Ok(None) | Err(_) => {
                    return Err(ConsensusError::Timeout { phase: "prepare" });
                }
            }
        }
        // take any stragglers that already arrived
        chan::drain_ready(&mut rx, &mut responses);
        Ok(responses)
    }

    /// First pass over the responses: absorb the highest ballot, and on any
    /// rejection adopt the highest-status instance seen before failing with
    /// a ballot error.
    async fn check_prepare_responses(
        &self,
        id: InstanceId,
        responses: &[PrepareResponse],
    ) -> Result<()> {
        let mut highest_ballot = Ballot::ZERO;
        let mut highest_status = InstanceStatus::PreAccepted;
        for resp in responses {
            if let Some(ins) = &resp.instance {
                max_assign(&mut highest_ballot, ins.max_ballot);
                max_assign(&mut highest_status, ins.status);
            }
        }

        self.absorb_ballot(id, highest_ballot).await?;

        if responses.iter().all(|r| r.accepted) {
            return Ok(());
        }

        let best = responses
            .iter()
            .filter_map(|r| r.instance.as_ref())
            .find(|i| i.max_ballot == highest_ballot && i.status == highest_status);

        if let Some(best) = best {
            let local_status = self.status_of(id).await.unwrap_or(InstanceStatus::PreAccepted);
            if best.status > local_status {
                match best.status {
                    InstanceStatus::Accepted => {
                        let mut st = self.state_write().await;
                        if self.apply_accept(&mut st, best, false).is_ok() {
                            self.persist_locked(&st).await?;
                        }
                    }
                    InstanceStatus::Committed | InstanceStatus::Executed => {
                        let mut st = self.state_write().await;
                        if self.apply_commit(&mut st, best, false).is_ok() {
                            self.persist_locked(&st).await?;
                        }
                        drop(st);
                        self.sync_registry().handle(id).commit_event.fire();
                    }
                    _ => {}
                }
            }
        }

        debug!(?id, ?highest_ballot, "prepare rejected");
        Err(ConsensusError::Ballot { highest: highest_ballot })
    }

    /// Resumes the protocol from the reference instance. The first phase
    /// uses the reference (it may carry newer attributes); every later phase
    /// uses the then-current local instance.
    async fn apply_prepare_result(
        &self,
        id: InstanceId,
        responses: Vec<PrepareResponse>,
    ) -> Result<()> {
        self.check_prepare_responses(id, &responses).await?;

        let reference = analyze_prepare_responses(&responses);
        let local = self.expect_snapshot(id).await?;

        let (mut prepare_ins, status) = match reference {
            Some(remote) if remote.status >= local.status => {
                let status = remote.status;
                (remote, status)
            }
            Some(_) => (local.clone(), local.status),
            None => {
                if local.status <= InstanceStatus::PreAccepted {
                    // nobody has seen this instance; commit it as a noop so
                    // the slot resolves
                    warn!(?id, "instance unknown to other replicas, committing noop");
                    let noop_ins = {
                        let mut st = self.state_write().await;
                        let entry = st
                            .instances
                            .get_mut(&id)
                            .expect("local instance exists during recovery");
                        entry.noop = true;
                        let copy = entry.clone();
                        self.persist_locked(&st).await?;
                        copy
                    };
                    (noop_ins, InstanceStatus::PreAccepted)
                } else {
                    (local.clone(), InstanceStatus::PreAccepted)
                }
            }
        };

        let mut accept_required = true;
        if status <= InstanceStatus::PreAccepted {
            debug!(?id, "recovery resuming at pre-accept");
            accept_required = self.phase_driver().pre_accept_phase(self, prepare_ins).await?;
            prepare_ins = self.expect_snapshot(id).await?;
        }
        if status <= InstanceStatus::Accepted && accept_required {
            debug!(?id, "recovery resuming at accept");
            self.phase_driver().accept_phase(self, prepare_ins).await?;
            prepare_ins = self.expect_snapshot(id).await?;
        }
        debug!(?id, "recovery resuming at commit");
        self.phase_driver().commit_phase(self, prepare_ins).await
    }

    /// Replica side of Prepare. Unknown instances are accepted with no
    /// instance attached; known instances accept only a strictly higher
    /// ballot and always report a snapshot either way.
    pub(crate) async fn handle_prepare(&self, request: PrepareRequest) -> Result<PrepareResponse> {
        let mut st = self.state_write().await;
        let Some(entry) = st.instances.get_mut(&request.instance_id) else {
            return Ok(PrepareResponse { accepted: true, instance: None });
        };

        if request.ballot > entry.max_ballot {
            entry.max_ballot = request.ballot;
            // give the preparing node its grace period before this replica
            // attempts recovery itself
            if entry.status < InstanceStatus::Committed {
                entry.commit_deadline =
                    Some(Instant::now() + self.config().prepare_commit_timeout());
            }
            let copy = entry.clone();
            self.persist_locked(&st).await?;
            Ok(PrepareResponse { accepted: true, instance: Some(copy) })
        } else {
            debug!(
                id = ?request.instance_id,
                local = ?entry.max_ballot,
                requested = ?request.ballot,
                "prepare rejected"
            );
            Ok(PrepareResponse { accepted: false, instance: Some(entry.clone()) })
        }
    }

    /// Replica side of the successor protocol. Reports the local snapshot
    /// and, when the instance is still uncommitted, starts recovering it:
    /// the caller picked this node as the responsible successor.
    pub(crate) async fn handle_prepare_successor(
        self: Arc<Self>,
        request: PrepareSuccessorRequest,
    ) -> Result<PrepareSuccessorResponse> {
        let instance = self.snapshot_copy(request.instance_id).await;

        if let Some(ins) = &instance {
            if ins.status < InstanceStatus::Committed {
                let scope = Arc::clone(&self);
                let id = request.instance_id;
                tokio::spawn(async move {
                    if let Err(err) = scope.recover_instance(id).await {
                        warn!(?id, %err, "successor-driven recovery failed");
                    }
                });
            }
        }

        Ok(PrepareSuccessorResponse { instance })
    }
}
