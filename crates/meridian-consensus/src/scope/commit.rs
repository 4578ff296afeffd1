//! Commit: fire-and-forget. A quorum already agreed on the attributes during
//! Accept (or the fast path), so nobody can proceed without discovering the
//! commit; the broadcast needs no acknowledgement.

use super::Scope;
use crate::error::Result;
use crate::store::DataStore;
use crate::types::{CommitRequest, CommitResponse, Instance, Request};

use std::sync::Arc;

use tracing::{debug, warn};

impl<S: DataStore> Scope<S> {
    /// Coordinator side. Commits locally, persists, signals the commit
    /// event, then broadcasts without waiting for responses.
    pub(crate) async fn run_commit_phase(&self, proposal: Instance) -> Result<()> {
        debug!(id = ?proposal.id, scope = %self.name(), "commit phase started");

        let stored = {
            let mut st = self.state_write().await;
            let result = self.apply_commit(&mut st, &proposal, true);
            let stored = super::stored_if_subsumed(&st, proposal.id, result)?;
            self.persist_locked(&st).await?;
            stored
        };

        self.sync_registry().handle(stored.id).commit_event.fire();

        for target in self.peer_replicas() {
            let transport = Arc::clone(self.transport());
            let request = Request::Commit(CommitRequest {
                scope: self.name().to_owned(),
                instance: stored.clone(),
            });
            tokio::spawn(async move {
                if let Err(err) = transport.send(target, request).await {
                    debug!(?target, %err, "commit broadcast failed");
                }
            });
        }

        debug!(id = ?stored.id, "commit phase completed");
        Ok(())
    }

    /// Replica side. Adopts the committed attributes, persists, signals the
    /// commit event, and schedules execution asynchronously. A commit that
    /// the local state already subsumes is absorbed without execution.
    pub(crate) async fn handle_commit(
        self: Arc<Self>,
        request: CommitRequest,
    ) -> Result<CommitResponse> {
        let applied = {
            let mut st = self.state_write().await;
            match self.apply_commit(&mut st, &request.instance, false) {
                Ok(stored) => {
                    self.persist_locked(&st).await?;
                    Some(stored)
                }
                Err(err) if err.is_invalid_status() => None,
                Err(err) => return Err(err),
            }
        };

        if let Some(stored) = applied {
            self.sync_registry().handle(stored.id).commit_event.fire();

            let scope = Arc::clone(&self);
            let id = stored.id;
            tokio::spawn(async move {
                if let Err(err) = scope.execute_instance(id).await {
                    warn!(?id, %err, "asynchronous execution failed");
                }
            });
        }

        Ok(CommitResponse {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing::{solo_scope, test_instruction};
    use crate::types::{InstanceId, InstanceStatus, NodeId, Seq};

    #[tokio::test]
    async fn handle_commit_fires_event_and_executes() {
        let scope = solo_scope().await;
        let mut ins = Instance::placeholder(InstanceId::random(), NodeId::random());
        ins.commands = vec![test_instruction("a", 7)];
        ins.sequence = Seq::from(1);

        let sync = scope.sync_registry().handle(ins.id);
        assert!(!sync.commit_event.is_fired());

        let _ = Arc::clone(&scope)
            .handle_commit(CommitRequest { scope: "test".into(), instance: ins.clone() })
            .await
            .unwrap();

        assert!(sync.commit_event.is_fired());
        sync.execute_event.wait().await;
        assert_eq!(scope.status_of(ins.id).await, Some(InstanceStatus::Executed));
        assert_eq!(scope.executed_ids().await, vec![ins.id]);
    }

    #[tokio::test]
    async fn duplicate_commit_is_absorbed() {
        let scope = solo_scope().await;
        let mut ins = Instance::placeholder(InstanceId::random(), NodeId::random());
        ins.commands = vec![test_instruction("a", 7)];
        ins.sequence = Seq::from(1);

        let _ = Arc::clone(&scope)
            .handle_commit(CommitRequest { scope: "test".into(), instance: ins.clone() })
            .await
            .unwrap();
        scope.sync_registry().handle(ins.id).execute_event.wait().await;

        // replay with divergent attributes: rejected silently, state frozen
        let mut replay = ins.clone();
        replay.sequence = Seq::from(50);
        let _ = Arc::clone(&scope)
            .handle_commit(CommitRequest { scope: "test".into(), instance: replay })
            .await
            .unwrap();

        let stored = scope.snapshot_copy(ins.id).await.unwrap();
        assert_eq!(stored.status, InstanceStatus::Executed);
        assert_eq!(stored.sequence, Seq::from(1));
        assert_eq!(scope.executed_ids().await.len(), 1);
    }
}
