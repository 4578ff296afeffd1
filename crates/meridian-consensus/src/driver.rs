//! Phase entry points behind a trait.
//!
//! Phases call back into each other through the scope's injected driver
//! (recovery re-runs PreAccept/Accept/Commit, the executor triggers
//! Prepare), so a test implementation can observe or intercept any phase
//! without touching the protocol code.

use crate::error::Result;
use crate::scope::Scope;
use crate::store::DataStore;
use crate::types::{Instance, InstanceId};

use std::sync::Arc;

use async_trait::async_trait;

#[async_trait]
pub trait PhaseDriver<S: DataStore>: Send + Sync + 'static {
    /// Runs the PreAccept phase for `proposal`. Returns whether the Accept
    /// phase is required (the merged attributes differed, or a replica
    /// disagreed with the leader's attributes).
    async fn pre_accept_phase(&self, scope: &Scope<S>, proposal: Instance) -> Result<bool>;

    async fn accept_phase(&self, scope: &Scope<S>, proposal: Instance) -> Result<()>;

    async fn commit_phase(&self, scope: &Scope<S>, proposal: Instance) -> Result<()>;

    /// Runs explicit recovery for an instance whose commit deadline expired.
    async fn prepare_phase(&self, scope: &Scope<S>, id: InstanceId) -> Result<()>;
}

/// The production driver: each phase is the real protocol.
pub struct ProtocolDriver;

#[async_trait]
impl<S: DataStore> PhaseDriver<S> for ProtocolDriver {
    async fn pre_accept_phase(&self, scope: &Scope<S>, proposal: Instance) -> Result<bool> {
        scope.run_pre_accept_phase(proposal).await
    }

    async fn accept_phase(&self, scope: &Scope<S>, proposal: Instance) -> Result<()> {
        scope.run_accept_phase(proposal).await
    }

    async fn commit_phase(&self, scope: &Scope<S>, proposal: Instance) -> Result<()> {
        scope.run_commit_phase(proposal).await
    }

    async fn prepare_phase(&self, scope: &Scope<S>, id: InstanceId) -> Result<()> {
        scope.run_prepare_phase(id).await
    }
}
