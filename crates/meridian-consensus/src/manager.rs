//! The multi-scope consensus manager: owns one scope per consensus group,
//! routes inbound messages by scope name, and is the entry point for client
//! queries.

use crate::config::ManagerConfig;
use crate::driver::{PhaseDriver, ProtocolDriver};
use crate::error::Result;
use crate::scope::Scope;
use crate::store::{DataStore, LogStore};
use crate::topology::Topology;
use crate::transport::Transport;
use crate::types::{Instruction, NodeId, Request, Response};

use std::sync::Arc;

use dashmap::DashMap;

pub struct Manager<S: DataStore> {
    config: ManagerConfig,
    topology: Arc<dyn Topology>,
    transport: Arc<dyn Transport>,
    log: Arc<dyn LogStore>,
    store: Arc<S>,
    driver: Arc<dyn PhaseDriver<S>>,
    scopes: DashMap<String, Arc<Scope<S>>>,
}

impl<S: DataStore> Manager<S> {
    pub fn new(
        config: ManagerConfig,
        topology: Arc<dyn Topology>,
        transport: Arc<dyn Transport>,
        log: Arc<dyn LogStore>,
        store: Arc<S>,
    ) -> Self {
        Self::with_driver(config, topology, transport, log, store, Arc::new(ProtocolDriver))
    }

    /// Builds a manager whose scopes run phases through the given driver.
    pub fn with_driver(
        config: ManagerConfig,
        topology: Arc<dyn Topology>,
        transport: Arc<dyn Transport>,
        log: Arc<dyn LogStore>,
        store: Arc<S>,
        driver: Arc<dyn PhaseDriver<S>>,
    ) -> Self {
        Self { config, topology, transport, log, store, driver, scopes: DashMap::new() }
    }

    #[inline]
    #[must_use]
    pub fn local_id(&self) -> NodeId {
        self.topology.local_id()
    }

    /// The scope with the given name, created on first use.
    pub fn scope(&self, name: &str) -> Arc<Scope<S>> {
        self.scopes
            .entry(name.to_owned())
            .or_insert_with(|| {
                Arc::new(Scope::new(
                    name.to_owned(),
                    self.config.clone(),
                    Arc::clone(&self.topology),
                    Arc::clone(&self.transport),
                    Arc::clone(&self.log),
                    Arc::clone(&self.store),
                    Arc::clone(&self.driver),
                ))
            })
            .clone()
    }

    /// Coordinates a client query against a scope. The local node becomes
    /// the command leader; call once per client query.
    pub async fn execute_query(
        &self,
        scope: &str,
        instructions: Vec<Instruction>,
    ) -> Result<Option<S::Value>> {
        self.scope(scope).execute_query(instructions).await
    }

    /// Dispatches an inbound replica-to-replica message.
    pub async fn handle_request(&self, request: Request) -> Result<Response> {
        let scope = self.scope(request.scope());
        match request {
            Request::PreAccept(msg) => {
                scope.handle_pre_accept(msg).await.map(Response::PreAccept)
            }
            Request::Accept(msg) => {
                scope.handle_accept(msg).await.map(Response::Accept) //
            }
            Request::Commit(msg) => {
                scope.handle_commit(msg).await.map(Response::Commit) //
            }
            Request::Prepare(msg) => {
                scope.handle_prepare(msg).await.map(Response::Prepare) //
            }
            Request::PrepareSuccessor(msg) => {
                scope.handle_prepare_successor(msg).await.map(Response::PrepareSuccessor)
            }
        }
    }
}
