use super::{Ballot, Instance, InstanceId};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreAcceptRequest {
    pub scope: String,
    pub instance: Instance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreAcceptResponse {
    pub accepted: bool,
    pub max_ballot: Ballot,
    pub instance: Option<Instance>,
    /// Dependencies this replica knows about that the leader did not list.
    pub missing_instances: Vec<Instance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptRequest {
    pub scope: String,
    pub instance: Instance,
    pub missing_instances: Vec<Instance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptResponse {
    pub accepted: bool,
    pub max_ballot: Ballot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    pub scope: String,
    pub instance: Instance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub scope: String,
    pub instance_id: InstanceId,
    pub ballot: Ballot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub accepted: bool,
    pub instance: Option<Instance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareSuccessorRequest {
    pub scope: String,
    pub instance_id: InstanceId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareSuccessorResponse {
    pub instance: Option<Instance>,
}

/// A message from a coordinator or recovering replica to a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    PreAccept(PreAcceptRequest),
    Accept(AcceptRequest),
    Commit(CommitRequest),
    Prepare(PrepareRequest),
    PrepareSuccessor(PrepareSuccessorRequest),
}

impl Request {
    #[must_use]
    pub fn scope(&self) -> &str {
        match self {
            Request::PreAccept(m) => &m.scope,
            Request::Accept(m) => &m.scope,
            Request::Commit(m) => &m.scope,
            Request::Prepare(m) => &m.scope,
            Request::PrepareSuccessor(m) => &m.scope,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    PreAccept(PreAcceptResponse),
    Accept(AcceptResponse),
    Commit(CommitResponse),
    Prepare(PrepareResponse),
    PrepareSuccessor(PrepareSuccessorResponse),
}
