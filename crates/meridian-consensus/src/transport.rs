use crate::types::{NodeId, Request, Response};

use async_trait::async_trait;

/// Point-to-point messaging between replicas.
///
/// One request to one replica, one typed response or an error. Wire framing,
/// retries, and connection management live behind this trait.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, target: NodeId, request: Request) -> anyhow::Result<Response>;
}
