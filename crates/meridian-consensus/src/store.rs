use crate::types::Instruction;

use async_trait::async_trait;
use bytes::Bytes;

/// The durable log backing a scope's consensus state.
///
/// `persist` is the durability barrier: every transition the protocol
/// promises to survive a crash (ballot bumps, status advances, attribute
/// adoptions) is written through here before the scope replies on the wire
/// or returns success to a caller.
#[async_trait]
pub trait LogStore: Send + Sync + 'static {
    async fn persist(&self, scope: &str, state: Bytes) -> anyhow::Result<()>;
}

/// The application store instances are applied to.
#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;

    /// Applies one instruction, a pure function of the instruction in
    /// commit order.
    async fn apply(&self, instruction: &Instruction) -> anyhow::Result<Self::Value>;

    /// Whether an instruction leaves the store unchanged. Read-only
    /// instances take dependencies only on writes.
    fn is_read_only(&self, instruction: &Instruction) -> bool;
}
