//! Per-instance synchronization primitives.
//!
//! Instances themselves are plain data; the events and locks associated with
//! an instance live here, keyed by id, so that snapshot copies stay cheap
//! and the scope lock never guards a wait.

use crate::types::InstanceId;

use std::sync::Arc;

use meridian_utils::flare::Flare;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

pub(crate) struct InstanceSync {
    /// Fired exactly once, when the instance commits.
    pub commit_event: Flare,
    /// Fired exactly once, when the instance is applied.
    pub execute_event: Flare,
    /// Only one recovery runs for an instance at a time.
    pub prepare_lock: AsyncMutex<()>,
    /// Short critical section around apply.
    pub execute_lock: AsyncMutex<()>,
}

impl InstanceSync {
    fn new() -> Self {
        Self {
            commit_event: Flare::new(),
            execute_event: Flare::new(),
            prepare_lock: AsyncMutex::new(()),
            execute_lock: AsyncMutex::new(()),
        }
    }
}

#[derive(Default)]
pub(crate) struct SyncRegistry {
    map: DashMap<InstanceId, Arc<InstanceSync>>,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self { map: DashMap::new() }
    }

    /// The synchronization handle for an instance, created on first use.
    pub fn handle(&self, id: InstanceId) -> Arc<InstanceSync> {
        self.map.entry(id).or_insert_with(|| Arc::new(InstanceSync::new())).clone()
    }
}
