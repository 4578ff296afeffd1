use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts governing the phase protocols and recovery, all in milliseconds.
///
/// Captured per manager at construction; tests build a manager with
/// shortened values instead of mutating globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// timeout receiving a quorum of pre-accept responses
    pub pre_accept_timeout_ms: u64,

    /// how long a replica holds a pre-accepted instance before
    /// it becomes eligible for recovery
    pub pre_accept_commit_timeout_ms: u64,

    /// timeout receiving a quorum of accept responses
    pub accept_timeout_ms: u64,

    /// how long a replica holds an accepted instance before
    /// it becomes eligible for recovery
    pub accept_commit_timeout_ms: u64,

    /// timeout receiving a quorum of prepare responses
    pub prepare_timeout_ms: u64,

    /// grace period after a failed prepare before the instance is
    /// again eligible for recovery
    pub prepare_commit_timeout_ms: u64,

    /// wait between retries of operations rejected by an out-of-date ballot
    pub ballot_failure_wait_ms: u64,

    /// number of times a ballot-rejected operation is retried before giving up
    pub ballot_failure_retries: u32,

    /// grace period a non-leader grants the leader's own task to apply
    /// an instance before applying it itself
    pub execute_timeout_ms: u64,

    /// timeout for one prepare-successor round trip
    pub successor_timeout_ms: u64,

    /// interval between successor contact attempts while deferring recovery
    pub successor_contact_interval_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            pre_accept_timeout_ms: 500,
            pre_accept_commit_timeout_ms: 750,
            accept_timeout_ms: 500,
            accept_commit_timeout_ms: 750,
            prepare_timeout_ms: 500,
            prepare_commit_timeout_ms: 750,
            ballot_failure_wait_ms: 500,
            ballot_failure_retries: 4,
            execute_timeout_ms: 50,
            successor_timeout_ms: 2000,
            successor_contact_interval_ms: 1000,
        }
    }
}

macro_rules! duration_accessors {
    ($($fn_name:ident => $field:ident,)+) => {
        impl ManagerConfig {
            $(
                #[inline]
                #[must_use]
                pub fn $fn_name(&self) -> Duration {
                    Duration::from_millis(self.$field)
                }
            )+
        }
    };
}

duration_accessors!(
    pre_accept_timeout => pre_accept_timeout_ms,
    pre_accept_commit_timeout => pre_accept_commit_timeout_ms,
    accept_timeout => accept_timeout_ms,
    accept_commit_timeout => accept_commit_timeout_ms,
    prepare_timeout => prepare_timeout_ms,
    prepare_commit_timeout => prepare_commit_timeout_ms,
    ballot_failure_wait => ballot_failure_wait_ms,
    execute_timeout => execute_timeout_ms,
    successor_timeout => successor_timeout_ms,
    successor_contact_interval => successor_contact_interval_ms,
);

impl ManagerConfig {
    /// A configuration with aggressively short timeouts, for tests.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            pre_accept_timeout_ms: 100,
            pre_accept_commit_timeout_ms: 40,
            accept_timeout_ms: 100,
            accept_commit_timeout_ms: 40,
            prepare_timeout_ms: 100,
            prepare_commit_timeout_ms: 40,
            ballot_failure_wait_ms: 20,
            ballot_failure_retries: 4,
            execute_timeout_ms: 10,
            successor_timeout_ms: 50,
            successor_contact_interval_ms: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = ManagerConfig::default();
        assert_eq!(config.pre_accept_timeout(), Duration::from_millis(500));
        assert_eq!(config.pre_accept_commit_timeout(), Duration::from_millis(750));
        assert_eq!(config.ballot_failure_retries, 4);
        assert_eq!(config.execute_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn fast_config_is_shorter() {
        let fast = ManagerConfig::fast();
        let default = ManagerConfig::default();
        assert!(fast.pre_accept_commit_timeout() < default.pre_accept_commit_timeout());
        assert!(fast.successor_timeout() < default.successor_timeout());
    }
}
