use crate::types::{Ballot, InstanceStatus};

use thiserror::Error;

/// Protocol errors, distinguishable at the call site.
///
/// Transport and persistence failures are surfaced unmodified inside
/// [`ConsensusError::Other`]; the caller decides whether to retry or abandon.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// A quorum was not reached before the phase deadline. Local state is
    /// left consistent; callers typically retry the enclosing phase or let
    /// recovery pick the instance up.
    #[error("{phase} timed out awaiting a quorum")]
    Timeout { phase: &'static str },

    /// A remote replica rejected the operation because it saw a higher
    /// ballot. The local ballot has already been updated from the responses;
    /// callers retry after a backoff.
    #[error("rejected by ballot {highest:?}")]
    Ballot { highest: Ballot },

    /// An attempted transition to a status not above the current one. The
    /// local state already subsumes the transition; phase drivers absorb
    /// this rather than surfacing it to clients.
    #[error("invalid status update: {current:?} -> {attempted:?}")]
    InvalidStatusUpdate { current: InstanceStatus, attempted: InstanceStatus },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConsensusError {
    #[inline]
    #[must_use]
    pub fn is_ballot(&self) -> bool {
        matches!(self, ConsensusError::Ballot { .. })
    }

    #[inline]
    #[must_use]
    pub fn is_invalid_status(&self) -> bool {
        matches!(self, ConsensusError::InvalidStatusUpdate { .. })
    }
}

pub type Result<T, E = ConsensusError> = std::result::Result<T, E>;
