use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a participating replica.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    #[inline]
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    #[inline]
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Globally unique identifier of an instance, minted at creation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(Uuid);

impl InstanceId {
    #[inline]
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    #[inline]
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

macro_rules! impl_uuid_debug {
    ($($ty:ident,)+) => {
        $(
            impl fmt::Debug for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    let mut buf = [0u8; 36];
                    let full = self.0.hyphenated().encode_lower(&mut buf);
                    write!(f, concat!(stringify!($ty), "({})"), &full[..8])
                }
            }

            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    fmt::Display::fmt(&self.0, f)
                }
            }
        )+
    };
}

impl_uuid_debug!(NodeId, InstanceId,);

/// Per-instance monotone counter establishing coordinator precedence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ballot(u32);

impl Ballot {
    pub const ZERO: Self = Self(0);

    #[inline]
    #[must_use]
    #[track_caller]
    pub fn add_one(self) -> Self {
        Self(self.0.checked_add(1).expect("Ballot overflow"))
    }

    #[inline]
    #[must_use]
    pub const fn raw_value(self) -> u32 {
        self.0
    }
}

impl From<u32> for Ballot {
    #[inline]
    fn from(val: u32) -> Self {
        Self(val)
    }
}

/// Per-scope sequence number used as the execution-order tiebreaker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Seq(u64);

impl Seq {
    pub const ZERO: Self = Self(0);

    #[inline]
    #[must_use]
    #[track_caller]
    pub fn add_one(self) -> Self {
        Self(self.0.checked_add(1).expect("Seq overflow"))
    }

    #[inline]
    #[must_use]
    pub const fn raw_value(self) -> u64 {
        self.0
    }
}

impl From<u64> for Seq {
    #[inline]
    fn from(val: u64) -> Self {
        Self(val)
    }
}
