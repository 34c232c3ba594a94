use super::messages::UpdatePacket;
use crate::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Largest finite cost. `i32::MAX` is reserved on the wire for "unreachable".
pub const MAX_FINITE_COST: u32 = i32::MAX as u32 - 1;

/// Path or link cost held in the routing table.
///
/// Variant order matters: the derived `Ord` places every finite cost
/// below `Infinite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Cost {
    Finite(u32),
    Infinite,
}

impl Cost {
    pub const ZERO: Cost = Cost::Finite(0);

    /// Builds a finite cost, or `None` if the value does not fit the wire range.
    pub fn finite(value: u32) -> Option<Cost> {
        (value <= MAX_FINITE_COST).then_some(Cost::Finite(value))
    }

    pub fn is_finite(&self) -> bool {
        matches!(self, Cost::Finite(_))
    }

    pub fn value(&self) -> Option<u32> {
        match self {
            Cost::Finite(v) => Some(*v),
            Cost::Infinite => None,
        }
    }

    /// Adds two costs; anything past the finite range collapses to `Infinite`.
    pub fn saturating_add(self, other: Cost) -> Cost {
        match (self, other) {
            (Cost::Finite(a), Cost::Finite(b)) => {
                let sum = a as u64 + b as u64;
                if sum > MAX_FINITE_COST as u64 {
                    Cost::Infinite
                } else {
                    Cost::Finite(sum as u32)
                }
            }
            _ => Cost::Infinite,
        }
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cost::Finite(v) => write!(f, "{}", v),
            Cost::Infinite => write!(f, "inf"),
        }
    }
}

/// Cost carried by a single advertisement.
///
/// `Withdrawn` only ever appears in the recipient's own slot and tells it
/// that the direct link to the sender is going away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisedCost {
    Finite(u32),
    Unreachable,
    Withdrawn,
}

impl AdvertisedCost {
    pub const WIRE_UNREACHABLE: i32 = i32::MAX;
    pub const WIRE_WITHDRAWN: i32 = i32::MIN;

    pub fn to_wire(self) -> i32 {
        match self {
            AdvertisedCost::Finite(v) => v.min(MAX_FINITE_COST) as i32,
            AdvertisedCost::Unreachable => Self::WIRE_UNREACHABLE,
            AdvertisedCost::Withdrawn => Self::WIRE_WITHDRAWN,
        }
    }

    /// Returns `None` for negative values other than the withdrawal sentinel.
    pub fn from_wire(raw: i32) -> Option<Self> {
        match raw {
            Self::WIRE_UNREACHABLE => Some(AdvertisedCost::Unreachable),
            Self::WIRE_WITHDRAWN => Some(AdvertisedCost::Withdrawn),
            v if v >= 0 => Some(AdvertisedCost::Finite(v as u32)),
            _ => None,
        }
    }

    /// Cost to use during relaxation; a withdrawal counts as unreachable.
    pub fn to_cost(self) -> Cost {
        match self {
            AdvertisedCost::Finite(v) => Cost::Finite(v),
            AdvertisedCost::Unreachable | AdvertisedCost::Withdrawn => Cost::Infinite,
        }
    }
}

impl From<Cost> for AdvertisedCost {
    fn from(cost: Cost) -> Self {
        match cost {
            Cost::Finite(v) => AdvertisedCost::Finite(v),
            Cost::Infinite => AdvertisedCost::Unreachable,
        }
    }
}

/// A packet built under the table lock, waiting to be handed to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub recipient: PeerId,
    pub addr: SocketAddr,
    pub packet: UpdatePacket,
}
