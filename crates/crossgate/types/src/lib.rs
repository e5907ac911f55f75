//! Crossgate Types - shared data model for the admission-control protocol
//!
//! Every component speaks in terms of these definitions: vehicle and
//! intersection identities, the three-state vehicle status, the binary
//! admission decision, and the event shapes recorded on the operation ledger.

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Permanent vehicle token id, minted monotonically from 1 and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleId(pub u64);

impl std::fmt::Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vehicle-{}", self.0)
    }
}

/// Pre-provisioned intersection identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntersectionId(pub u32);

impl std::fmt::Display for IntersectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "intersection-{}", self.0)
    }
}

/// Identity of a controlling agent, typically a wallet address. Treated as
/// an opaque string by the protocol.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// An owner identity is malformed when it is empty or the zero address.
    /// Registration against a malformed owner is rejected.
    pub fn is_wellformed(&self) -> bool {
        let trimmed = self.0.trim();
        if trimmed.is_empty() {
            return false;
        }
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        !(digits.is_empty() || digits.chars().all(|c| c == '0'))
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vehicle lifecycle status. The wire boundary encodes this numerically
/// (0 = Moving, 1 = Waiting, 2 = Crossing); external consumers decode it
/// back to the symbolic form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleStatus {
    Moving,
    Waiting,
    Crossing,
}

impl VehicleStatus {
    pub fn as_wire(self) -> u8 {
        match self {
            VehicleStatus::Moving => 0,
            VehicleStatus::Waiting => 1,
            VehicleStatus::Crossing => 2,
        }
    }

    pub fn from_wire(code: u8) -> Option<Self> {
        match code {
            0 => Some(VehicleStatus::Moving),
            1 => Some(VehicleStatus::Waiting),
            2 => Some(VehicleStatus::Crossing),
            _ => None,
        }
    }
}

impl std::fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VehicleStatus::Moving => "Moving",
            VehicleStatus::Waiting => "Waiting",
            VehicleStatus::Crossing => "Crossing",
        };
        write!(f, "{name}")
    }
}

/// Authoritative per-vehicle record held by the registry.
///
/// `location` is a "lat,lon" coordinate pair checked only for presence, and
/// `speed` is agent-reported km/h; neither is trusted by the protocol.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub owner: AgentId,
    pub location: String,
    pub speed: u64,
    pub status: VehicleStatus,
    pub last_updated_at: chrono::DateTime<chrono::Utc>,
}

/// Read snapshot of a vehicle. Eventually consistent with respect to
/// concurrent writers; polling agents re-read to observe decisions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VehicleView {
    pub token_id: VehicleId,
    pub owner: AgentId,
    pub location: String,
    pub speed: u64,
    pub status: VehicleStatus,
    pub last_updated_at: chrono::DateTime<chrono::Utc>,
}

impl VehicleView {
    /// Numeric status encoding used at the wire boundary.
    pub fn wire_status(&self) -> u8 {
        self.status.as_wire()
    }
}

/// Binary outcome of a crossing request. Denied is a terminal answer to that
/// request, not a failure; the agent re-requests to try again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Granted,
    Denied,
}

impl Decision {
    pub fn is_granted(self) -> bool {
        matches!(self, Decision::Granted)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Granted => write!(f, "Granted"),
            Decision::Denied => write!(f, "Denied"),
        }
    }
}

/// Events produced by mutating operations and recorded on the operation
/// ledger. `VehicleRegistered` is the creation event external tooling
/// consumes to discover newly minted token ids.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VehicleRegistered {
        token_id: VehicleId,
        owner: AgentId,
    },
    StateUpdated {
        token_id: VehicleId,
        location: String,
        speed: u64,
    },
    CrossingRequested {
        token_id: VehicleId,
        intersection: IntersectionId,
        decision: Decision,
    },
    /// `forced` distinguishes a timeout-triggered force-clear from a normal
    /// release by the occupant's agent.
    SlotReleased {
        token_id: VehicleId,
        intersection: IntersectionId,
        forced: bool,
    },
    OwnershipTransferred {
        token_id: VehicleId,
        from: AgentId,
        to: AgentId,
    },
    DelegateChanged {
        delegate: AgentId,
        allowed: bool,
    },
}

/// Protocol error taxonomy. Every error is terminal for the call that raised
/// it; no partial state mutation survives a failed operation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CrossgateError {
    #[error("unknown vehicle: {0}")]
    UnknownVehicle(VehicleId),

    #[error("unknown intersection: {0}")]
    UnknownIntersection(IntersectionId),

    #[error("caller {caller} is not the owner of {token}")]
    NotOwner { token: VehicleId, caller: AgentId },

    #[error("caller {0} is not authorized for this entry point")]
    Unauthorized(AgentId),

    #[error("duplicate or invalid owner identity: {0:?}")]
    DuplicateOrInvalidOwner(String),

    #[error("{token} does not hold the crossing slot at {intersection}")]
    NotOccupant {
        token: VehicleId,
        intersection: IntersectionId,
    },

    #[error("state lock poisoned")]
    LockPoisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_empty_owner_identities_are_malformed() {
        assert!(!AgentId::new("").is_wellformed());
        assert!(!AgentId::new("   ").is_wellformed());
        assert!(!AgentId::new("0").is_wellformed());
        assert!(!AgentId::new("0x0").is_wellformed());
        assert!(!AgentId::new("0x0000000000000000000000000000000000000000").is_wellformed());
        assert!(AgentId::new("0xAAaa00000000000000000000000000000000aaAA").is_wellformed());
        assert!(AgentId::new("observer-1").is_wellformed());
    }

    #[test]
    fn status_wire_encoding_matches_contract_enum() {
        assert_eq!(VehicleStatus::Moving.as_wire(), 0);
        assert_eq!(VehicleStatus::Waiting.as_wire(), 1);
        assert_eq!(VehicleStatus::Crossing.as_wire(), 2);
        assert_eq!(VehicleStatus::from_wire(2), Some(VehicleStatus::Crossing));
        assert_eq!(VehicleStatus::from_wire(3), None);
    }
}
