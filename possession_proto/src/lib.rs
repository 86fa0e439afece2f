//! Wire format for possession-state synchronization.
//!
//! Everything that crosses a peer boundary is defined here: the manager
//! snapshot, the remote operation envelope, and the encode/decode helpers.
//! Entities appear only as stable `u64` identifiers; resolving them back to
//! local handles is the caller's job.

use ahash::RandomState;
use serde::{Deserialize, Serialize};
use std::hash::{BuildHasher, Hasher};

bitflags::bitflags! {
    /// Profile traits that remote peers need to mirror locally.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct ProfileWireFlags: u8 {
        /// Profile ends in self-destruction instead of exhaustion.
        const FRAGILE = 1 << 0;
        /// Profile has zero potential and may never possess.
        const ZERO_POTENTIAL = 1 << 1;
    }
}

/// Wire projection of one controller's possession manager.
///
/// Scalar quantities travel as raw fixed-point `i64` values. The snapshot is
/// never authoritative on the receiving side; local state wins once resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerSnapshot {
    pub controller: u64,
    pub potential: i64,
    pub time_remaining: i64,
    pub fatigue: i64,
    pub cooldown: u32,
    pub profile_flags: ProfileWireFlags,
    /// Stable ids of possessed subjects, in possession order.
    pub possessed: Vec<u64>,
    pub hash: u64,
}

impl ManagerSnapshot {
    /// Stamp the integrity hash over every other field.
    pub fn finalize(mut self) -> Self {
        self.hash = 0;
        self.hash = hash_snapshot(&self);
        self
    }
}

/// Reason an authority-gated request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    NotAuthority,
    UnknownController,
}

/// Remote operations exchanged between peers.
///
/// Delivery is assumed reliable and ordered per sender; each variant carries
/// only stable ids plus the minimal payload for its operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Non-authority peer asks the authority to push full state.
    RequestSync { controller: u64 },
    /// Authority pushes a full manager snapshot.
    FullState { snapshot: ManagerSnapshot },
    /// Start (`active = true`) or stop of a single possession.
    PossessionEffect {
        controller: u64,
        subject: u64,
        active: bool,
    },
    /// Bare control-flag mirror, independent of possession bookkeeping.
    ControlFlag { subject: u64, controlled: bool },
    /// Explicit failure reply for a rejected request.
    SyncRejected {
        controller: u64,
        reason: RejectReason,
    },
}

pub fn hash_snapshot(snapshot: &ManagerSnapshot) -> u64 {
    let mut clone = snapshot.clone();
    clone.hash = 0;
    let encoded = bincode::serialize(&clone).expect("snapshot serialization for hashing");
    let mut hasher = RandomState::with_seeds(0, 0, 0, 0).build_hasher();
    hasher.write(&encoded);
    hasher.finish()
}

pub fn encode_message(message: &WireMessage) -> bincode::Result<Vec<u8>> {
    bincode::serialize(message)
}

pub fn decode_message(bytes: &[u8]) -> bincode::Result<WireMessage> {
    bincode::deserialize(bytes)
}

pub fn encode_snapshot_json(snapshot: &ManagerSnapshot) -> serde_json::Result<String> {
    serde_json::to_string(snapshot)
}

pub fn decode_snapshot_json(data: &str) -> serde_json::Result<ManagerSnapshot> {
    serde_json::from_str(data)
}
