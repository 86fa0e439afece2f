//! Peer synchronization of possession state.
//!
//! Converts managers to wire snapshots through the entity reference resolver,
//! applies inbound snapshots and effect messages, and enforces the authority
//! rule for full-sync requests. Transport is out of scope: `PeerLink` models
//! the reliable, ordered, per-sender substrate with in-memory channels, and
//! outbound frames are enqueued, never awaited.

use bevy::prelude::{Entity, Resource};
use crossbeam_channel::{unbounded, Receiver, Sender, TrySendError};
use log::warn;
use thiserror::Error;

use possession_proto::{
    decode_message, encode_message, hash_snapshot, ManagerSnapshot, RejectReason, WireMessage,
};

use crate::possession::{Possession, PossessionIndex, PossessionManager};
use crate::resolver::{NetId, NetRegistry, ResolveError};
use crate::scalar::Scalar;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A referenced entity has no stable id; the whole operation fails
    /// rather than silently dropping fields.
    #[error("snapshot references an unresolvable entity: {0}")]
    Unresolved(#[from] ResolveError),
    #[error("controller id {0} is unknown on this peer")]
    UnknownController(u64),
    #[error("snapshot for controller {0} failed its integrity check")]
    HashMismatch(u64),
    #[error("wire frame did not decode: {0}")]
    Decode(#[from] bincode::Error),
}

/// Which peer answers authority-gated operations in this session.
#[derive(Resource, Debug, Clone, Copy)]
pub struct SessionRole {
    pub authority: bool,
}

impl Default for SessionRole {
    fn default() -> Self {
        Self { authority: true }
    }
}

/// One reliable, ordered link to a peer. Frames are length-less encoded
/// messages; ordering is per-sender, exactly what the channel provides.
pub struct PeerLink {
    sender: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
}

impl PeerLink {
    /// Two cross-wired endpoints, one per peer.
    pub fn pair() -> (PeerLink, PeerLink) {
        let (a_tx, a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();
        (
            PeerLink {
                sender: a_tx,
                receiver: b_rx,
            },
            PeerLink {
                sender: b_tx,
                receiver: a_rx,
            },
        )
    }

    pub fn send(&self, message: &WireMessage) -> Result<(), SyncError> {
        let frame = encode_message(message)?;
        if let Err(TrySendError::Disconnected(_)) = self.sender.try_send(frame) {
            warn!("peer link closed; dropping outbound message");
        }
        Ok(())
    }

    /// Drain every frame currently queued, decoded in arrival order.
    pub fn drain(&self) -> Vec<WireMessage> {
        let mut messages = Vec::new();
        while let Ok(frame) = self.receiver.try_recv() {
            match decode_message(&frame) {
                Ok(message) => messages.push(message),
                Err(err) => warn!("discarding undecodable frame: {err}"),
            }
        }
        messages
    }
}

/// Every link this peer holds. Empty means the session is offline and
/// flushed frames simply evaporate.
#[derive(Resource, Default)]
pub struct PeerLinks {
    links: Vec<PeerLink>,
}

impl PeerLinks {
    pub fn add(&mut self, link: PeerLink) {
        self.links.push(link);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerLink> {
        self.links.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }
}

/// Per-tick outbound queue, flushed to every link after controller updates.
#[derive(Resource, Default)]
pub struct Outbox {
    messages: Vec<WireMessage>,
}

impl Outbox {
    pub fn push(&mut self, message: WireMessage) {
        self.messages.push(message);
    }

    pub fn drain(&mut self) -> Vec<WireMessage> {
        std::mem::take(&mut self.messages)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Project a manager into its wire snapshot.
///
/// Every referenced entity must resolve; a single failure rejects the whole
/// capture.
pub fn capture_snapshot(
    controller: Entity,
    manager: &PossessionManager,
    registry: &NetRegistry,
) -> Result<ManagerSnapshot, SyncError> {
    let controller_id = registry.stable_id(controller)?;
    let mut possessed = Vec::with_capacity(manager.held().len());
    for possession in manager.held() {
        possessed.push(registry.stable_id(possession.subject)?.0);
    }
    let ledger = manager.ledger();
    Ok(ManagerSnapshot {
        controller: controller_id.0,
        potential: ledger.potential().raw(),
        time_remaining: ledger.time_remaining().raw(),
        fatigue: ledger.fatigue().raw(),
        cooldown: ledger.cooldown(),
        profile_flags: manager.profile().wire_flags(),
        possessed,
        hash: 0,
    }
    .finalize())
}

/// Outcome of applying a full-state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedSnapshot {
    pub controller: Entity,
    pub applied: usize,
    pub skipped: usize,
}

/// Reconstruct a manager from a snapshot.
///
/// A failed integrity hash or an unresolvable controller drops the whole
/// message; unresolvable subjects are skipped individually. The
/// reverse-index entries for this controller are overwritten outright, last
/// write wins.
pub fn apply_snapshot(
    snapshot: &ManagerSnapshot,
    manager: &mut PossessionManager,
    controller: Entity,
    index: &mut PossessionIndex,
    registry: &NetRegistry,
    tick: u64,
) -> Result<AppliedSnapshot, SyncError> {
    if snapshot.hash != hash_snapshot(snapshot) {
        return Err(SyncError::HashMismatch(snapshot.controller));
    }
    let expected = registry
        .local_entity(NetId(snapshot.controller))
        .map_err(|_| SyncError::UnknownController(snapshot.controller))?;
    debug_assert_eq!(expected, controller, "snapshot routed to wrong manager");

    let mut relations = Vec::with_capacity(snapshot.possessed.len());
    let mut skipped = 0usize;
    for subject_id in &snapshot.possessed {
        match registry.local_entity(NetId(*subject_id)) {
            Ok(subject) => relations.push(Possession {
                subject,
                started_tick: tick,
            }),
            Err(_) => {
                skipped += 1;
                warn!("skipping unresolvable possessed subject id {subject_id}");
            }
        }
    }

    manager.ledger_mut().overwrite(
        Scalar::from_raw(snapshot.potential),
        Scalar::from_raw(snapshot.time_remaining),
        Scalar::from_raw(snapshot.fatigue),
        snapshot.cooldown,
    );

    index.remove_controller(controller);
    for relation in &relations {
        index.insert(relation.subject, controller);
    }
    let applied = relations.len();
    manager.adopt_relations(relations);

    Ok(AppliedSnapshot {
        controller,
        applied,
        skipped,
    })
}

/// Authority rule for full-sync requests: only the session authority
/// responds with state; everyone else sends an explicit rejection.
pub fn answer_sync_request<F>(
    role: SessionRole,
    controller_id: u64,
    capture: F,
) -> WireMessage
where
    F: FnOnce() -> Result<ManagerSnapshot, SyncError>,
{
    if !role.authority {
        return WireMessage::SyncRejected {
            controller: controller_id,
            reason: RejectReason::NotAuthority,
        };
    }
    match capture() {
        Ok(snapshot) => WireMessage::FullState { snapshot },
        Err(err) => {
            warn!("sync request for controller {controller_id} failed: {err}");
            WireMessage::SyncRejected {
                controller: controller_id,
                reason: RejectReason::UnknownController,
            }
        }
    }
}
