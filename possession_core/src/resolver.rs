//! Entity Reference Resolver.
//!
//! Translates between locally-held `Entity` handles and stable cross-peer
//! identifiers. Ids are allocated, never derived from entity bits, so they
//! survive peer boundaries where generational indices do not.

use std::collections::HashMap;

use bevy::prelude::{Entity, Resource};
use thiserror::Error;

/// Stable network identifier for a simulation entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetId(pub u64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("entity {0:?} has no stable id")]
    Unregistered(Entity),
    #[error("stable id {} maps to no local entity", (.0).0)]
    Unknown(NetId),
}

/// Bidirectional registry of stable ids, pruned explicitly on destroy events.
#[derive(Resource, Debug, Default)]
pub struct NetRegistry {
    to_net: HashMap<Entity, NetId>,
    to_local: HashMap<NetId, Entity>,
    next: u64,
}

impl NetRegistry {
    /// Register a locally-spawned entity under a freshly allocated id.
    pub fn register(&mut self, entity: Entity) -> NetId {
        if let Some(existing) = self.to_net.get(&entity) {
            return *existing;
        }
        self.next += 1;
        let id = NetId(self.next);
        self.to_net.insert(entity, id);
        self.to_local.insert(id, entity);
        id
    }

    /// Bind a remotely-announced id to a local entity. Last write wins: a
    /// stale binding for either side is replaced outright.
    pub fn register_remote(&mut self, id: NetId, entity: Entity) {
        if let Some(previous) = self.to_local.insert(id, entity) {
            self.to_net.remove(&previous);
        }
        if let Some(previous) = self.to_net.insert(entity, id) {
            if previous != id {
                self.to_local.remove(&previous);
            }
        }
        self.next = self.next.max(id.0);
    }

    pub fn unregister(&mut self, entity: Entity) {
        if let Some(id) = self.to_net.remove(&entity) {
            self.to_local.remove(&id);
        }
    }

    pub fn stable_id(&self, entity: Entity) -> Result<NetId, ResolveError> {
        self.to_net
            .get(&entity)
            .copied()
            .ok_or(ResolveError::Unregistered(entity))
    }

    pub fn local_entity(&self, id: NetId) -> Result<Entity, ResolveError> {
        self.to_local.get(&id).copied().ok_or(ResolveError::Unknown(id))
    }

    pub fn len(&self) -> usize {
        self.to_net.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_net.is_empty()
    }

    pub fn clear(&mut self) {
        self.to_net.clear();
        self.to_local.clear();
    }
}
