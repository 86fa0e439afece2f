use bevy::{math::Vec2, prelude::*};
use std::fmt;

/// Identifier for a subject template (the archetype a simulation entity was
/// spawned from). Batch selection groups subjects by template.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(pub u16);

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room/zone membership identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct ZoneId(pub u32);

bitflags::bitflags! {
    /// Category tags carried by every subject.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SubjectTags: u8 {
        /// Deprioritized by the target sorter within the slack window.
        const EDIBLE = 1 << 0;
        /// A controller's own avatar type. Never possessable.
        const AVATAR = 1 << 1;
        /// Overseer-class entity. Never possessable.
        const OVERSEER = 1 << 2;
    }
}

impl SubjectTags {
    /// Categories that are permanently excluded from possession.
    pub const BANNED: SubjectTags = SubjectTags::AVATAR.union(SubjectTags::OVERSEER);
}

/// A simulation entity eligible (in principle) to be possessed.
#[derive(Component, Debug, Clone)]
pub struct Subject {
    pub template: TemplateId,
    /// Categorical parent of the template, used when ancestor batching is on.
    pub ancestor: TemplateId,
    pub tags: SubjectTags,
}

impl Subject {
    pub fn new(template: TemplateId, ancestor: TemplateId, tags: SubjectTags) -> Self {
        Self {
            template,
            ancestor,
            tags,
        }
    }
}

/// Liveness of a subject or controller avatar.
#[derive(Component, Debug, Clone, Copy)]
pub struct Vitals {
    pub alive: bool,
}

impl Default for Vitals {
    fn default() -> Self {
        Self { alive: true }
    }
}

/// Zone the entity currently occupies.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct ZoneMember {
    pub zone: ZoneId,
}

/// Planar position used for candidate ordering and co-location checks.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct WorldPos(pub Vec2);

/// Mirror of the authoritative "is controlled" flag on the subject.
///
/// Must always agree with the possession index; the ghost-repair system
/// clears it when no owning controller can be found.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct ControlFlag {
    pub controlled: bool,
}

/// Controller-side state the possession manager reads each tick.
#[derive(Component, Debug, Clone, Copy)]
pub struct ControllerState {
    pub conscious: bool,
    pub zone: ZoneId,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            conscious: true,
            zone: ZoneId::default(),
        }
    }
}
