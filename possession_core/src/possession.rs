//! Possession Manager: the per-controller aggregate root.
//!
//! Owns the active possession set, the resource ledger, and the target
//! selector, and produces a list of effects each tick for the driving system
//! to apply to the world, the reverse index, and the wire.

use std::collections::HashMap;

use bevy::prelude::{Component, Entity, Resource};
use log::warn;

use crate::components::{ControllerState, SubjectTags, ZoneId};
use crate::config::PossessionConfig;
use crate::ledger::ResourceLedger;
use crate::profile::ProfileKind;
use crate::scalar::Scalar;
use crate::selection::{
    Candidate, SelectInput, SelectPhase, SelectionContext, SelectorOutcome, TargetSelector,
};

/// Active control relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Possession {
    pub subject: Entity,
    pub started_tick: u64,
}

/// Why a possession ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Stopped,
    Exhausted,
    SubjectDied,
    LeftZone,
    Interrupted,
    Incapacitated,
    Disposed,
    Reset,
}

/// Punitive side-effects surfaced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltyKind {
    /// All-or-nothing rule: a zero-potential profile tried to possess.
    SelfDestruct,
}

/// State change the driving system must apply after `update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PossessionEffect {
    Started { subject: Entity },
    Ended { subject: Entity, reason: EndReason },
    Penalty(PenaltyKind),
    /// Ledger fully exhausted; terminal visual cue belongs to presentation.
    Depleted,
}

/// The slice of a subject's state the manager validates against.
#[derive(Debug, Clone, Copy)]
pub struct SubjectView {
    pub alive: bool,
    pub controlled: bool,
    pub zone: ZoneId,
    pub tags: SubjectTags,
}

impl SubjectView {
    /// Eligibility predicate applied to every candidate list everywhere.
    pub fn eligible(&self) -> bool {
        self.alive && !self.controlled && !self.tags.intersects(SubjectTags::BANNED)
    }
}

/// Process-wide reverse lookup: subject -> owning controller.
///
/// Relation-plus-lookup, never ownership. Mutated only by the possession
/// manager's driving system and the sync layer acting on its behalf.
#[derive(Resource, Debug, Default)]
pub struct PossessionIndex {
    by_subject: HashMap<Entity, Entity>,
}

impl PossessionIndex {
    pub fn owner_of(&self, subject: Entity) -> Option<Entity> {
        self.by_subject.get(&subject).copied()
    }

    pub fn insert(&mut self, subject: Entity, controller: Entity) {
        self.by_subject.insert(subject, controller);
    }

    pub fn remove(&mut self, subject: Entity) {
        self.by_subject.remove(&subject);
    }

    /// Drop every entry owned by `controller` (dispose / reset paths).
    pub fn remove_controller(&mut self, controller: Entity) {
        self.by_subject.retain(|_, owner| *owner != controller);
    }

    pub fn len(&self) -> usize {
        self.by_subject.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_subject.is_empty()
    }

    pub fn subjects(&self) -> impl Iterator<Item = (Entity, Entity)> + '_ {
        self.by_subject.iter().map(|(s, c)| (*s, *c))
    }

    pub fn clear(&mut self) {
        self.by_subject.clear();
    }
}

/// Per-tick world access the manager needs beyond its own state.
pub struct UpdateContext<'a> {
    pub build: &'a mut dyn FnMut() -> Vec<Candidate>,
    pub view: &'a dyn Fn(Entity) -> Option<SubjectView>,
    pub cursor_active: bool,
}

/// Per-controller aggregate root.
#[derive(Component)]
pub struct PossessionManager {
    profile: ProfileKind,
    ledger: ResourceLedger,
    selector: TargetSelector,
    held: Vec<Possession>,
    disposed: bool,
}

impl PossessionManager {
    /// Ledger bounds and rates come pre-assembled from the profile
    /// (see `profile::ledger_for`).
    pub fn new(profile: ProfileKind, ledger: ResourceLedger) -> Self {
        Self {
            profile,
            ledger,
            selector: TargetSelector::default(),
            held: Vec::new(),
            disposed: false,
        }
    }

    pub fn profile(&self) -> ProfileKind {
        self.profile
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut ResourceLedger {
        &mut self.ledger
    }

    pub fn selector(&self) -> &TargetSelector {
        &self.selector
    }

    pub fn held(&self) -> &[Possession] {
        &self.held
    }

    pub fn holding(&self) -> bool {
        !self.held.is_empty()
    }

    pub fn holds(&self, subject: Entity) -> bool {
        self.held.iter().any(|p| p.subject == subject)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Ledger-only gate.
    pub fn can_start(&self, config: &PossessionConfig) -> bool {
        if config.infinite_reserve {
            self.ledger.cooldown() == 0
        } else {
            self.ledger.can_spend()
        }
    }

    /// Full gate: ledger, eligibility, and the validity predicate
    /// (controller conscious, subject alive, co-located).
    pub fn can_start_on(
        &self,
        view: &SubjectView,
        controller: &ControllerState,
        config: &PossessionConfig,
    ) -> bool {
        self.can_start(config)
            && view.eligible()
            && controller.conscious
            && view.zone == controller.zone
    }

    /// Attempt to record a new possession. Invalid targets and insufficient
    /// resource are value-level no-ops; the one punitive branch is the
    /// all-or-nothing rule for zero-potential profiles.
    pub fn start(
        &mut self,
        subject: Entity,
        view: &SubjectView,
        controller: &ControllerState,
        tick: u64,
        config: &PossessionConfig,
        effects: &mut Vec<PossessionEffect>,
    ) -> bool {
        if self.disposed {
            return false;
        }
        if self.profile.zero_potential() && !config.safety_overrides {
            effects.push(PossessionEffect::Penalty(PenaltyKind::SelfDestruct));
            return false;
        }
        if self.holds(subject) || !self.can_start_on(view, controller, config) {
            return false;
        }
        self.held.push(Possession {
            subject,
            started_tick: tick,
        });
        effects.push(PossessionEffect::Started { subject });
        true
    }

    /// Idempotent stop: unknown subjects leave ledger and set untouched.
    pub fn stop(
        &mut self,
        subject: Entity,
        reason: EndReason,
        config: &PossessionConfig,
        effects: &mut Vec<PossessionEffect>,
    ) {
        let Some(position) = self.held.iter().position(|p| p.subject == subject) else {
            return;
        };
        self.held.remove(position);
        self.ledger.start_cooldown(config.stop_cooldown);
        effects.push(PossessionEffect::Ended { subject, reason });
        if self.ledger.is_exhausted() {
            effects.push(PossessionEffect::Depleted);
        }
    }

    fn release_all(
        &mut self,
        reason: EndReason,
        config: &PossessionConfig,
        effects: &mut Vec<PossessionEffect>,
    ) {
        let subjects: Vec<Entity> = self.held.iter().map(|p| p.subject).collect();
        for subject in subjects {
            self.stop(subject, reason, config, effects);
        }
    }

    /// Unconditional clear for global consistency repair. Bypasses cooldown
    /// bookkeeping: this is a reset, not a gameplay stop.
    pub fn reset_all(&mut self, effects: &mut Vec<PossessionEffect>) {
        for possession in self.held.drain(..) {
            effects.push(PossessionEffect::Ended {
                subject: possession.subject,
                reason: EndReason::Reset,
            });
        }
    }

    /// Idempotent disposal; clears back-references so nothing leaks into the
    /// weak reverse index.
    pub fn dispose(&mut self, effects: &mut Vec<PossessionEffect>) {
        if self.disposed {
            return;
        }
        for possession in self.held.drain(..) {
            effects.push(PossessionEffect::Ended {
                subject: possession.subject,
                reason: EndReason::Disposed,
            });
        }
        self.disposed = true;
    }

    /// Restore the relation set from a trusted source (sync layer).
    pub fn adopt_relations(&mut self, relations: Vec<Possession>) {
        self.held = relations;
    }

    /// Mirror a remote start/stop without ledger accounting. Returns whether
    /// the relation set changed.
    pub fn apply_remote(&mut self, subject: Entity, active: bool, tick: u64) -> bool {
        if active {
            if self.holds(subject) {
                return false;
            }
            self.held.push(Possession {
                subject,
                started_tick: tick,
            });
            true
        } else {
            let before = self.held.len();
            self.held.retain(|p| p.subject != subject);
            before != self.held.len()
        }
    }

    /// Once-per-tick update: burst pre-emption, selection drive, ledger
    /// spend/regeneration, fatigue, and forced-release rules.
    pub fn update(
        &mut self,
        tick: u64,
        input: &SelectInput,
        controller: ControllerState,
        config: &PossessionConfig,
        ctx: &mut UpdateContext<'_>,
    ) -> Vec<PossessionEffect> {
        let mut effects = Vec::new();
        if self.disposed {
            return effects;
        }

        let bursting = config.burst_enabled && input.burst_held;
        if bursting {
            // Burst discharge pre-empts ordinary selection entirely.
            if !config.infinite_reserve
                && self.ledger.spend_at(Scalar::from_f32(config.burst_spend_rate))
            {
                self.terminal_failure(config, &mut effects);
            }
        } else if input.engage_held || input.released {
            self.drive_selection(tick, input, &controller, config, ctx, &mut effects);
        }

        // Ledger pass: drain while holding, regenerate while idle, both at
        // the profile's own rates.
        if self.holding() {
            if !config.infinite_reserve && self.ledger.spend() {
                self.terminal_failure(config, &mut effects);
            }
        } else {
            self.ledger.regenerate();
        }

        if !controller.conscious && self.holding() {
            self.release_all(EndReason::Incapacitated, config, &mut effects);
            if self.profile.fragile() {
                effects.push(PossessionEffect::Penalty(PenaltyKind::SelfDestruct));
            }
        }

        self.ledger.tick_cooldown();
        self.ledger.tick_fatigue(
            self.holding(),
            config.low_reserve_ratio_scalar(),
            Scalar::from_f32(config.fatigue_accrual),
            Scalar::from_f32(config.fatigue_recovery),
        );
        effects
    }

    /// Terminal-failure branch: time crossed zero with possessions active.
    /// Fragile profiles self-destruct instead of exhausting.
    fn terminal_failure(&mut self, config: &PossessionConfig, effects: &mut Vec<PossessionEffect>) {
        self.ledger.exhaust(config.exhaust_cooldown);
        for possession in self.held.drain(..) {
            effects.push(PossessionEffect::Ended {
                subject: possession.subject,
                reason: EndReason::Exhausted,
            });
        }
        if self.profile.fragile() {
            effects.push(PossessionEffect::Penalty(PenaltyKind::SelfDestruct));
        } else {
            effects.push(PossessionEffect::Depleted);
        }
    }

    fn drive_selection(
        &mut self,
        tick: u64,
        input: &SelectInput,
        controller: &ControllerState,
        config: &PossessionConfig,
        ctx: &mut UpdateContext<'_>,
        effects: &mut Vec<PossessionEffect>,
    ) {
        let holding = self.holding();
        // The all-or-nothing rule fires on the attempt itself: once per
        // engage edge, before the selector ever reaches a commit.
        if self.profile.zero_potential()
            && !config.safety_overrides
            && input.engage_held
            && !holding
            && self.selector.phase() == SelectPhase::Idle
            && !self.selector.locked()
        {
            effects.push(PossessionEffect::Penalty(PenaltyKind::SelfDestruct));
        }
        let budget_ticks = self.ledger.potential().whole();
        let view = ctx.view;
        let eligible = move |entity: Entity| view(entity).map(|v| v.eligible()).unwrap_or(false);
        let outcome = {
            let mut selection_ctx = SelectionContext {
                holding,
                budget_ticks,
                multi_target: config.multi_target,
                by_ancestor: config.possess_ancestors,
                slack: config.sorter_slack_scalar(),
                cursor_active: ctx.cursor_active,
                build: &mut *ctx.build,
                eligible: &eligible,
            };
            self.selector.tick(input, &mut selection_ctx)
        };

        match outcome {
            SelectorOutcome::None | SelectorOutcome::Aborted(_) => {}
            SelectorOutcome::ReleaseAll => {
                self.release_all(EndReason::Interrupted, config, effects);
            }
            SelectorOutcome::Commit(targets) => {
                for subject in targets {
                    match (ctx.view)(subject) {
                        Some(view) => {
                            self.start(subject, &view, controller, tick, config, effects);
                        }
                        None => warn!("committed target {subject:?} vanished before start"),
                    }
                }
            }
        }
    }
}
