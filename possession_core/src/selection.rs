//! Target selection state machine.
//!
//! Three phases driven once per tick: Idle builds the candidate query,
//! Querying resolves player intent under the controller's time budget, Ready
//! commits the resolved set. Illegal phase requests are logic defects and
//! surface as errors instead of being clamped; every cancellation cause
//! collapses to the same abort-to-Idle path.

use bevy::prelude::Entity;
use log::debug;
use thiserror::Error;

use crate::components::TemplateId;
use crate::scalar::Scalar;

/// Selection phase, ordered by progression.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectPhase {
    #[default]
    Idle = 0,
    Querying = 1,
    Ready = 2,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("selection transition {from:?} -> {to:?} is not a declared edge")]
    UndeclaredEdge { from: SelectPhase, to: SelectPhase },
}

/// Phase transition table.
///
/// Forward edges only (`Idle -> Querying -> Ready -> Idle`), plus the one
/// declared wrap edge `Querying -> Querying` used for query self-refresh.
/// Everything else indicates a logic defect.
pub fn transition(current: SelectPhase, requested: SelectPhase) -> Result<SelectPhase, TransitionError> {
    use SelectPhase::*;
    match (current, requested) {
        (Idle, Querying) | (Querying, Ready) | (Ready, Idle) | (Querying, Querying) => Ok(requested),
        (from, to) => Err(TransitionError::UndeclaredEdge { from, to }),
    }
}

/// One entry of the ephemeral candidate query.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub entity: Entity,
    /// Distance to the reference point (player or cursor).
    pub distance: Scalar,
    pub edible: bool,
    pub template: TemplateId,
    pub ancestor: TemplateId,
}

impl Candidate {
    /// Primary sort key: distance with an additive slack penalty for edible
    /// candidates. Equivalent to "prefer non-edible within the slack window"
    /// and transitive by construction.
    fn sort_key(&self, slack: Scalar) -> (Scalar, Entity) {
        let penalty = if self.edible { slack } else { Scalar::zero() };
        (self.distance + penalty, self.entity)
    }
}

pub fn sort_candidates(candidates: &mut [Candidate], slack: Scalar) {
    candidates.sort_unstable_by_key(|candidate| candidate.sort_key(slack));
}

/// Why a selection attempt was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    TimeExceeded,
    EmptyQuery,
    CandidateLost,
    Released,
}

/// Raw per-tick selection input, already debounced by the host: `step` is
/// non-zero only on a fresh directional press.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectInput {
    pub engage_held: bool,
    pub released: bool,
    pub step: i32,
    pub cursor_moved: bool,
    pub burst_held: bool,
}

/// Everything the machine needs from its surroundings for one tick.
///
/// `build` recomputes the ordered candidate query; `eligible` re-checks a
/// single candidate mid-selection.
pub struct SelectionContext<'a> {
    pub holding: bool,
    pub budget_ticks: i64,
    pub multi_target: bool,
    pub by_ancestor: bool,
    pub slack: Scalar,
    pub cursor_active: bool,
    pub build: &'a mut dyn FnMut() -> Vec<Candidate>,
    pub eligible: &'a dyn Fn(Entity) -> bool,
}

/// What the driving code must do after a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorOutcome {
    None,
    /// Idle interrupt: release every held possession, action locked this tick.
    ReleaseAll,
    /// Ready reached: attempt to commit each entity, in order.
    Commit(Vec<Entity>),
    Aborted(AbortReason),
}

/// The per-controller selection state machine.
#[derive(Debug, Default)]
pub struct TargetSelector {
    phase: SelectPhase,
    candidates: Vec<Candidate>,
    index: usize,
    elapsed: u32,
    time_exceeded: bool,
    rebuilt: bool,
    locked: bool,
}

impl TargetSelector {
    pub fn phase(&self) -> SelectPhase {
        self.phase
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    /// Candidate currently under the mark, for presentation consumers.
    pub fn primary(&self) -> Option<Entity> {
        self.candidates.get(self.index).map(|c| c.entity)
    }

    fn begin_attempt(&mut self) {
        self.candidates.clear();
        self.index = 0;
        self.elapsed = 0;
        self.time_exceeded = false;
        self.rebuilt = false;
        self.locked = false;
    }

    fn abort(&mut self, reason: AbortReason) -> SelectorOutcome {
        debug!("selection aborted: {reason:?}");
        self.candidates.clear();
        self.index = 0;
        self.phase = SelectPhase::Idle;
        SelectorOutcome::Aborted(reason)
    }

    /// Drive the machine for one tick of held-or-released engage input.
    pub fn tick(&mut self, input: &SelectInput, ctx: &mut SelectionContext<'_>) -> SelectorOutcome {
        if self.locked {
            // A locked attempt swallows input until the engage is let go.
            if input.released {
                self.locked = false;
                self.phase = SelectPhase::Idle;
            }
            return SelectorOutcome::None;
        }

        match self.phase {
            SelectPhase::Idle => self.tick_idle(input, ctx),
            SelectPhase::Querying => self.tick_querying(input, ctx),
            // Ready is entered and resolved within the release tick; seeing
            // it here means a driver skipped `finalize`.
            SelectPhase::Ready => self.finalize(ctx),
        }
    }

    fn tick_idle(&mut self, input: &SelectInput, ctx: &mut SelectionContext<'_>) -> SelectorOutcome {
        if !input.engage_held {
            // A bare release edge with nothing pending is not a new attempt.
            return SelectorOutcome::None;
        }
        if ctx.holding {
            // Interrupt, not a new selection: drop everything held and lock
            // further action for this attempt.
            self.locked = true;
            return SelectorOutcome::ReleaseAll;
        }
        self.begin_attempt();
        self.candidates = (ctx.build)();
        sort_candidates(&mut self.candidates, ctx.slack);
        self.phase = transition(self.phase, SelectPhase::Querying)
            .expect("idle to querying is a declared edge");
        SelectorOutcome::None
    }

    fn tick_querying(&mut self, input: &SelectInput, ctx: &mut SelectionContext<'_>) -> SelectorOutcome {
        self.elapsed += 1;
        if i64::from(self.elapsed) > ctx.budget_ticks.max(0) {
            self.time_exceeded = true;
        }

        if input.released {
            self.phase = transition(self.phase, SelectPhase::Ready)
                .expect("querying to ready is a declared edge");
            return self.finalize(ctx);
        }

        // Candidates that died or left the zone mid-selection drop out; if
        // the marked one is gone the whole attempt aborts.
        let primary = self.primary();
        self.candidates.retain(|candidate| (ctx.eligible)(candidate.entity));
        if let Some(primary) = primary {
            if !self.candidates.iter().any(|c| c.entity == primary) {
                return self.abort(AbortReason::CandidateLost);
            }
            self.index = self
                .candidates
                .iter()
                .position(|c| c.entity == primary)
                .unwrap_or(0);
        }

        if self.candidates.is_empty() {
            if self.rebuilt {
                self.locked = true;
                return self.abort(AbortReason::EmptyQuery);
            }
            // Self-refresh: the one rebuild this attempt is allowed.
            self.rebuilt = true;
            self.phase = transition(self.phase, SelectPhase::Querying)
                .expect("querying self-refresh is the declared wrap edge");
            self.candidates = (ctx.build)();
            sort_candidates(&mut self.candidates, ctx.slack);
            self.index = 0;
            if self.candidates.is_empty() {
                self.locked = true;
                return self.abort(AbortReason::EmptyQuery);
            }
            return SelectorOutcome::None;
        }

        if ctx.cursor_active {
            // Free-aim: any movement re-resolves against the cursor point.
            if input.cursor_moved || input.step != 0 {
                self.candidates = (ctx.build)();
                sort_candidates(&mut self.candidates, ctx.slack);
                self.index = 0;
            }
        } else if input.step != 0 {
            let len = self.candidates.len() as i64;
            let shifted = (self.index as i64 + i64::from(input.step)).rem_euclid(len);
            self.index = shifted as usize;
        }

        SelectorOutcome::None
    }

    /// Ready.update: resolve the final target set and hand it to the caller
    /// for commitment, then return to Idle.
    fn finalize(&mut self, ctx: &mut SelectionContext<'_>) -> SelectorOutcome {
        let outcome = if self.time_exceeded {
            self.abort(AbortReason::TimeExceeded)
        } else if self.candidates.is_empty() {
            self.abort(AbortReason::Released)
        } else {
            let resolved = self.resolve_set(ctx);
            self.candidates.clear();
            self.index = 0;
            self.phase = transition(SelectPhase::Ready, SelectPhase::Idle)
                .expect("ready to idle is a declared edge");
            SelectorOutcome::Commit(resolved)
        };
        outcome
    }

    fn resolve_set(&self, ctx: &SelectionContext<'_>) -> Vec<Entity> {
        let primary = match self.candidates.get(self.index) {
            Some(primary) => *primary,
            None => return Vec::new(),
        };
        if !ctx.multi_target {
            return vec![primary.entity];
        }
        let mut resolved = vec![primary.entity];
        for candidate in &self.candidates {
            if candidate.entity == primary.entity {
                continue;
            }
            let same_batch = if ctx.by_ancestor {
                candidate.ancestor == primary.ancestor
            } else {
                candidate.template == primary.template
            };
            if same_batch {
                resolved.push(candidate.entity);
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    fn entity(index: u32) -> Entity {
        Entity::from_raw(index)
    }

    fn candidate(index: u32, distance: f32, edible: bool, template: u16) -> Candidate {
        Candidate {
            entity: entity(index),
            distance: Scalar::from_f32(distance),
            edible,
            template: TemplateId(template),
            ancestor: TemplateId(template / 10),
        }
    }

    fn ctx<'a>(
        build: &'a mut dyn FnMut() -> Vec<Candidate>,
        eligible: &'a dyn Fn(Entity) -> bool,
    ) -> SelectionContext<'a> {
        SelectionContext {
            holding: false,
            budget_ticks: 360,
            multi_target: false,
            by_ancestor: false,
            slack: Scalar::from_f32(60.0),
            cursor_active: false,
            build,
            eligible,
        }
    }

    #[test]
    fn undeclared_transitions_fail_loudly() {
        // Backward edges and forward skips fail the same way.
        for (from, to) in [
            (SelectPhase::Ready, SelectPhase::Querying),
            (SelectPhase::Querying, SelectPhase::Idle),
            (SelectPhase::Idle, SelectPhase::Ready),
            (SelectPhase::Idle, SelectPhase::Idle),
        ] {
            assert_eq!(
                transition(from, to),
                Err(TransitionError::UndeclaredEdge { from, to })
            );
        }
    }

    #[test]
    fn declared_edges_succeed() {
        assert_eq!(
            transition(SelectPhase::Querying, SelectPhase::Querying),
            Ok(SelectPhase::Querying)
        );
        assert_eq!(
            transition(SelectPhase::Ready, SelectPhase::Idle),
            Ok(SelectPhase::Idle)
        );
    }

    #[test]
    fn sorter_prefers_non_edible_within_slack() {
        let mut list = vec![
            candidate(1, 100.0, false, 1),
            candidate(2, 50.0, true, 1),
            candidate(3, 10.0, true, 1),
        ];
        sort_candidates(&mut list, Scalar::from_f32(60.0));
        // Edible at 50 is within slack of the non-edible at 100; edible at 10
        // is not (effective 70 < 100).
        assert_eq!(list[0].entity, entity(3));
        assert_eq!(list[1].entity, entity(1));
        assert_eq!(list[2].entity, entity(2));
    }

    #[test]
    fn sorter_is_a_total_order() {
        let slack = Scalar::from_f32(60.0);
        let pool = vec![
            candidate(1, 100.0, false, 1),
            candidate(2, 41.0, true, 1),
            candidate(3, 39.0, true, 1),
            candidate(4, 44.0, false, 1),
            candidate(5, 100.0, true, 1),
        ];
        let cmp = |a: &Candidate, b: &Candidate| a.sort_key(slack).cmp(&b.sort_key(slack));
        for a in &pool {
            assert_eq!(cmp(a, a), Ordering::Equal);
            for b in &pool {
                assert_eq!(cmp(a, b), cmp(b, a).reverse());
                for c in &pool {
                    if cmp(a, b) != Ordering::Greater && cmp(b, c) != Ordering::Greater {
                        assert_ne!(cmp(a, c), Ordering::Greater);
                    }
                }
            }
        }
    }

    #[test]
    fn empty_query_rebuilds_exactly_once_then_locks() {
        let mut selector = TargetSelector::default();
        let mut builds = 0;
        let mut build = || {
            builds += 1;
            Vec::new()
        };
        let eligible = |_: Entity| true;

        let input = SelectInput {
            engage_held: true,
            ..Default::default()
        };
        let mut context = ctx(&mut build, &eligible);
        assert_eq!(selector.tick(&input, &mut context), SelectorOutcome::None);
        assert_eq!(selector.phase(), SelectPhase::Querying);
        assert_eq!(
            selector.tick(&input, &mut context),
            SelectorOutcome::Aborted(AbortReason::EmptyQuery)
        );
        drop(context);
        assert_eq!(builds, 2);
        assert!(selector.locked());
        assert_eq!(selector.phase(), SelectPhase::Idle);

        // While locked, held input is swallowed; release unlocks.
        let mut build_again = || -> Vec<Candidate> { panic!("locked attempt must not query") };
        let mut context = ctx(&mut build_again, &eligible);
        assert_eq!(selector.tick(&input, &mut context), SelectorOutcome::None);
        let release = SelectInput {
            released: true,
            ..Default::default()
        };
        assert_eq!(selector.tick(&release, &mut context), SelectorOutcome::None);
        assert!(!selector.locked());
    }

    #[test]
    fn directional_steps_wrap_around_the_list() {
        let mut selector = TargetSelector::default();
        let mut build = || {
            vec![
                candidate(1, 10.0, false, 1),
                candidate(2, 20.0, false, 1),
                candidate(3, 30.0, false, 1),
            ]
        };
        let eligible = |_: Entity| true;
        let mut context = ctx(&mut build, &eligible);

        let held = SelectInput {
            engage_held: true,
            ..Default::default()
        };
        selector.tick(&held, &mut context);
        let back = SelectInput {
            engage_held: true,
            step: -1,
            ..Default::default()
        };
        selector.tick(&back, &mut context);
        assert_eq!(selector.primary(), Some(entity(3)));

        let forward_two = SelectInput {
            engage_held: true,
            step: 2,
            ..Default::default()
        };
        selector.tick(&forward_two, &mut context);
        assert_eq!(selector.primary(), Some(entity(2)));
    }

    #[test]
    fn release_commits_single_target() {
        let mut selector = TargetSelector::default();
        let mut build = || vec![candidate(1, 10.0, false, 1), candidate(2, 20.0, false, 1)];
        let eligible = |_: Entity| true;
        let mut context = ctx(&mut build, &eligible);

        let held = SelectInput {
            engage_held: true,
            ..Default::default()
        };
        selector.tick(&held, &mut context);
        let release = SelectInput {
            released: true,
            ..Default::default()
        };
        assert_eq!(
            selector.tick(&release, &mut context),
            SelectorOutcome::Commit(vec![entity(1)])
        );
        assert_eq!(selector.phase(), SelectPhase::Idle);
    }

    #[test]
    fn multi_target_batches_by_template() {
        let mut selector = TargetSelector::default();
        let mut build = || {
            vec![
                candidate(1, 10.0, false, 7),
                candidate(2, 20.0, false, 7),
                candidate(3, 30.0, false, 9),
                candidate(4, 40.0, false, 7),
            ]
        };
        let eligible = |_: Entity| true;
        let mut context = ctx(&mut build, &eligible);
        context.multi_target = true;

        let held = SelectInput {
            engage_held: true,
            ..Default::default()
        };
        selector.tick(&held, &mut context);
        let release = SelectInput {
            released: true,
            ..Default::default()
        };
        assert_eq!(
            selector.tick(&release, &mut context),
            SelectorOutcome::Commit(vec![entity(1), entity(2), entity(4)])
        );
    }

    #[test]
    fn budget_expiry_aborts_on_release() {
        let mut selector = TargetSelector::default();
        let mut build = || vec![candidate(1, 10.0, false, 1)];
        let eligible = |_: Entity| true;
        let mut context = ctx(&mut build, &eligible);
        context.budget_ticks = 2;

        let held = SelectInput {
            engage_held: true,
            ..Default::default()
        };
        selector.tick(&held, &mut context);
        for _ in 0..3 {
            selector.tick(&held, &mut context);
        }
        let release = SelectInput {
            released: true,
            ..Default::default()
        };
        assert_eq!(
            selector.tick(&release, &mut context),
            SelectorOutcome::Aborted(AbortReason::TimeExceeded)
        );
    }

    #[test]
    fn losing_the_marked_candidate_aborts() {
        let mut selector = TargetSelector::default();
        let mut build = || vec![candidate(1, 10.0, false, 1), candidate(2, 20.0, false, 1)];
        let mut context = ctx(&mut build, &|_| true);
        let held = SelectInput {
            engage_held: true,
            ..Default::default()
        };
        selector.tick(&held, &mut context);
        selector.tick(&held, &mut context);
        assert_eq!(selector.primary(), Some(entity(1)));
        drop(context);

        let mut build = || vec![candidate(1, 10.0, false, 1), candidate(2, 20.0, false, 1)];
        let dead = entity(1);
        let eligible = move |e: Entity| e != dead;
        let mut context = ctx(&mut build, &eligible);
        assert_eq!(
            selector.tick(&held, &mut context),
            SelectorOutcome::Aborted(AbortReason::CandidateLost)
        );
        assert_eq!(selector.phase(), SelectPhase::Idle);
    }

    #[test]
    fn holding_possessions_turns_idle_into_an_interrupt() {
        let mut selector = TargetSelector::default();
        let mut build = || -> Vec<Candidate> { panic!("interrupt must not build a query") };
        let eligible = |_: Entity| true;
        let mut context = ctx(&mut build, &eligible);
        context.holding = true;

        let held = SelectInput {
            engage_held: true,
            ..Default::default()
        };
        assert_eq!(selector.tick(&held, &mut context), SelectorOutcome::ReleaseAll);
        assert!(selector.locked());
    }
}
