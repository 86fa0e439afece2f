//! Per-tick systems and host-facing world helpers.
//!
//! One update pass per controller per tick, cooperative and non-blocking:
//! inbound messages are applied before controller updates, outbound frames
//! are flushed after, and the ghost-repair pass keeps control flags and the
//! reverse index agreeing.

use std::collections::HashMap;

use bevy::{math::Vec2, prelude::*};
use log::warn;

use possession_proto::WireMessage;

use crate::components::{
    ControlFlag, ControllerState, Subject, SubjectTags, TemplateId, Vitals, WorldPos, ZoneId,
    ZoneMember,
};
use crate::config::PossessionConfig;
use crate::possession::{
    EndReason, PenaltyKind, PossessionEffect, PossessionIndex, PossessionManager, SubjectView,
    UpdateContext,
};
use crate::profile::{ledger_for, ProfileKind, ProgressionSnapshot};
use crate::resolver::{NetId, NetRegistry};
use crate::scalar::Scalar;
use crate::selection::{Candidate, SelectInput};
use crate::sync::{
    answer_sync_request, apply_snapshot, capture_snapshot, Outbox, PeerLinks, SessionRole,
    SyncError,
};

/// Tracks total simulation ticks elapsed.
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationTick(pub u64);

/// One controller's raw input for the coming tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlCommand {
    pub input: SelectInput,
    /// Free-aim cursor position; `Some` switches the query to cursor mode.
    pub cursor: Option<Vec2>,
}

/// Host-fed input, consumed once per tick per controller.
#[derive(Resource, Default)]
pub struct InputQueue {
    pending: HashMap<Entity, ControlCommand>,
}

impl InputQueue {
    pub fn push(&mut self, controller: Entity, command: ControlCommand) {
        self.pending.insert(controller, command);
    }

    fn take(&mut self, controller: Entity) -> ControlCommand {
        self.pending.remove(&controller).unwrap_or_default()
    }
}

#[derive(Event, Debug, Clone, Copy)]
pub struct PossessionStarted {
    pub controller: Entity,
    pub subject: Entity,
}

#[derive(Event, Debug, Clone, Copy)]
pub struct PossessionEnded {
    pub controller: Entity,
    pub subject: Entity,
    pub reason: EndReason,
}

#[derive(Event, Debug, Clone, Copy)]
pub struct PenaltyEvent {
    pub controller: Entity,
    pub kind: PenaltyKind,
}

#[derive(Event, Debug, Clone, Copy)]
pub struct DepletionEvent {
    pub controller: Entity,
}

struct SubjectRow {
    entity: Entity,
    pos: Vec2,
    view: SubjectView,
    template: TemplateId,
    ancestor: TemplateId,
}

type SubjectQuery<'w, 's> = Query<
    'w,
    's,
    (
        Entity,
        &'static Subject,
        &'static Vitals,
        &'static ZoneMember,
        &'static WorldPos,
        &'static mut ControlFlag,
    ),
    Without<PossessionManager>,
>;

/// Apply every queued inbound message before this peer's own tick update.
#[allow(clippy::too_many_arguments)]
pub fn drain_inbox(
    links: Res<PeerLinks>,
    role: Res<SessionRole>,
    registry: Res<NetRegistry>,
    tick: Res<SimulationTick>,
    mut outbox: ResMut<Outbox>,
    mut index: ResMut<PossessionIndex>,
    mut managers: Query<(Entity, &mut PossessionManager)>,
    mut flags: Query<&mut ControlFlag>,
) {
    for link in links.iter() {
        for message in link.drain() {
            match message {
                WireMessage::RequestSync { controller } => {
                    let reply = answer_sync_request(*role, controller, || {
                        let entity = registry
                            .local_entity(NetId(controller))
                            .map_err(|_| SyncError::UnknownController(controller))?;
                        let (_, manager) = managers
                            .get(entity)
                            .map_err(|_| SyncError::UnknownController(controller))?;
                        capture_snapshot(entity, manager, &registry)
                    });
                    outbox.push(reply);
                }
                WireMessage::FullState { snapshot } => {
                    let entity = match registry.local_entity(NetId(snapshot.controller)) {
                        Ok(entity) => entity,
                        Err(_) => {
                            warn!(
                                "dropping full-state push for unknown controller {}",
                                snapshot.controller
                            );
                            outbox.push(WireMessage::SyncRejected {
                                controller: snapshot.controller,
                                reason: possession_proto::RejectReason::UnknownController,
                            });
                            continue;
                        }
                    };
                    let Ok((_, mut manager)) = managers.get_mut(entity) else {
                        warn!("full-state push for entity without a manager: {entity:?}");
                        continue;
                    };
                    match apply_snapshot(&snapshot, &mut manager, entity, &mut index, &registry, tick.0)
                    {
                        Ok(_) => {
                            let adopted: Vec<Entity> =
                                manager.held().iter().map(|p| p.subject).collect();
                            for subject in adopted {
                                if let Ok(mut flag) = flags.get_mut(subject) {
                                    flag.controlled = true;
                                }
                            }
                        }
                        Err(err) => warn!("failed to apply full-state push: {err}"),
                    }
                }
                WireMessage::PossessionEffect {
                    controller,
                    subject,
                    active,
                } => {
                    let Ok(controller_entity) = registry.local_entity(NetId(controller)) else {
                        warn!("dropping possession effect for unknown controller {controller}");
                        outbox.push(WireMessage::SyncRejected {
                            controller,
                            reason: possession_proto::RejectReason::UnknownController,
                        });
                        continue;
                    };
                    let Ok(subject_entity) = registry.local_entity(NetId(subject)) else {
                        warn!("skipping possession effect for unknown subject {subject}");
                        continue;
                    };
                    let Ok((_, mut manager)) = managers.get_mut(controller_entity) else {
                        continue;
                    };
                    if manager.apply_remote(subject_entity, active, tick.0) {
                        if active {
                            index.insert(subject_entity, controller_entity);
                        } else if index.owner_of(subject_entity) == Some(controller_entity) {
                            index.remove(subject_entity);
                        }
                        if let Ok(mut flag) = flags.get_mut(subject_entity) {
                            flag.controlled = active;
                        }
                    }
                }
                WireMessage::ControlFlag {
                    subject,
                    controlled,
                } => match registry.local_entity(NetId(subject)) {
                    Ok(entity) => {
                        if let Ok(mut flag) = flags.get_mut(entity) {
                            flag.controlled = controlled;
                        }
                    }
                    Err(_) => warn!("skipping control flag for unknown subject {subject}"),
                },
                WireMessage::SyncRejected { controller, reason } => {
                    warn!("sync request for controller {controller} rejected: {reason:?}");
                }
            }
        }
    }
}

/// Drive every possession manager for one tick.
#[allow(clippy::too_many_arguments)]
pub fn update_controllers(
    tick: Res<SimulationTick>,
    config: Res<PossessionConfig>,
    registry: Res<NetRegistry>,
    mut inputs: ResMut<InputQueue>,
    mut outbox: ResMut<Outbox>,
    mut index: ResMut<PossessionIndex>,
    mut started_events: EventWriter<PossessionStarted>,
    mut ended_events: EventWriter<PossessionEnded>,
    mut penalty_events: EventWriter<PenaltyEvent>,
    mut depletion_events: EventWriter<DepletionEvent>,
    mut controllers: Query<(Entity, &mut PossessionManager, &ControllerState, &WorldPos)>,
    mut subjects: SubjectQuery,
) {
    for (controller_entity, mut manager, state, controller_pos) in controllers.iter_mut() {
        let command = inputs.take(controller_entity);
        let mut effects = Vec::new();

        // Possessions end when the subject dies, despawns, or leaves the
        // controller's zone.
        let held: Vec<Entity> = manager.held().iter().map(|p| p.subject).collect();
        for subject in held {
            match subjects.get(subject) {
                Ok((_, _, vitals, zone, _, _)) => {
                    if !vitals.alive {
                        manager.stop(subject, EndReason::SubjectDied, &config, &mut effects);
                    } else if zone.zone != state.zone {
                        manager.stop(subject, EndReason::LeftZone, &config, &mut effects);
                    }
                }
                Err(_) => manager.stop(subject, EndReason::SubjectDied, &config, &mut effects),
            }
        }

        let rows: Vec<SubjectRow> = subjects
            .iter()
            .filter(|(_, _, _, zone, _, _)| zone.zone == state.zone)
            .map(|(entity, subject, vitals, zone, pos, flag)| SubjectRow {
                entity,
                pos: pos.0,
                view: SubjectView {
                    alive: vitals.alive,
                    controlled: flag.controlled,
                    zone: zone.zone,
                    tags: subject.tags,
                },
                template: subject.template,
                ancestor: subject.ancestor,
            })
            .collect();

        let reference = command.cursor.unwrap_or(controller_pos.0);
        let mut build = || {
            rows.iter()
                .filter(|row| row.view.eligible())
                .map(|row| Candidate {
                    entity: row.entity,
                    distance: Scalar::from_f32(row.pos.distance(reference)),
                    edible: row.view.tags.contains(SubjectTags::EDIBLE),
                    template: row.template,
                    ancestor: row.ancestor,
                })
                .collect::<Vec<_>>()
        };
        let view = |entity: Entity| {
            rows.iter()
                .find(|row| row.entity == entity)
                .map(|row| row.view)
        };
        let mut ctx = UpdateContext {
            build: &mut build,
            view: &view,
            cursor_active: command.cursor.is_some(),
        };
        effects.extend(manager.update(tick.0, &command.input, *state, &config, &mut ctx));

        for effect in effects {
            match effect {
                PossessionEffect::Started { subject } => {
                    if let Ok((_, _, _, _, _, mut flag)) = subjects.get_mut(subject) {
                        flag.controlled = true;
                    }
                    index.insert(subject, controller_entity);
                    started_events.send(PossessionStarted {
                        controller: controller_entity,
                        subject,
                    });
                    broadcast_effect(&registry, &mut outbox, controller_entity, subject, true);
                }
                PossessionEffect::Ended { subject, reason } => {
                    if let Ok((_, _, _, _, _, mut flag)) = subjects.get_mut(subject) {
                        flag.controlled = false;
                    }
                    if index.owner_of(subject) == Some(controller_entity) {
                        index.remove(subject);
                    }
                    ended_events.send(PossessionEnded {
                        controller: controller_entity,
                        subject,
                        reason,
                    });
                    broadcast_effect(&registry, &mut outbox, controller_entity, subject, false);
                }
                PossessionEffect::Penalty(kind) => {
                    penalty_events.send(PenaltyEvent {
                        controller: controller_entity,
                        kind,
                    });
                }
                PossessionEffect::Depleted => {
                    depletion_events.send(DepletionEvent {
                        controller: controller_entity,
                    });
                }
            }
        }
    }
}

/// Enqueue the start/stop transition and its control-flag mirror. Entities
/// without stable ids are logged and skipped, never fatal.
fn broadcast_effect(
    registry: &NetRegistry,
    outbox: &mut Outbox,
    controller: Entity,
    subject: Entity,
    active: bool,
) {
    match (registry.stable_id(controller), registry.stable_id(subject)) {
        (Ok(controller_id), Ok(subject_id)) => {
            outbox.push(WireMessage::PossessionEffect {
                controller: controller_id.0,
                subject: subject_id.0,
                active,
            });
            outbox.push(WireMessage::ControlFlag {
                subject: subject_id.0,
                controlled: active,
            });
        }
        _ => warn!("skipping broadcast for unregistered pair {controller:?}/{subject:?}"),
    }
}

/// Repair "ghost possession": control flags with no owning controller, and
/// index entries whose manager no longer backs them.
pub fn repair_ghost_possession(
    mut index: ResMut<PossessionIndex>,
    managers: Query<&PossessionManager>,
    mut flags: Query<(Entity, &mut ControlFlag)>,
) {
    let stale: Vec<Entity> = index
        .subjects()
        .filter(|(subject, controller)| {
            flags.get(*subject).is_err()
                || managers
                    .get(*controller)
                    .map(|manager| !manager.holds(*subject))
                    .unwrap_or(true)
        })
        .map(|(subject, _)| subject)
        .collect();
    for subject in stale {
        index.remove(subject);
    }

    for (entity, mut flag) in flags.iter_mut() {
        if flag.controlled && index.owner_of(entity).is_none() {
            warn!("clearing ghost control flag on {entity:?}");
            flag.controlled = false;
        }
    }
}

/// Send everything queued this tick to every peer link.
pub fn flush_outbox(links: Res<PeerLinks>, mut outbox: ResMut<Outbox>) {
    let messages = outbox.drain();
    if messages.is_empty() {
        return;
    }
    for link in links.iter() {
        for message in &messages {
            if let Err(err) = link.send(message) {
                warn!("outbound flush failed: {err}");
            }
        }
    }
}

pub fn advance_tick(mut tick: ResMut<SimulationTick>) {
    tick.0 = tick.0.wrapping_add(1);
}

/// Spawn a possessable subject and register its stable id.
pub fn spawn_subject(
    world: &mut World,
    template: TemplateId,
    ancestor: TemplateId,
    tags: SubjectTags,
    zone: ZoneId,
    pos: Vec2,
) -> Entity {
    let entity = world
        .spawn((
            Subject::new(template, ancestor, tags),
            Vitals::default(),
            ZoneMember { zone },
            WorldPos(pos),
            ControlFlag::default(),
        ))
        .id();
    world.resource_mut::<NetRegistry>().register(entity);
    entity
}

/// Spawn a controller with a manager sized from its profile. Idempotent per
/// session: controllers are created lazily on first need by the host.
pub fn spawn_controller(
    world: &mut World,
    profile: ProfileKind,
    progression: ProgressionSnapshot,
    zone: ZoneId,
    pos: Vec2,
) -> Entity {
    let ledger = {
        let config = world.resource::<PossessionConfig>();
        ledger_for(profile, progression, config)
    };
    let entity = world
        .spawn((
            PossessionManager::new(profile, ledger),
            ControllerState {
                conscious: true,
                zone,
            },
            WorldPos(pos),
        ))
        .id();
    world.resource_mut::<NetRegistry>().register(entity);
    entity
}

/// Dispose a controller: release everything, prune back-references, despawn.
pub fn dispose_controller(world: &mut World, controller: Entity) {
    let mut effects = Vec::new();
    if let Some(mut manager) = world.get_mut::<PossessionManager>(controller) {
        manager.dispose(&mut effects);
    }
    for effect in effects {
        if let PossessionEffect::Ended { subject, .. } = effect {
            if let Some(mut flag) = world.get_mut::<ControlFlag>(subject) {
                flag.controlled = false;
            }
        }
    }
    world
        .resource_mut::<PossessionIndex>()
        .remove_controller(controller);
    world.resource_mut::<NetRegistry>().unregister(controller);
    world.despawn(controller);
}

/// Global consistency repair: clear every relation, index entry, and flag.
pub fn reset_all_possessions(world: &mut World) {
    let mut effects = Vec::new();
    let mut managers = world.query::<&mut PossessionManager>();
    for mut manager in managers.iter_mut(world) {
        manager.reset_all(&mut effects);
    }
    let mut flags = world.query::<&mut ControlFlag>();
    for mut flag in flags.iter_mut(world) {
        flag.controlled = false;
    }
    world.resource_mut::<PossessionIndex>().clear();
}
