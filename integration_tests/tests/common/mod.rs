#![allow(dead_code)]

use bevy::ecs::event::{Event, Events};
use bevy::math::Vec2;
use bevy::prelude::*;

use possession_core::{
    build_headless_app_with, spawn_controller, spawn_subject, ControlCommand, InputQueue,
    PossessionConfig, ProfileKind, ProgressionSnapshot, SelectInput, SubjectTags, TemplateId,
    ZoneId,
};

pub const ZONE: ZoneId = ZoneId(1);

/// Headless app with one controller and `subject_count` plain subjects in a
/// shared zone, spaced a unit apart so candidate ordering is deterministic.
pub fn scene(config: PossessionConfig, subject_count: u32) -> (App, Entity, Vec<Entity>) {
    let mut app = build_headless_app_with(config).expect("config");
    let controller = spawn_controller(
        &mut app.world,
        ProfileKind::Drifter,
        ProgressionSnapshot::default(),
        ZONE,
        Vec2::ZERO,
    );
    let subjects = (0..subject_count)
        .map(|i| {
            spawn_subject(
                &mut app.world,
                TemplateId(7),
                TemplateId(0),
                SubjectTags::empty(),
                ZONE,
                Vec2::new(1.0 + i as f32, 0.0),
            )
        })
        .collect();
    (app, controller, subjects)
}

pub fn engage(app: &mut App, controller: Entity) {
    app.world.resource_mut::<InputQueue>().push(
        controller,
        ControlCommand {
            input: SelectInput {
                engage_held: true,
                ..Default::default()
            },
            cursor: None,
        },
    );
}

pub fn release(app: &mut App, controller: Entity) {
    app.world.resource_mut::<InputQueue>().push(
        controller,
        ControlCommand {
            input: SelectInput {
                released: true,
                ..Default::default()
            },
            cursor: None,
        },
    );
}

/// Hold engage for two ticks, then release: commits the nearest candidate.
pub fn possess_nearest(app: &mut App, controller: Entity) {
    engage(app, controller);
    app.update();
    engage(app, controller);
    app.update();
    release(app, controller);
    app.update();
}

/// Every event of `E` still buffered, oldest first.
pub fn drained_events<E: Event + Clone>(app: &App) -> Vec<E> {
    let events = app.world.resource::<Events<E>>();
    let mut reader = events.get_reader();
    reader.read(events).cloned().collect()
}
