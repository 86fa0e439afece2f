use bevy::math::Vec2;
use bevy::prelude::{App, Entity};

use possession_core::{
    build_headless_app, run_tick, spawn_controller, spawn_subject, ControlCommand, InputQueue,
    PossessionManager, ProfileKind, ProgressionSnapshot, SelectInput, SubjectTags, TemplateId,
    ZoneId,
};

const ZONE: ZoneId = ZoneId(1);

fn controller(app: &mut App) -> Entity {
    spawn_controller(
        &mut app.world,
        ProfileKind::Drifter,
        ProgressionSnapshot::default(),
        ZONE,
        Vec2::ZERO,
    )
}

fn subject(app: &mut App, tags: SubjectTags, pos: Vec2) -> Entity {
    spawn_subject(&mut app.world, TemplateId(7), TemplateId(0), tags, ZONE, pos)
}

fn command(app: &mut App, controller: Entity, input: SelectInput, cursor: Option<Vec2>) {
    app.world
        .resource_mut::<InputQueue>()
        .push(controller, ControlCommand { input, cursor });
}

fn held() -> SelectInput {
    SelectInput {
        engage_held: true,
        ..Default::default()
    }
}

fn released() -> SelectInput {
    SelectInput {
        released: true,
        ..Default::default()
    }
}

#[test]
fn cursor_mode_targets_the_subject_under_the_cursor() {
    let mut app = build_headless_app();
    let player = controller(&mut app);
    let _near = subject(&mut app, SubjectTags::empty(), Vec2::new(1.0, 0.0));
    let far = subject(&mut app, SubjectTags::empty(), Vec2::new(10.0, 0.0));

    let cursor = Some(Vec2::new(10.0, 0.0));
    command(&mut app, player, held(), cursor);
    run_tick(&mut app);
    command(&mut app, player, held(), cursor);
    run_tick(&mut app);
    command(&mut app, player, released(), cursor);
    run_tick(&mut app);

    let manager = app.world.get::<PossessionManager>(player).expect("manager");
    assert!(
        manager.holds(far),
        "cursor mode measures distance from the cursor, not the player"
    );
}

#[test]
fn edible_subjects_lose_the_tie_break_within_slack() {
    let mut app = build_headless_app();
    let player = controller(&mut app);
    let _snack = subject(&mut app, SubjectTags::EDIBLE, Vec2::new(1.0, 0.0));
    let plain = subject(&mut app, SubjectTags::empty(), Vec2::new(2.0, 0.0));

    command(&mut app, player, held(), None);
    run_tick(&mut app);
    command(&mut app, player, released(), None);
    run_tick(&mut app);

    let manager = app.world.get::<PossessionManager>(player).expect("manager");
    assert!(
        manager.holds(plain),
        "a slightly farther non-edible subject outranks the edible one"
    );
}

#[test]
fn directional_step_commits_the_stepped_target() {
    let mut app = build_headless_app();
    let player = controller(&mut app);
    let nearest = subject(&mut app, SubjectTags::empty(), Vec2::new(1.0, 0.0));
    let second = subject(&mut app, SubjectTags::empty(), Vec2::new(2.0, 0.0));
    let _third = subject(&mut app, SubjectTags::empty(), Vec2::new(3.0, 0.0));

    command(&mut app, player, held(), None);
    run_tick(&mut app);
    command(
        &mut app,
        player,
        SelectInput {
            engage_held: true,
            step: 1,
            ..Default::default()
        },
        None,
    );
    run_tick(&mut app);
    command(&mut app, player, released(), None);
    run_tick(&mut app);

    let manager = app.world.get::<PossessionManager>(player).expect("manager");
    assert!(manager.holds(second));
    assert!(!manager.holds(nearest));
}
