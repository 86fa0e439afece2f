//! Core crate for the possession-control prototype.
//!
//! Grants a controller temporary, resource-gated remote control over
//! possessable subjects in a tick-driven headless simulation, and keeps that
//! state consistent across peers. One [`run_tick`] call resolves a single
//! simulation tick for every controller.

mod components;
pub mod config;
mod ledger;
mod possession;
mod profile;
mod resolver;
mod scalar;
mod selection;
pub mod sync;
pub mod systems;

use bevy::prelude::*;

pub use components::{
    ControlFlag, ControllerState, Subject, SubjectTags, TemplateId, Vitals, WorldPos, ZoneId,
    ZoneMember,
};
pub use config::{ConfigError, PossessionConfig};
pub use ledger::ResourceLedger;
pub use possession::{
    EndReason, PenaltyKind, Possession, PossessionEffect, PossessionIndex, PossessionManager,
    SubjectView,
};
pub use profile::{
    ledger_for, potential_for, regen_rate_for, spend_rate_for, ProfileKind, ProgressionSnapshot,
};
pub use resolver::{NetId, NetRegistry, ResolveError};
pub use scalar::Scalar;
pub use selection::{
    sort_candidates, transition, AbortReason, Candidate, SelectInput, SelectPhase, TargetSelector,
    TransitionError,
};
pub use systems::{
    dispose_controller, reset_all_possessions, spawn_controller, spawn_subject, ControlCommand,
    DepletionEvent, InputQueue, PenaltyEvent, PossessionEnded, PossessionStarted, SimulationTick,
};

/// Construct a Bevy [`App`] configured with the possession tick pipeline.
pub fn build_headless_app() -> App {
    build_headless_app_with(PossessionConfig::default()).expect("default config is valid")
}

/// Same, with a host-supplied configuration. Conflicting mode flags are
/// rejected here, before the first tick runs.
pub fn build_headless_app_with(config: PossessionConfig) -> Result<App, ConfigError> {
    config.validate()?;

    let mut app = App::new();
    app.insert_resource(config)
        .insert_resource(SimulationTick::default())
        .insert_resource(NetRegistry::default())
        .insert_resource(PossessionIndex::default())
        .insert_resource(sync::SessionRole::default())
        .insert_resource(sync::PeerLinks::default())
        .insert_resource(sync::Outbox::default())
        .insert_resource(InputQueue::default())
        .add_event::<PossessionStarted>()
        .add_event::<PossessionEnded>()
        .add_event::<PenaltyEvent>()
        .add_event::<DepletionEvent>()
        .add_plugins(MinimalPlugins)
        .add_systems(
            Update,
            (
                systems::drain_inbox,
                systems::update_controllers,
                systems::repair_ghost_possession,
                systems::flush_outbox,
                systems::advance_tick,
            )
                .chain(),
        );

    Ok(app)
}

/// Execute a single simulation tick.
///
/// Inbound peer messages are applied first, then every controller's
/// selection/ledger update, then ghost repair and the outbound flush.
pub fn run_tick(app: &mut App) {
    app.update();
}
