//! Read-only configuration surface for the possession system.
//!
//! The host supplies these values once at session start; the core never
//! persists or mutates them. Fatigue tuning lives here rather than in code
//! because the two-speed recovery *shape* is contractual, the numbers are
//! balance.

use std::collections::HashMap;

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;

use crate::scalar::Scalar;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("multi-target mode and single-ascended mode are mutually exclusive")]
    ModeConflict,
    #[error("ancestor batching requires multi-target mode")]
    AncestorWithoutMultiTarget,
    #[error("low-reserve ratio {0} outside (0, 1)")]
    BadReserveRatio(f32),
    #[error("rate `{name}` must be non-negative, got {value}")]
    NegativeRate { name: &'static str, value: f32 },
}

/// Root configuration for possession control.
#[derive(Debug, Clone, Deserialize, Resource)]
#[serde(default)]
pub struct PossessionConfig {
    /// Per-profile potential overrides, keyed by profile name.
    pub potential_overrides: HashMap<String, f32>,
    /// Per-profile depletion-rate overrides, keyed by profile name.
    pub spend_overrides: HashMap<String, f32>,
    /// Per-profile regeneration-rate overrides, keyed by profile name.
    pub regen_overrides: HashMap<String, f32>,
    /// Select every eligible subject sharing the primary's template.
    pub multi_target: bool,
    /// Restrict selection to a single ascended target.
    pub ascended_single: bool,
    /// Batch by the template's categorical ancestor instead of the template.
    pub possess_ancestors: bool,
    /// Debug toggle: spending never drains the ledger.
    pub infinite_reserve: bool,
    /// Host-read toggle: slow possessed movement in multiplayer sessions.
    /// The core carries but never consumes it.
    pub multiplayer_slowdown: bool,
    /// When set, the zero-potential punitive rule is suppressed.
    pub safety_overrides: bool,
    /// Enable the burst discharge ability.
    pub burst_enabled: bool,

    pub low_reserve_ratio: f32,
    pub fatigue_accrual: f32,
    pub fatigue_recovery: f32,
    pub burst_spend_rate: f32,
    /// Fixed negative floor applied by `Exhaust`.
    pub exhaust_floor: f32,
    /// Cooldown ticks applied by `Exhaust`.
    pub exhaust_cooldown: u32,
    /// Cooldown ticks applied by an ordinary stop.
    pub stop_cooldown: u32,
    /// Distance slack within which non-edible targets win the tie-break.
    pub sorter_slack: f32,
}

impl Default for PossessionConfig {
    fn default() -> Self {
        Self {
            potential_overrides: HashMap::new(),
            spend_overrides: HashMap::new(),
            regen_overrides: HashMap::new(),
            multi_target: false,
            ascended_single: false,
            possess_ancestors: false,
            infinite_reserve: false,
            multiplayer_slowdown: false,
            safety_overrides: false,
            burst_enabled: false,
            low_reserve_ratio: 0.34,
            fatigue_accrual: 0.25,
            fatigue_recovery: 0.1,
            burst_spend_rate: 2.0,
            exhaust_floor: -80.0,
            exhaust_cooldown: 200,
            stop_cooldown: 40,
            sorter_slack: 60.0,
        }
    }
}

impl PossessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Reject combinations the selection machine cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ascended_single && (self.multi_target || self.possess_ancestors) {
            return Err(ConfigError::ModeConflict);
        }
        if self.possess_ancestors && !self.multi_target {
            return Err(ConfigError::AncestorWithoutMultiTarget);
        }
        if !(0.0..1.0).contains(&self.low_reserve_ratio) || self.low_reserve_ratio == 0.0 {
            return Err(ConfigError::BadReserveRatio(self.low_reserve_ratio));
        }
        for (name, value) in [
            ("fatigue_accrual", self.fatigue_accrual),
            ("fatigue_recovery", self.fatigue_recovery),
            ("burst_spend_rate", self.burst_spend_rate),
            ("sorter_slack", self.sorter_slack),
        ] {
            if value < 0.0 {
                return Err(ConfigError::NegativeRate { name, value });
            }
        }
        for (name, overrides) in [
            ("spend_overrides", &self.spend_overrides),
            ("regen_overrides", &self.regen_overrides),
        ] {
            if let Some(value) = overrides.values().copied().find(|value| *value < 0.0) {
                return Err(ConfigError::NegativeRate { name, value });
            }
        }
        Ok(())
    }

    pub fn low_reserve_ratio_scalar(&self) -> Scalar {
        Scalar::from_f32(self.low_reserve_ratio)
    }

    pub fn exhaust_floor_scalar(&self) -> Scalar {
        Scalar::from_f32(self.exhaust_floor)
    }

    pub fn sorter_slack_scalar(&self) -> Scalar {
        Scalar::from_f32(self.sorter_slack)
    }
}
