//! Controller possession profiles.
//!
//! A profile fixes the ledger bounds and the penalty shape for one kind of
//! controller. Potential is derived through a pure function of the profile
//! and a progression snapshot so the ledger stays testable in isolation.

use crate::config::PossessionConfig;
use crate::ledger::ResourceLedger;
use crate::scalar::Scalar;
use possession_proto::ProfileWireFlags;

/// Named possession profiles recognised by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    /// Baseline profile.
    Drifter,
    /// High-potential profile.
    Warden,
    /// Rarest, most fragile profile: penalties end in self-destruction.
    Wisp,
    /// Zero-potential profile: may possess nothing, ever.
    Husk,
}

impl ProfileKind {
    pub fn name(self) -> &'static str {
        match self {
            ProfileKind::Drifter => "drifter",
            ProfileKind::Warden => "warden",
            ProfileKind::Wisp => "wisp",
            ProfileKind::Husk => "husk",
        }
    }

    fn base_potential(self) -> Scalar {
        match self {
            ProfileKind::Drifter => Scalar::from_i64(360),
            ProfileKind::Warden => Scalar::from_i64(520),
            ProfileKind::Wisp => Scalar::from_i64(140),
            ProfileKind::Husk => Scalar::zero(),
        }
    }

    /// Budget drained per held tick. Asymmetric on purpose: the wisp burns
    /// hot, the warden paces itself.
    fn base_spend_rate(self) -> Scalar {
        match self {
            ProfileKind::Drifter => Scalar::from_f32(0.5),
            ProfileKind::Warden => Scalar::from_f32(0.4),
            ProfileKind::Wisp => Scalar::from_f32(0.8),
            ProfileKind::Husk => Scalar::zero(),
        }
    }

    /// Budget recovered per idle off-cooldown tick.
    fn base_regen_rate(self) -> Scalar {
        match self {
            ProfileKind::Drifter => Scalar::from_f32(0.5),
            ProfileKind::Warden => Scalar::from_f32(0.7),
            ProfileKind::Wisp => Scalar::from_f32(0.3),
            ProfileKind::Husk => Scalar::zero(),
        }
    }

    pub fn fragile(self) -> bool {
        matches!(self, ProfileKind::Wisp)
    }

    pub fn zero_potential(self) -> bool {
        matches!(self, ProfileKind::Husk)
    }

    pub fn wire_flags(self) -> ProfileWireFlags {
        let mut flags = ProfileWireFlags::empty();
        if self.fragile() {
            flags |= ProfileWireFlags::FRAGILE;
        }
        if self.zero_potential() {
            flags |= ProfileWireFlags::ZERO_POTENTIAL;
        }
        flags
    }
}

/// Value snapshot of the host's difficulty/progression signal.
///
/// Taken by value so the potential function never reaches into live state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressionSnapshot {
    /// Multiplier applied to the base potential. 1.0 is the neutral value.
    pub difficulty_scale: Scalar,
}

impl Default for ProgressionSnapshot {
    fn default() -> Self {
        Self {
            difficulty_scale: Scalar::one(),
        }
    }
}

/// Pure ledger-bounds derivation: profile + progression -> potential.
///
/// Config overrides (keyed by profile name) replace the base value before the
/// progression scale is applied. A zero-potential profile stays at zero no
/// matter what the progression signal says.
pub fn potential_for(
    profile: ProfileKind,
    progression: ProgressionSnapshot,
    config: &PossessionConfig,
) -> Scalar {
    if profile.zero_potential() {
        return Scalar::zero();
    }
    let base = config
        .potential_overrides
        .get(profile.name())
        .map(|value| Scalar::from_f32(*value))
        .unwrap_or_else(|| profile.base_potential());
    (base * progression.difficulty_scale).clamp(Scalar::zero(), Scalar::from_i64(100_000))
}

/// Per-tick depletion rate: profile base, replaceable per profile name.
pub fn spend_rate_for(profile: ProfileKind, config: &PossessionConfig) -> Scalar {
    config
        .spend_overrides
        .get(profile.name())
        .map(|value| Scalar::from_f32(*value))
        .unwrap_or_else(|| profile.base_spend_rate())
}

/// Per-tick regeneration rate: profile base, replaceable per profile name.
pub fn regen_rate_for(profile: ProfileKind, config: &PossessionConfig) -> Scalar {
    config
        .regen_overrides
        .get(profile.name())
        .map(|value| Scalar::from_f32(*value))
        .unwrap_or_else(|| profile.base_regen_rate())
}

/// Assemble the full ledger for one controller: bounds from the potential
/// function, rates from the profile.
pub fn ledger_for(
    profile: ProfileKind,
    progression: ProgressionSnapshot,
    config: &PossessionConfig,
) -> ResourceLedger {
    ResourceLedger::new(
        potential_for(profile, progression, config),
        config.exhaust_floor_scalar(),
        spend_rate_for(profile, config),
        regen_rate_for(profile, config),
    )
}
