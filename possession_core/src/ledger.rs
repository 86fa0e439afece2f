//! Per-controller control-time budget.
//!
//! The ledger owns three coupled quantities: the time budget itself, the
//! cooldown counter, and the fatigue side-counter. Exhaustion is a first-class
//! terminal state with a defined recovery path, never an error.

use crate::scalar::Scalar;

/// Resource Ledger for one controller.
///
/// Depletion and regeneration rates are fixed at construction from the
/// controller's profile; they never travel over the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLedger {
    potential: Scalar,
    time_remaining: Scalar,
    cooldown: u32,
    /// Secondary depleting counter accrued while running low mid-possession.
    /// Recovers at its own rate, independent of steady-state regeneration.
    fatigue: Scalar,
    low_reserve: bool,
    floor: Scalar,
    spend_rate: Scalar,
    regen_rate: Scalar,
}

impl ResourceLedger {
    pub fn new(potential: Scalar, floor: Scalar, spend_rate: Scalar, regen_rate: Scalar) -> Self {
        Self {
            potential,
            time_remaining: potential,
            cooldown: 0,
            fatigue: Scalar::zero(),
            low_reserve: false,
            floor,
            spend_rate,
            regen_rate,
        }
    }

    pub fn potential(&self) -> Scalar {
        self.potential
    }

    pub fn time_remaining(&self) -> Scalar {
        self.time_remaining
    }

    pub fn cooldown(&self) -> u32 {
        self.cooldown
    }

    pub fn fatigue(&self) -> Scalar {
        self.fatigue
    }

    /// Presentation-facing flag; consumers must never mutate ledger state.
    pub fn low_reserve(&self) -> bool {
        self.low_reserve
    }

    pub fn can_spend(&self) -> bool {
        self.time_remaining > Scalar::zero() && self.cooldown == 0
    }

    pub fn is_exhausted(&self) -> bool {
        self.time_remaining <= Scalar::zero()
    }

    pub fn spend_rate(&self) -> Scalar {
        self.spend_rate
    }

    pub fn regen_rate(&self) -> Scalar {
        self.regen_rate
    }

    /// Drain the budget by the profile rate for one active-possession tick.
    ///
    /// Returns `true` when this call crossed zero, i.e. the caller must run
    /// the terminal-failure branch.
    pub fn spend(&mut self) -> bool {
        self.spend_at(self.spend_rate)
    }

    /// Drain at an explicit rate (burst discharge).
    pub fn spend_at(&mut self, rate: Scalar) -> bool {
        let before = self.time_remaining;
        self.time_remaining = (self.time_remaining - rate).clamp(self.floor, self.potential);
        before > Scalar::zero() && self.time_remaining <= Scalar::zero()
    }

    /// Regenerate toward potential at the profile rate; only meaningful while
    /// idle and off-cooldown, which the caller guarantees.
    pub fn regenerate(&mut self) {
        if self.cooldown > 0 {
            return;
        }
        self.time_remaining =
            (self.time_remaining + self.regen_rate).clamp(self.floor, self.potential);
    }

    /// Terminal-failure branch: pin the budget at the negative floor and
    /// force a full recovery period.
    pub fn exhaust(&mut self, cooldown: u32) {
        self.time_remaining = self.floor;
        self.cooldown = self.cooldown.max(cooldown);
    }

    pub fn start_cooldown(&mut self, ticks: u32) {
        self.cooldown = self.cooldown.max(ticks);
    }

    pub fn tick_cooldown(&mut self) {
        self.cooldown = self.cooldown.saturating_sub(1);
    }

    /// Re-evaluate the low-reserve condition and run the fatigue
    /// side-counter for one tick. `possessing` is whether any possession is
    /// currently active.
    pub fn tick_fatigue(&mut self, possessing: bool, threshold_ratio: Scalar, accrual: Scalar, recovery: Scalar) {
        self.low_reserve = possessing && self.time_remaining < self.potential * threshold_ratio;
        if self.low_reserve {
            self.fatigue += accrual;
        } else if !possessing && self.fatigue > Scalar::zero() {
            self.fatigue = (self.fatigue - recovery).clamp(Scalar::zero(), self.fatigue);
        }
    }

    /// Overwrite from a wire snapshot. Values are trusted as-received but
    /// still clamped into the ledger's legal range.
    pub fn overwrite(&mut self, potential: Scalar, time_remaining: Scalar, fatigue: Scalar, cooldown: u32) {
        self.potential = potential;
        self.time_remaining = time_remaining.clamp(self.floor, potential);
        self.fatigue = fatigue.clamp(Scalar::zero(), potential);
        self.cooldown = cooldown;
    }

    pub fn floor(&self) -> Scalar {
        self.floor
    }
}
