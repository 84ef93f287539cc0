//! Rising Hazard
//!
//! Tracks the flood line chasing the participants. Its rise rate grows with
//! elapsed turns (not wall-clock time), can be boosted by temporary bonuses
//! that expire after a number of turns, and is capped by a ceiling rate.
//!
//! ```text
//! rate = min(ceiling, (base + elapsed_turns * growth) * multiplier)
//! ```
//!
//! Once the flood line reaches `flood_ceiling` the rate drops to zero for good.

use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use crate::game::events::SessionEventData;
use crate::game::types::NodeRole;

/// Nominal multiplier; the running multiplier never drops below it.
pub const BASE_MULTIPLIER: f64 = 1.0;

/// Configuration for the hazard curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HazardConfig {
    /// Rise rate at zero elapsed turns (units per second).
    pub base_rate: f64,
    /// Rate added per elapsed turn.
    pub growth_per_turn: f64,
    /// Maximum effective rate.
    pub ceiling_rate: f64,
    /// Coordinate at which the level is fully flooded.
    pub flood_ceiling: f64,
}

impl Default for HazardConfig {
    fn default() -> Self {
        Self {
            base_rate: 0.3,
            growth_per_turn: 0.01,
            ceiling_rate: 2.0,
            flood_ceiling: 250.0,
        }
    }
}

/// Authoritative hazard state.
#[derive(Debug, Clone)]
pub struct HazardState {
    role: NodeRole,
    config: HazardConfig,
    /// Turns elapsed since the last reset. Never decreases between resets.
    elapsed_turns: u32,
    /// Running multiplier (>= 1.0).
    multiplier: f64,
    /// Sum of every bonus delta applied under the current countdown.
    bonus_total: f64,
    /// Turns until the accumulated bonus reverts (0 = no countdown).
    bonus_turns_remaining: u32,
    /// Current flood line coordinate.
    position: f64,
    /// Flood line reached the ceiling.
    flooded: bool,
    events: Vec<SessionEventData>,
}

impl HazardState {
    /// Create hazard state starting at `start_coordinate`.
    pub fn new(role: NodeRole, config: HazardConfig, start_coordinate: f64) -> Self {
        Self {
            role,
            elapsed_turns: 0,
            multiplier: BASE_MULTIPLIER,
            bonus_total: 0.0,
            bonus_turns_remaining: 0,
            position: start_coordinate,
            flooded: start_coordinate >= config.flood_ceiling,
            config,
            events: Vec::new(),
        }
    }

    /// Current effective rise rate.
    pub fn effective_rate(&self) -> f64 {
        if self.flooded {
            return 0.0;
        }
        let growth = self.config.base_rate + self.elapsed_turns as f64 * self.config.growth_per_turn;
        (growth * self.multiplier).min(self.config.ceiling_rate).max(0.0)
    }

    /// Advance the flood line by one simulation step.
    pub fn tick(&mut self, dt_secs: f64) -> bool {
        if !self.role.is_authority() {
            debug!("hazard tick rejected: not authority");
            return false;
        }
        if !dt_secs.is_finite() || dt_secs <= 0.0 || self.flooded {
            return false;
        }

        self.position += self.effective_rate() * dt_secs;

        if self.position >= self.config.flood_ceiling {
            self.position = self.config.flood_ceiling;
            self.flooded = true;
            info!("Hazard flooded at {:.2}", self.position);
            self.events.push(SessionEventData::HazardFlooded { position: self.position });
        }
        true
    }

    /// Apply a temporary bonus to the multiplier.
    ///
    /// Overlapping bonuses add up and share one countdown, which is extended
    /// to the longer of the current remainder and `duration_turns`.
    pub fn add_bonus(&mut self, multiplier_delta: f64, duration_turns: u32) -> bool {
        if !self.role.is_authority() {
            debug!("add_bonus rejected: not authority");
            return false;
        }
        if !multiplier_delta.is_finite() || multiplier_delta <= 0.0 {
            debug!("add_bonus rejected: non-positive delta {}", multiplier_delta);
            return false;
        }
        if duration_turns == 0 {
            debug!("add_bonus rejected: zero duration");
            return false;
        }

        self.multiplier += multiplier_delta;
        self.bonus_total += multiplier_delta;
        self.bonus_turns_remaining = self.bonus_turns_remaining.max(duration_turns);

        self.events.push(SessionEventData::HazardBonusApplied {
            multiplier: self.multiplier,
            remaining_turns: self.bonus_turns_remaining,
        });
        true
    }

    /// Turn-ended hook: grows the baseline and counts down the bonus.
    pub fn on_turn_ended(&mut self) -> bool {
        if !self.role.is_authority() {
            debug!("hazard on_turn_ended rejected: not authority");
            return false;
        }

        self.elapsed_turns = self.elapsed_turns.saturating_add(1);

        if self.bonus_turns_remaining > 0 {
            self.bonus_turns_remaining -= 1;
            if self.bonus_turns_remaining == 0 {
                self.multiplier = (self.multiplier - self.bonus_total).max(BASE_MULTIPLIER);
                self.bonus_total = 0.0;
                self.events.push(SessionEventData::HazardBonusExpired { multiplier: self.multiplier });
            }
        }
        true
    }

    /// Reset to the base curve with the flood line at `start_coordinate`.
    pub fn reset_to(&mut self, start_coordinate: f64) -> bool {
        if !self.role.is_authority() {
            debug!("hazard reset rejected: not authority");
            return false;
        }

        self.elapsed_turns = 0;
        self.multiplier = BASE_MULTIPLIER;
        self.bonus_total = 0.0;
        self.bonus_turns_remaining = 0;
        self.position = start_coordinate;
        self.flooded = start_coordinate >= self.config.flood_ceiling;
        if self.flooded {
            info!("Hazard reset at {:.2}, already at the flood ceiling", start_coordinate);
            self.events.push(SessionEventData::HazardFlooded { position: start_coordinate });
        }
        true
    }

    /// Restore the elapsed-turn count from a committed checkpoint baseline.
    pub fn restore_elapsed(&mut self, baseline: u32) -> bool {
        if !self.role.is_authority() {
            debug!("hazard restore rejected: not authority");
            return false;
        }
        self.elapsed_turns = baseline;
        true
    }

    /// Turns elapsed since the last reset.
    pub fn elapsed_turns(&self) -> u32 {
        self.elapsed_turns
    }

    /// Running multiplier.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Turns until the active bonus reverts.
    pub fn bonus_turns_remaining(&self) -> u32 {
        self.bonus_turns_remaining
    }

    /// Current flood line coordinate.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Check if the flood ceiling was reached.
    pub fn is_flooded(&self) -> bool {
        self.flooded
    }

    /// Hazard configuration.
    pub fn config(&self) -> &HazardConfig {
        &self.config
    }

    /// Take pending events.
    pub fn take_events(&mut self) -> Vec<SessionEventData> {
        std::mem::take(&mut self.events)
    }
}
