//! Pure odds computation: bond curve, pity escalation, tier windows, merges.
//!
//! Nothing in this module draws randomness or touches progress state; every
//! function is deterministic in its inputs so resolution stays replayable.

use crate::companions::Rarity;
use crate::constants::{
    BOND_MIDPOINT, BOND_PROB_CEILING, BOND_PROB_FLOOR, BOND_RATIO_SATURATION, BOND_SLOPE,
    MERGE_ODDS_BY_TIER, PITY_STEP_BONUS, PITY_STEP_FAILS, REWARD_BAND_THRESHOLDS, TIER_WINDOW,
    TIER_WINDOW_TOTAL,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when probability configuration invariants are violated.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be at least {min:.2} (got {value:.2})")]
    MinViolation {
        field: &'static str,
        min: f64,
        value: f64,
    },
    #[error("{field} must be between {min:.2} and {max:.2} (got {value:.2})")]
    RangeViolation {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
    #[error("{field} entries must be strictly ascending")]
    OrderViolation { field: &'static str },
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
}

/// Strength ratio feeding the bond curve. A zero-power companion is treated
/// as unreachable (ratio 0), never as a division blowup.
#[must_use]
pub fn power_ratio(player_power: u32, companion_power: u32) -> f64 {
    if companion_power == 0 {
        return 0.0;
    }
    f64::from(player_power) / f64::from(companion_power)
}

/// Base bond probability from relative strength.
///
/// Piecewise-linear and monotone: 0.50 at parity, saturating at 0.99 from
/// ratio 2.0 upward, bounded away from both certainty and impossibility.
#[must_use]
pub fn bond_probability(player_power: u32, companion_power: u32) -> f64 {
    let ratio = power_ratio(player_power, companion_power);
    let raw = if ratio >= BOND_RATIO_SATURATION {
        BOND_PROB_CEILING
    } else if ratio >= 1.0 {
        (ratio - 1.0).mul_add(BOND_SLOPE, BOND_MIDPOINT)
    } else {
        ratio.mul_add(BOND_SLOPE, BOND_PROB_FLOOR)
    };
    raw.clamp(BOND_PROB_FLOOR, BOND_PROB_CEILING)
}

/// One escalation step of the pity ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PityStep {
    /// Consecutive failed attempts required for the step to kick in.
    pub fails: u32,
    /// Additive probability bonus once reached.
    pub bonus: f64,
}

/// Escalating bad-luck protection for repeated failures on one companion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PityConfig {
    #[serde(default = "PityConfig::default_steps")]
    pub steps: Vec<PityStep>,
}

impl PityConfig {
    fn default_steps() -> Vec<PityStep> {
        PITY_STEP_FAILS
            .iter()
            .zip(PITY_STEP_BONUS.iter())
            .map(|(&fails, &bonus)| PityStep { fails, bonus })
            .collect()
    }

    /// Validate ladder invariants.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when steps are unordered or bonuses leave [0, 1).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.steps.is_empty() {
            return Err(ConfigError::EmptyField {
                field: "pity.steps",
            });
        }
        for pair in self.steps.windows(2) {
            if pair[1].fails <= pair[0].fails || pair[1].bonus < pair[0].bonus {
                return Err(ConfigError::OrderViolation {
                    field: "pity.steps",
                });
            }
        }
        for step in &self.steps {
            if !(0.0..1.0).contains(&step.bonus) {
                return Err(ConfigError::RangeViolation {
                    field: "pity.steps.bonus",
                    min: 0.0,
                    max: 1.0,
                    value: step.bonus,
                });
            }
        }
        Ok(())
    }
}

impl Default for PityConfig {
    fn default() -> Self {
        Self {
            steps: Self::default_steps(),
        }
    }
}

/// Additive pity bonus for a given failed-attempt count: the highest ladder
/// step already reached, 0.0 below the first step.
#[must_use]
pub fn pity_bonus(fails: u32, cfg: &PityConfig) -> f64 {
    cfg.steps
        .iter()
        .rev()
        .find(|step| fails >= step.fails)
        .map_or(0.0, |step| step.bonus)
}

/// Base probability plus pity, re-clamped to the curve bounds.
#[must_use]
pub fn effective_bond_probability(base: f64, fails: u32, cfg: &PityConfig) -> f64 {
    (base + pity_bonus(fails, cfg)).clamp(BOND_PROB_FLOOR, BOND_PROB_CEILING)
}

/// Symmetric rarity window centered on `center`.
///
/// Mass that would land beyond the scale edges folds onto the nearest
/// in-range tier, so the window always carries the full 100 points.
#[must_use]
pub fn window_weights(center: Rarity) -> [u32; 5] {
    let mut weights = [0u32; 5];
    let center_idx = center.index() as i32;
    for (slot, &mass) in TIER_WINDOW.iter().enumerate() {
        let offset = slot as i32 - 2;
        let idx = (center_idx + offset).clamp(0, 4) as usize;
        weights[idx] += mass;
    }
    debug_assert_eq!(weights.iter().sum::<u32>(), TIER_WINDOW_TOTAL);
    weights
}

/// Odds that a merge-altar attempt promotes a companion to its exceptional
/// variant. Harder for rarer tiers.
#[must_use]
pub fn merge_probability(rarity: Rarity) -> f64 {
    MERGE_ODDS_BY_TIER[rarity.index()].clamp(BOND_PROB_FLOOR, BOND_PROB_CEILING)
}

/// Magnitude cutoffs mapping a session measure onto a center tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardBandConfig {
    /// Thresholds for centers Uncommon, Rare, Epic, Legendary.
    #[serde(default = "RewardBandConfig::default_thresholds")]
    pub thresholds: [u32; 4],
}

impl RewardBandConfig {
    const fn default_thresholds() -> [u32; 4] {
        REWARD_BAND_THRESHOLDS
    }

    /// Validate threshold ordering.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when thresholds are not strictly ascending.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for pair in self.thresholds.windows(2) {
            if pair[1] <= pair[0] {
                return Err(ConfigError::OrderViolation {
                    field: "rewards.thresholds",
                });
            }
        }
        Ok(())
    }
}

impl Default for RewardBandConfig {
    fn default() -> Self {
        Self {
            thresholds: Self::default_thresholds(),
        }
    }
}

/// Center tier for a session magnitude (focus minutes, improvement points).
#[must_use]
pub fn reward_tier_center(magnitude: u32, cfg: &RewardBandConfig) -> Rarity {
    let reached = cfg
        .thresholds
        .iter()
        .filter(|&&threshold| magnitude >= threshold)
        .count();
    Rarity::from_index_clamped(reached)
}
