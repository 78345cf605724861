//! Recalibration of pending offers: paid re-snapshots and risky re-rolls.

use crate::companions::Companion;
use crate::constants::{
    RECALIBRATION_BACKFIRE, RECALIBRATION_BOOST, RECALIBRATION_MAX_PER_OFFER,
    RECALIBRATION_PAID_COST, RECALIBRATION_RISKY_SUCCESS,
};
use crate::constants::{BOND_PROB_CEILING, BOND_PROB_FLOOR};
use crate::encounter::EncounterRecord;
use crate::probability::{ConfigError, PityConfig, bond_probability, effective_bond_probability};
use serde::{Deserialize, Serialize};

/// Tuning for both recalibration flavors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalibrationConfig {
    /// Currency fee for a paid re-snapshot.
    #[serde(default = "RecalibrationConfig::default_paid_cost")]
    pub paid_cost: i64,
    /// Stage-one success probability of the risky flavor.
    #[serde(default = "RecalibrationConfig::default_risky_success")]
    pub risky_success: f64,
    /// Additive probability boost on risky success.
    #[serde(default = "RecalibrationConfig::default_boost")]
    pub boost: f64,
    /// Additive probability penalty on risky backfire.
    #[serde(default = "RecalibrationConfig::default_backfire")]
    pub backfire: f64,
    /// Recalibrations allowed per offer across both flavors.
    #[serde(default = "RecalibrationConfig::default_max_per_offer")]
    pub max_per_offer: u32,
}

impl RecalibrationConfig {
    const fn default_paid_cost() -> i64 {
        RECALIBRATION_PAID_COST
    }

    const fn default_risky_success() -> f64 {
        RECALIBRATION_RISKY_SUCCESS
    }

    const fn default_boost() -> f64 {
        RECALIBRATION_BOOST
    }

    const fn default_backfire() -> f64 {
        RECALIBRATION_BACKFIRE
    }

    const fn default_max_per_offer() -> u32 {
        RECALIBRATION_MAX_PER_OFFER
    }

    /// Validate tuning invariants.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when any field leaves its documented bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.paid_cost < 0 {
            return Err(ConfigError::MinViolation {
                field: "recalibration.paid_cost",
                min: 0.0,
                value: -1.0,
            });
        }
        if !(0.0..=1.0).contains(&self.risky_success) {
            return Err(ConfigError::RangeViolation {
                field: "recalibration.risky_success",
                min: 0.0,
                max: 1.0,
                value: self.risky_success,
            });
        }
        for (field, value) in [
            ("recalibration.boost", self.boost),
            ("recalibration.backfire", self.backfire),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(ConfigError::RangeViolation {
                    field,
                    min: 0.0,
                    max: 1.0,
                    value,
                });
            }
        }
        if self.max_per_offer == 0 {
            return Err(ConfigError::MinViolation {
                field: "recalibration.max_per_offer",
                min: 1.0,
                value: 0.0,
            });
        }
        Ok(())
    }
}

impl Default for RecalibrationConfig {
    fn default() -> Self {
        Self {
            paid_cost: Self::default_paid_cost(),
            risky_success: Self::default_risky_success(),
            boost: Self::default_boost(),
            backfire: Self::default_backfire(),
            max_per_offer: Self::default_max_per_offer(),
        }
    }
}

/// Fresh probability snapshot for a paid recalibration: recomputed from
/// current strength and the companion's live pity counter. Deterministic —
/// the paid flavor buys a recompute, not a gamble.
#[must_use]
pub fn paid_snapshot(
    companion: &Companion,
    player_power: u32,
    pity_fails: u32,
    pity: &PityConfig,
) -> f64 {
    effective_bond_probability(
        bond_probability(player_power, companion.power),
        pity_fails,
        pity,
    )
}

/// Adjusted probability after a risky recalibration's stage-one outcome.
#[must_use]
pub fn risky_adjusted(record: &EncounterRecord, success: bool, cfg: &RecalibrationConfig) -> f64 {
    let shifted = if success {
        record.probability + cfg.boost
    } else {
        record.probability - cfg.backfire
    };
    shifted.clamp(BOND_PROB_FLOOR, BOND_PROB_CEILING)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FLOAT_EPSILON;
    use crate::companions::Rarity;

    fn record_with_probability(probability: f64) -> EncounterRecord {
        EncounterRecord {
            id: String::from("enc-000001"),
            companion_id: String::from("ember_fox"),
            probability,
            pity_at_offer: 0,
            created_at: 0,
            recalibrations: 0,
        }
    }

    #[test]
    fn risky_outcomes_shift_and_clamp() {
        let cfg = RecalibrationConfig::default();
        cfg.validate().expect("defaults valid");

        let mid = record_with_probability(0.40);
        assert!((risky_adjusted(&mid, true, &cfg) - 0.55).abs() < FLOAT_EPSILON);
        assert!((risky_adjusted(&mid, false, &cfg) - 0.30).abs() < FLOAT_EPSILON);

        let high = record_with_probability(0.95);
        assert!((risky_adjusted(&high, true, &cfg) - 0.99).abs() < FLOAT_EPSILON);
        let low = record_with_probability(0.05);
        assert!((risky_adjusted(&low, false, &cfg) - 0.01).abs() < FLOAT_EPSILON);
    }

    #[test]
    fn paid_snapshot_tracks_current_strength_and_pity() {
        let companion = Companion {
            id: String::from("ember_fox"),
            name: String::from("Ember Fox"),
            power: 100,
            rarity: Rarity::Rare,
            biome: String::new(),
        };
        let pity = PityConfig::default();
        let weak = paid_snapshot(&companion, 50, 0, &pity);
        let strong = paid_snapshot(&companion, 150, 0, &pity);
        assert!(strong > weak);
        let pitied = paid_snapshot(&companion, 50, 5, &pity);
        assert!((pitied - (weak + 0.10)).abs() < FLOAT_EPSILON);
    }

    #[test]
    fn config_rejects_out_of_range_fields() {
        let cfg = RecalibrationConfig {
            risky_success: 1.5,
            ..RecalibrationConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::RangeViolation { field, .. }) if field == "recalibration.risky_success"
        ));

        let cfg = RecalibrationConfig {
            max_per_offer: 0,
            ..RecalibrationConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
