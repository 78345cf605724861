//! Session-reward lottery: focus magnitude to rarity tier to payout.

use crate::companions::Rarity;
use crate::constants::REWARD_PAYOUT_BY_TIER;
use crate::probability::{ConfigError, RewardBandConfig, reward_tier_center, window_weights};
use serde::{Deserialize, Serialize};

/// Tuning for session rewards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardConfig {
    #[serde(default)]
    pub bands: RewardBandConfig,
    /// Currency payout per resolved tier.
    #[serde(default = "RewardConfig::default_payouts")]
    pub payouts: [i64; 5],
}

impl RewardConfig {
    const fn default_payouts() -> [i64; 5] {
        REWARD_PAYOUT_BY_TIER
    }

    /// Validate payout invariants.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when payouts are negative or not ascending.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bands.validate()?;
        if self.payouts[0] < 0 {
            return Err(ConfigError::MinViolation {
                field: "rewards.payouts",
                min: 0.0,
                value: -1.0,
            });
        }
        for pair in self.payouts.windows(2) {
            if pair[1] <= pair[0] {
                return Err(ConfigError::OrderViolation {
                    field: "rewards.payouts",
                });
            }
        }
        Ok(())
    }

    /// Payout for a resolved tier.
    #[must_use]
    pub const fn payout_for(&self, tier: Rarity) -> i64 {
        self.payouts[tier.index()]
    }
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            bands: RewardBandConfig::default(),
            payouts: Self::default_payouts(),
        }
    }
}

/// The weights a session magnitude puts on the tier wheel, plus its center.
#[must_use]
pub fn reward_plan(magnitude: u32, cfg: &RewardConfig) -> (Rarity, [u32; 5]) {
    let center = reward_tier_center(magnitude, &cfg.bands);
    (center, window_weights(center))
}
