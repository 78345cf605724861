//! Deterministic outcome resolution from canonical rolls.
//!
//! These functions are the single source of truth for what a roll means.
//! The animation layer and the Finalizer both resolve through here, which is
//! what makes the two-phase contract sound: identical inputs, identical
//! outcome, no second draw.

use crate::companions::Rarity;
use crate::events::{LotteryDecisionTrace, RollValue, WeightedCandidate};
use crate::numbers::u32_to_f64;

/// Binary resolution: success iff the roll lands under the probability.
#[must_use]
pub fn resolve_success(roll: f64, probability: f64) -> bool {
    roll < probability
}

/// Tiered resolution over a cumulative-weight partition of [0, 1).
///
/// Buckets are laid out in ascending rarity order; a roll selects the bucket
/// containing it. With zero total weight the lowest tier is returned.
#[must_use]
pub fn resolve_tier(roll: f64, weights: &[u32; 5]) -> Rarity {
    let total: u32 = weights.iter().sum();
    if total == 0 {
        return Rarity::Common;
    }
    let scaled = roll.clamp(0.0, 1.0) * u32_to_f64(total);
    let mut cumulative = 0.0;
    for (idx, &weight) in weights.iter().enumerate() {
        cumulative += u32_to_f64(weight);
        if scaled < cumulative {
            return Rarity::from_index_clamped(idx);
        }
    }
    Rarity::Legendary
}

/// Trace for a binary success/fail decision.
#[must_use]
pub fn success_trace(pool_id: &str, roll: f64, probability: f64, success: bool) -> LotteryDecisionTrace {
    let candidates = vec![
        WeightedCandidate {
            id: String::from("success"),
            base_weight: probability,
            multipliers: Vec::new(),
            final_weight: probability,
        },
        WeightedCandidate {
            id: String::from("failure"),
            base_weight: 1.0 - probability,
            multipliers: Vec::new(),
            final_weight: 1.0 - probability,
        },
    ];
    LotteryDecisionTrace {
        pool_id: pool_id.to_string(),
        roll: RollValue::F64(roll),
        candidates,
        chosen_id: String::from(if success { "success" } else { "failure" }),
    }
}

/// Trace for a tiered decision.
#[must_use]
pub fn tier_trace(pool_id: &str, roll: f64, weights: &[u32; 5], chosen: Rarity) -> LotteryDecisionTrace {
    let candidates = Rarity::ALL
        .iter()
        .map(|tier| {
            let weight = u32_to_f64(weights[tier.index()]);
            WeightedCandidate {
                id: tier.to_string(),
                base_weight: weight,
                multipliers: Vec::new(),
                final_weight: weight,
            }
        })
        .collect();
    LotteryDecisionTrace {
        pool_id: pool_id.to_string(),
        roll: RollValue::F64(roll),
        candidates,
        chosen_id: chosen.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_boundary_is_strict() {
        assert!(resolve_success(0.49, 0.50));
        assert!(!resolve_success(0.50, 0.50));
        assert!(!resolve_success(0.51, 0.50));
        assert!(resolve_success(0.0, 0.01));
    }

    #[test]
    fn resolution_is_pure() {
        let weights = [5, 20, 50, 20, 5];
        for roll in [0.0, 0.2, 0.499, 0.75, 0.999_999] {
            assert_eq!(resolve_tier(roll, &weights), resolve_tier(roll, &weights));
            assert_eq!(
                resolve_success(roll, 0.37),
                resolve_success(roll, 0.37)
            );
        }
    }

    #[test]
    fn tier_buckets_partition_ascending() {
        let weights = [5, 20, 50, 20, 5];
        assert_eq!(resolve_tier(0.0, &weights), Rarity::Common);
        assert_eq!(resolve_tier(0.049, &weights), Rarity::Common);
        assert_eq!(resolve_tier(0.05, &weights), Rarity::Uncommon);
        assert_eq!(resolve_tier(0.249, &weights), Rarity::Uncommon);
        assert_eq!(resolve_tier(0.25, &weights), Rarity::Rare);
        assert_eq!(resolve_tier(0.749, &weights), Rarity::Rare);
        assert_eq!(resolve_tier(0.75, &weights), Rarity::Epic);
        assert_eq!(resolve_tier(0.95, &weights), Rarity::Legendary);
        assert_eq!(resolve_tier(0.999_999, &weights), Rarity::Legendary);
    }

    #[test]
    fn tier_resolution_survives_degenerate_weights() {
        assert_eq!(resolve_tier(0.9, &[0, 0, 0, 0, 0]), Rarity::Common);
        assert_eq!(resolve_tier(0.5, &[0, 0, 100, 0, 0]), Rarity::Rare);
    }

    #[test]
    fn traces_name_the_chosen_candidate() {
        let trace = success_trace("wildgrove.bond", 0.3, 0.5, true);
        assert_eq!(trace.chosen_id, "success");
        assert_eq!(trace.candidates.len(), 2);

        let weights = [75, 20, 5, 0, 0];
        let chosen = resolve_tier(0.1, &weights);
        let trace = tier_trace("wildgrove.reward", 0.1, &weights, chosen);
        assert_eq!(trace.chosen_id, chosen.to_string());
        let mass: f64 = trace.candidates.iter().map(|c| c.final_weight).sum();
        assert!((mass - 100.0).abs() < 1e-9, "trace must conserve weight mass");
    }
}
