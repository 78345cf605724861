//! Encounter selection: which uncollected companion gets offered next.
#[cfg(debug_assertions)]
use crate::constants::DEBUG_ENV_VAR;
use crate::companions::{Companion, CompanionCatalog, CompanionId};
use crate::constants::{
    ENCOUNTER_BAND_WEIGHTS, ENCOUNTER_BAND_WIDTH, ENCOUNTER_FAR_WEIGHT,
    ENCOUNTER_PITY_WEIGHT_BONUS,
};
use crate::events::{LotteryDecisionTrace, RollValue, WeightFactor, WeightedCandidate};
use crate::probability::{ConfigError, PityConfig, bond_probability, effective_bond_probability};
use crate::progress::ProgressState;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Stable identifier for a pending offer.
pub type EncounterId = String;

#[cfg(debug_assertions)]
fn debug_log_enabled() -> bool {
    matches!(std::env::var(DEBUG_ENV_VAR), Ok(val) if val != "0")
}

#[cfg(not(debug_assertions))]
const fn debug_log_enabled() -> bool {
    false
}

/// A single pending offer that can be opened later.
///
/// The probability snapshot is authoritative: opening the offer resolves at
/// this value regardless of how player strength drifted in the meantime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterRecord {
    pub id: EncounterId,
    pub companion_id: CompanionId,
    /// Bond probability frozen when the offer was created or recalibrated.
    pub probability: f64,
    /// Pity counter at offer time, kept for display.
    pub pity_at_offer: u32,
    /// Host-supplied tick at creation.
    pub created_at: u64,
    /// Recalibrations already applied to this offer.
    #[serde(default)]
    pub recalibrations: u32,
}

/// Selection weighting parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterConfig {
    /// Power distance covered by one proximity band.
    #[serde(default = "EncounterConfig::default_band_width")]
    pub band_width: u32,
    /// Weight per band index, closest band first.
    #[serde(default = "EncounterConfig::default_band_weights")]
    pub band_weights: Vec<u32>,
    /// Weight for companions beyond the last band.
    #[serde(default = "EncounterConfig::default_far_weight")]
    pub far_weight: u32,
    /// Additive selection weight per prior failed bond attempt.
    #[serde(default = "EncounterConfig::default_pity_weight_bonus")]
    pub pity_weight_bonus: u32,
}

impl EncounterConfig {
    const fn default_band_width() -> u32 {
        ENCOUNTER_BAND_WIDTH
    }

    fn default_band_weights() -> Vec<u32> {
        ENCOUNTER_BAND_WEIGHTS.to_vec()
    }

    const fn default_far_weight() -> u32 {
        ENCOUNTER_FAR_WEIGHT
    }

    const fn default_pity_weight_bonus() -> u32 {
        ENCOUNTER_PITY_WEIGHT_BONUS
    }

    /// Validate weighting invariants.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the band table cannot drive a selection.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.band_width == 0 {
            return Err(ConfigError::MinViolation {
                field: "encounter.band_width",
                min: 1.0,
                value: 0.0,
            });
        }
        if self.band_weights.is_empty() {
            return Err(ConfigError::EmptyField {
                field: "encounter.band_weights",
            });
        }
        if self.band_weights[0] == 0 {
            return Err(ConfigError::MinViolation {
                field: "encounter.band_weights[0]",
                min: 1.0,
                value: 0.0,
            });
        }
        Ok(())
    }
}

impl Default for EncounterConfig {
    fn default() -> Self {
        Self {
            band_width: Self::default_band_width(),
            band_weights: Self::default_band_weights(),
            far_weight: Self::default_far_weight(),
            pity_weight_bonus: Self::default_pity_weight_bonus(),
        }
    }
}

/// Inputs for one selection draw.
pub struct OfferRequest<'a> {
    pub catalog: &'a CompanionCatalog,
    pub progress: &'a ProgressState,
    pub player_power: u32,
    /// Host-supplied tick stamped onto the record.
    pub now: u64,
    pub cfg: &'a EncounterConfig,
    pub pity: &'a PityConfig,
}

/// Outcome of a selection draw.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferPick {
    pub record: EncounterRecord,
    pub decision_trace: LotteryDecisionTrace,
}

/// Choose which companion to offer, if any remain.
///
/// Returns `None` once every companion is collected or already offered —
/// a terminal state, not an error. The draw comes from the dedicated
/// encounter stream, never from a bond attempt's canonical envelope.
#[must_use]
pub fn offer_encounter<R: Rng>(request: &OfferRequest<'_>, rng: &mut R) -> Option<OfferPick> {
    let candidates = filter_candidates(request);

    if debug_log_enabled() {
        println!(
            "Encounter selection | power:{} candidates:{}",
            request.player_power,
            candidates.len()
        );
    }

    if candidates.is_empty() {
        return None;
    }

    let weighted = build_weights(&candidates, request);
    let (chosen_idx, roll) = choose_weighted(&weighted, rng)?;
    let companion = candidates[chosen_idx];

    let pity = request.progress.pity_for(&companion.id);
    let probability = effective_bond_probability(
        bond_probability(request.player_power, companion.power),
        pity,
        request.pity,
    );

    let record = EncounterRecord {
        id: format!("enc-{:06}", request.progress.encounters_offered() + 1),
        companion_id: companion.id.clone(),
        probability,
        pity_at_offer: pity,
        created_at: request.now,
        recalibrations: 0,
    };

    let decision_trace = build_decision_trace(&candidates, &weighted, roll, companion, request);
    Some(OfferPick {
        record,
        decision_trace,
    })
}

fn filter_candidates<'a>(request: &OfferRequest<'a>) -> Vec<&'a Companion> {
    request
        .catalog
        .companions
        .iter()
        .filter(|companion| {
            !request.progress.is_collected(&companion.id)
                && !request.progress.has_pending_offer_for(&companion.id)
        })
        .collect()
}

/// Proximity band index for a companion: 0 is the closest band.
fn band_index(player_power: u32, companion_power: u32, band_width: u32) -> usize {
    let distance = player_power.abs_diff(companion_power);
    (distance / band_width.max(1)) as usize
}

fn build_weights(
    candidates: &[&Companion],
    request: &OfferRequest<'_>,
) -> Vec<(usize, u32)> {
    let cfg = request.cfg;
    let mut weighted = Vec::with_capacity(candidates.len());
    for (idx, companion) in candidates.iter().enumerate() {
        let band = band_index(request.player_power, companion.power, cfg.band_width);
        let base = cfg
            .band_weights
            .get(band)
            .copied()
            .unwrap_or(cfg.far_weight);
        let pity = request.progress.pity_for(&companion.id);
        let weight = base.saturating_add(pity.saturating_mul(cfg.pity_weight_bonus));
        weighted.push((idx, weight.max(1)));
    }
    weighted
}

fn choose_weighted<R: Rng>(weights: &[(usize, u32)], rng: &mut R) -> Option<(usize, u32)> {
    let total_weight: u32 = weights.iter().map(|(_, weight)| *weight).sum();
    if total_weight == 0 {
        return None;
    }

    let roll = rng.gen_range(0..total_weight);
    let mut current = 0;
    for (idx, weight) in weights {
        current += *weight;
        if roll < current {
            return Some((*idx, roll));
        }
    }

    weights.first().map(|(idx, _)| (*idx, roll))
}

fn build_decision_trace(
    candidates: &[&Companion],
    weights: &[(usize, u32)],
    roll: u32,
    chosen: &Companion,
    request: &OfferRequest<'_>,
) -> LotteryDecisionTrace {
    const POOL_ID: &str = "wildgrove.encounter";

    let weighted_candidates = weights
        .iter()
        .filter_map(|(idx, final_weight)| {
            let companion = *candidates.get(*idx)?;
            let band = band_index(
                request.player_power,
                companion.power,
                request.cfg.band_width,
            );
            let base_weight = f64::from(
                request
                    .cfg
                    .band_weights
                    .get(band)
                    .copied()
                    .unwrap_or(request.cfg.far_weight)
                    .max(1),
            );
            let final_weight_f = f64::from(*final_weight);
            Some(WeightedCandidate {
                id: companion.id.clone(),
                base_weight,
                multipliers: vec![WeightFactor {
                    label: String::from("pity"),
                    value: final_weight_f / base_weight,
                }],
                final_weight: final_weight_f,
            })
        })
        .collect();

    LotteryDecisionTrace {
        pool_id: String::from(POOL_ID),
        roll: RollValue::U32(roll),
        candidates: weighted_candidates,
        chosen_id: chosen.id.clone(),
    }
}
