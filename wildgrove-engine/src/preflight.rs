//! Precondition validation: every check runs before any roll or animation.
//!
//! A request that cannot possibly finalize must be rejected here, so the
//! player never watches a lottery animation for an attempt that was doomed
//! before it started.

use crate::companions::{CompanionCatalog, CompanionId, Rarity};
use crate::constants::MERGE_COST_BY_TIER;
use crate::encounter::EncounterId;
use crate::probability::ConfigError;
use crate::progress::ProgressState;
use crate::recalc::RecalibrationConfig;
use crate::sequence::AttemptRequest;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a request was blocked before any randomness was generated.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockReason {
    #[error("insufficient currency: need {required}, have {available}")]
    InsufficientCurrency { required: i64, available: i64 },
    #[error("feature locked: {feature}")]
    FeatureLocked { feature: String },
    #[error("encounter {encounter} is unknown or already consumed")]
    UnknownEncounter { encounter: EncounterId },
    #[error("companion {companion} is unknown")]
    UnknownCompanion { companion: CompanionId },
    #[error("companion {companion} is already collected")]
    AlreadyCollected { companion: CompanionId },
    #[error("companion {companion} is not collected yet")]
    NotCollected { companion: CompanionId },
    #[error("companion {companion} is already exceptional")]
    AlreadyExceptional { companion: CompanionId },
    #[error("offer {encounter} has no recalibrations left (limit {limit})")]
    RecalibrationExhausted { encounter: EncounterId, limit: u32 },
    #[error("another attempt is already in flight")]
    AttemptInFlight,
}

/// Fee table for the merge altar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostSchedule {
    /// Merge fee per rarity tier.
    #[serde(default = "CostSchedule::default_merge_fees")]
    pub merge_fees: [i64; 5],
}

impl CostSchedule {
    const fn default_merge_fees() -> [i64; 5] {
        MERGE_COST_BY_TIER
    }

    /// Merge fee for a companion of the given rarity.
    #[must_use]
    pub const fn merge_fee(&self, rarity: Rarity) -> i64 {
        self.merge_fees[rarity.index()]
    }

    /// Validate fee invariants.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when fees are negative or not ascending.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.merge_fees[0] < 0 {
            return Err(ConfigError::MinViolation {
                field: "costs.merge_fees",
                min: 0.0,
                value: -1.0,
            });
        }
        for pair in self.merge_fees.windows(2) {
            if pair[1] <= pair[0] {
                return Err(ConfigError::OrderViolation {
                    field: "costs.merge_fees",
                });
            }
        }
        Ok(())
    }
}

impl Default for CostSchedule {
    fn default() -> Self {
        Self {
            merge_fees: Self::default_merge_fees(),
        }
    }
}

/// Read-only context for precondition checks.
pub struct PreflightContext<'a> {
    pub progress: &'a ProgressState,
    pub catalog: &'a CompanionCatalog,
    pub costs: &'a CostSchedule,
    pub recalibration: &'a RecalibrationConfig,
}

/// Check every precondition of an attempt request.
///
/// # Errors
///
/// Returns the first `BlockReason` that applies; `Ok` means a roll may be
/// generated for this request.
pub fn validate_request(
    request: &AttemptRequest,
    ctx: &PreflightContext<'_>,
) -> Result<(), BlockReason> {
    match request {
        AttemptRequest::Bond { encounter_id } => {
            let record = pending_record(encounter_id, ctx)?;
            if ctx.progress.is_collected(&record.companion_id) {
                return Err(BlockReason::AlreadyCollected {
                    companion: record.companion_id.clone(),
                });
            }
            Ok(())
        }
        AttemptRequest::RecalibrateRisky { encounter_id } => {
            let record = pending_record(encounter_id, ctx)?;
            if !ctx.progress.features().risky_recalibration {
                return Err(BlockReason::FeatureLocked {
                    feature: String::from("risky_recalibration"),
                });
            }
            if record.recalibrations >= ctx.recalibration.max_per_offer {
                return Err(BlockReason::RecalibrationExhausted {
                    encounter: encounter_id.clone(),
                    limit: ctx.recalibration.max_per_offer,
                });
            }
            Ok(())
        }
        AttemptRequest::SessionReward { .. } => Ok(()),
        AttemptRequest::Merge { companion_id } => {
            if !ctx.progress.features().merge_altar {
                return Err(BlockReason::FeatureLocked {
                    feature: String::from("merge_altar"),
                });
            }
            let companion =
                ctx.catalog
                    .get(companion_id)
                    .ok_or_else(|| BlockReason::UnknownCompanion {
                        companion: companion_id.clone(),
                    })?;
            let entry = ctx.progress.collection_entry(companion_id).ok_or_else(|| {
                BlockReason::NotCollected {
                    companion: companion_id.clone(),
                }
            })?;
            if entry.exceptional {
                return Err(BlockReason::AlreadyExceptional {
                    companion: companion_id.clone(),
                });
            }
            let fee = ctx.costs.merge_fee(companion.rarity);
            ensure_affordable(ctx.progress, fee)
        }
    }
}

/// Check the preconditions of a paid recalibration (a direct, roll-free
/// operation, so it is not an `AttemptRequest`).
///
/// # Errors
///
/// Returns the first applicable `BlockReason`.
pub fn validate_paid_recalibration(
    encounter_id: &str,
    ctx: &PreflightContext<'_>,
) -> Result<(), BlockReason> {
    let record = pending_record(encounter_id, ctx)?;
    if record.recalibrations >= ctx.recalibration.max_per_offer {
        return Err(BlockReason::RecalibrationExhausted {
            encounter: encounter_id.to_string(),
            limit: ctx.recalibration.max_per_offer,
        });
    }
    if ctx.progress.features().free_recalibrations > 0 {
        return Ok(());
    }
    ensure_affordable(ctx.progress, ctx.recalibration.paid_cost)
}

fn pending_record<'a>(
    encounter_id: &str,
    ctx: &PreflightContext<'a>,
) -> Result<&'a crate::encounter::EncounterRecord, BlockReason> {
    ctx.progress
        .pending_encounter(encounter_id)
        .ok_or_else(|| BlockReason::UnknownEncounter {
            encounter: encounter_id.to_string(),
        })
}

fn ensure_affordable(progress: &ProgressState, cost: i64) -> Result<(), BlockReason> {
    if progress.ledger().can_afford(cost) {
        Ok(())
    } else {
        Err(BlockReason::InsufficientCurrency {
            required: cost,
            available: progress.ledger().balance,
        })
    }
}
