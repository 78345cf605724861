//! Attempt finalization: applying resolved outcomes to persistent progress.
//!
//! Mutations are staged on a scratch copy of the progress state, persisted
//! through the storage capability, and only then committed and announced.
//! A persist failure leaves the live state untouched and emits nothing.

use crate::ProgressStore;
use crate::companions::{CompanionCatalog, CompanionId, Rarity};
use crate::encounter::{EncounterId, EncounterRecord, OfferPick};
use crate::events::{LotteryDecisionTrace, ProgressObserver};
use crate::preflight::{self, BlockReason, PreflightContext};
use crate::progress::ProgressState;
use crate::recalc::{paid_snapshot, risky_adjusted};
use crate::resolve::{resolve_success, resolve_tier, success_trace, tier_trace};
use crate::roll::{RollEnvelope, RollPurpose};
use crate::sequence::{AttemptError, AttemptRequest, LotteryPlan};
use serde::{Deserialize, Serialize};

/// What kind of operation an envelope describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Bond,
    RecalibratePaid,
    RecalibrateRisky,
    SessionReward,
    Merge,
    CurrencyGrant,
    Reset,
}

/// Structured outcome of one operation.
///
/// `operation_success` says whether the request itself was valid;
/// `outcome_success` says how the lottery landed (`None` when no lottery
/// ran). The two are never collapsed into one flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub operation: OperationKind,
    pub operation_success: bool,
    pub outcome_success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub companion: Option<CompanionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Rarity>,
    /// Net currency applied by this operation (negative for fees).
    #[serde(default)]
    pub currency_delta: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<BlockReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<LotteryDecisionTrace>,
}

impl ResultEnvelope {
    /// Envelope for a request rejected at preflight: nothing rolled, nothing
    /// animated, nothing persisted.
    #[must_use]
    pub fn blocked(operation: OperationKind, reason: BlockReason) -> Self {
        Self {
            operation,
            operation_success: false,
            outcome_success: None,
            companion: None,
            tier: None,
            currency_delta: 0,
            block_reason: Some(reason),
            trace: None,
        }
    }

    fn completed(operation: OperationKind) -> Self {
        Self {
            operation,
            operation_success: true,
            outcome_success: None,
            companion: None,
            tier: None,
            currency_delta: 0,
            block_reason: None,
            trace: None,
        }
    }
}

/// Persist a staged state and commit it into the live one.
///
/// The live state is only overwritten after the storage capability reports
/// success, which is what makes every finalization all-or-nothing.
fn persist_and_commit<S: ProgressStore>(
    live: &mut ProgressState,
    staged: ProgressState,
    store: &S,
) -> Result<(), AttemptError> {
    store
        .persist(&staged)
        .map_err(|err| AttemptError::PersistFailed {
            message: err.to_string(),
        })?;
    *live = staged;
    Ok(())
}

/// Finalize a confirmed attempt with its canonical rolls.
///
/// # Errors
///
/// Returns `AttemptError::PersistFailed` when the storage capability rejects
/// the staged state; the live state is untouched in that case.
///
/// # Panics
///
/// Panics when the staged mutation references an encounter record that is no
/// longer pending — the sequencing contract guarantees it, so its absence is
/// engine corruption, not a recoverable condition.
pub(crate) fn finalize_attempt<S: ProgressStore, O: ProgressObserver>(
    state: &mut ProgressState,
    catalog: &CompanionCatalog,
    request: &AttemptRequest,
    plan: &LotteryPlan,
    rolls: &RollEnvelope,
    cfg: &crate::EngineConfig,
    now: u64,
    store: &S,
    observer: &mut O,
) -> Result<ResultEnvelope, AttemptError> {
    let mut staged = state.clone();
    let mut changed: Option<CompanionId> = None;

    let envelope = match (request, plan) {
        (
            AttemptRequest::Bond { encounter_id },
            LotteryPlan::Binary { probability, .. },
        ) => {
            let roll = rolls.expect(RollPurpose::BondSuccess);
            let success = resolve_success(roll, *probability);
            let record = staged.consume_pending(encounter_id);
            if success {
                staged.record_bond_success(&record.companion_id, now);
            } else {
                staged.record_bond_failure(&record.companion_id);
            }
            staged.note_attempt_resolved();
            changed = Some(record.companion_id.clone());

            let mut envelope = ResultEnvelope::completed(OperationKind::Bond);
            envelope.outcome_success = Some(success);
            envelope.companion = Some(record.companion_id);
            envelope.trace = Some(success_trace("wildgrove.bond", roll, *probability, success));
            envelope
        }
        (
            AttemptRequest::RecalibrateRisky { encounter_id },
            LotteryPlan::Binary { probability, .. },
        ) => {
            let roll = rolls.expect(RollPurpose::RecalcSuccess);
            let success = resolve_success(roll, *probability);
            let record = staged
                .pending_encounter(encounter_id)
                .unwrap_or_else(|| {
                    panic!("encounter {encounter_id} vanished between preflight and finalize")
                })
                .clone();
            let adjusted = risky_adjusted(&record, success, &cfg.recalibration);
            staged.update_pending(encounter_id, adjusted, true);
            staged.note_attempt_resolved();
            changed = Some(record.companion_id.clone());

            let mut envelope = ResultEnvelope::completed(OperationKind::RecalibrateRisky);
            envelope.outcome_success = Some(success);
            envelope.companion = Some(record.companion_id);
            envelope.trace = Some(success_trace(
                "wildgrove.recalibrate",
                roll,
                *probability,
                success,
            ));
            envelope
        }
        (
            AttemptRequest::SessionReward { .. },
            LotteryPlan::Tiered { weights, .. },
        ) => {
            let roll = rolls.expect(RollPurpose::RewardTier);
            let tier = resolve_tier(roll, weights);
            let payout = cfg.rewards.payout_for(tier);
            staged.ledger_mut().credit(payout);
            staged.note_attempt_resolved();

            let mut envelope = ResultEnvelope::completed(OperationKind::SessionReward);
            envelope.outcome_success = Some(true);
            envelope.tier = Some(tier);
            envelope.currency_delta = payout;
            envelope.trace = Some(tier_trace("wildgrove.reward", roll, weights, tier));
            envelope
        }
        (
            AttemptRequest::Merge { companion_id },
            LotteryPlan::Binary { probability, .. },
        ) => {
            let roll = rolls.expect(RollPurpose::MergeSuccess);
            let success = resolve_success(roll, *probability);
            let rarity = catalog
                .get(companion_id)
                .unwrap_or_else(|| {
                    panic!("companion {companion_id} vanished between preflight and finalize")
                })
                .rarity;
            let fee = cfg.costs.merge_fee(rarity);
            staged.ledger_mut().debit(fee);
            if success {
                staged.mark_exceptional(companion_id);
            }
            staged.note_attempt_resolved();
            changed = Some(companion_id.clone());

            let mut envelope = ResultEnvelope::completed(OperationKind::Merge);
            envelope.outcome_success = Some(success);
            envelope.companion = Some(companion_id.clone());
            envelope.currency_delta = -fee;
            envelope.trace = Some(success_trace("wildgrove.merge", roll, *probability, success));
            envelope
        }
        (request, plan) => {
            panic!("attempt plan {plan:?} does not match request {request:?}")
        }
    };

    persist_and_commit(state, staged, store)?;
    if let Some(companion) = changed.as_ref() {
        observer.progress_changed(companion);
    }
    observer.attempt_finalized(&envelope);
    Ok(envelope)
}

/// Persist and announce a freshly selected offer.
///
/// # Errors
///
/// Returns `AttemptError::PersistFailed` when storage rejects the staged
/// state.
pub(crate) fn apply_offer<S: ProgressStore, O: ProgressObserver>(
    state: &mut ProgressState,
    pick: OfferPick,
    store: &S,
    observer: &mut O,
) -> Result<EncounterRecord, AttemptError> {
    let mut staged = state.clone();
    staged.insert_pending(pick.record.clone());
    persist_and_commit(state, staged, store)?;
    observer.progress_changed(&pick.record.companion_id);
    Ok(pick.record)
}

/// Paid recalibration: a deterministic, roll-free re-snapshot.
///
/// Preconditions are rechecked here because this operation never passes
/// through the attempt controller; a blocked request yields an envelope with
/// `operation_success = false` and no mutation.
///
/// # Errors
///
/// Returns `AttemptError::PersistFailed` when storage rejects the staged
/// state.
pub(crate) fn recalibrate_paid<S: ProgressStore, O: ProgressObserver>(
    state: &mut ProgressState,
    catalog: &CompanionCatalog,
    encounter_id: &EncounterId,
    player_power: u32,
    cfg: &crate::EngineConfig,
    store: &S,
    observer: &mut O,
) -> Result<ResultEnvelope, AttemptError> {
    let context = PreflightContext {
        progress: state,
        catalog,
        costs: &cfg.costs,
        recalibration: &cfg.recalibration,
    };
    if let Err(reason) = preflight::validate_paid_recalibration(encounter_id, &context) {
        return Ok(ResultEnvelope::blocked(
            OperationKind::RecalibratePaid,
            reason,
        ));
    }

    let record = state
        .pending_encounter(encounter_id)
        .expect("validated above")
        .clone();
    let companion =
        catalog
            .get(&record.companion_id)
            .ok_or_else(|| AttemptError::CatalogDrift {
                companion: record.companion_id.clone(),
            })?;

    let mut staged = state.clone();
    let used_token = staged.features().free_recalibrations > 0;
    let fee = if used_token {
        staged.spend_free_recalibration();
        0
    } else {
        staged.ledger_mut().debit(cfg.recalibration.paid_cost);
        cfg.recalibration.paid_cost
    };
    let snapshot = paid_snapshot(
        companion,
        player_power,
        staged.pity_for(&record.companion_id),
        &cfg.pity,
    );
    staged.update_pending(encounter_id, snapshot, true);

    persist_and_commit(state, staged, store)?;
    observer.progress_changed(&record.companion_id);

    let mut envelope = ResultEnvelope::completed(OperationKind::RecalibratePaid);
    envelope.companion = Some(record.companion_id);
    envelope.currency_delta = -fee;
    observer.attempt_finalized(&envelope);
    Ok(envelope)
}

/// Credit currency earned outside the lottery (habit completions, streaks).
///
/// # Errors
///
/// Returns `AttemptError::PersistFailed` when storage rejects the staged
/// state.
pub(crate) fn grant_currency<S: ProgressStore, O: ProgressObserver>(
    state: &mut ProgressState,
    amount: i64,
    store: &S,
    observer: &mut O,
) -> Result<ResultEnvelope, AttemptError> {
    let mut staged = state.clone();
    staged.ledger_mut().credit(amount.max(0));
    persist_and_commit(state, staged, store)?;

    let mut envelope = ResultEnvelope::completed(OperationKind::CurrencyGrant);
    envelope.currency_delta = amount.max(0);
    observer.attempt_finalized(&envelope);
    Ok(envelope)
}

/// Explicit player reset: the only deletion path for progress.
///
/// # Errors
///
/// Returns `AttemptError::PersistFailed` when storage rejects the staged
/// state.
pub(crate) fn reset_progress<S: ProgressStore, O: ProgressObserver>(
    state: &mut ProgressState,
    store: &S,
    observer: &mut O,
) -> Result<ResultEnvelope, AttemptError> {
    let mut staged = state.clone();
    staged.wipe();
    persist_and_commit(state, staged, store)?;

    let envelope = ResultEnvelope::completed(OperationKind::Reset);
    observer.attempt_finalized(&envelope);
    Ok(envelope)
}
