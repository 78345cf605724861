//! The two-phase attempt protocol: preflight, roll, animate, finalize.
//!
//! One controller serializes all attempts against one progress state. The
//! canonical rolls are generated exactly once per attempt, travel to the
//! animation host inside the cue, and are resolved unchanged at
//! finalization. No mutation and no notification can happen before the host
//! signals animation completion.

use crate::companions::{CompanionCatalog, CompanionId, Rarity};
use crate::encounter::EncounterId;
use crate::events::ProgressObserver;
use crate::finalize::{self, OperationKind, ResultEnvelope};
use crate::preflight::{self, BlockReason, PreflightContext};
use crate::probability::merge_probability;
use crate::progress::ProgressState;
use crate::rewards::reward_plan;
use crate::roll::{RollEnvelope, RollOverrides, RollPurpose};
use crate::{EngineConfig, ProgressStore};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A lottery request from the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptRequest {
    /// Open a pending encounter and roll the bond.
    Bond { encounter_id: EncounterId },
    /// Gamble a pending offer's odds: boost on success, backfire on failure.
    RecalibrateRisky { encounter_id: EncounterId },
    /// Roll the reward tier for a finished focus session.
    SessionReward { magnitude: u32 },
    /// Roll an exceptional promotion at the merge altar.
    Merge { companion_id: CompanionId },
}

impl AttemptRequest {
    /// Canonical draws this request consumes.
    #[must_use]
    pub(crate) const fn purposes(&self) -> &'static [RollPurpose] {
        match self {
            Self::Bond { .. } => &[RollPurpose::BondSuccess],
            Self::RecalibrateRisky { .. } => &[RollPurpose::RecalcSuccess],
            Self::SessionReward { .. } => &[RollPurpose::RewardTier],
            Self::Merge { .. } => &[RollPurpose::MergeSuccess],
        }
    }

    #[must_use]
    pub(crate) const fn operation(&self) -> OperationKind {
        match self {
            Self::Bond { .. } => OperationKind::Bond,
            Self::RecalibrateRisky { .. } => OperationKind::RecalibrateRisky,
            Self::SessionReward { .. } => OperationKind::SessionReward,
            Self::Merge { .. } => OperationKind::Merge,
        }
    }
}

/// Where an attempt stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPhase {
    Idle,
    PreflightChecked,
    RollGenerated,
    Animating,
    Finalized,
    Notified,
    Declined,
    Failed,
}

/// Errors raised by the attempt protocol.
#[derive(Debug, Error, PartialEq)]
pub enum AttemptError {
    #[error("request blocked: {0}")]
    Blocked(#[from] BlockReason),
    #[error("no attempt is in flight")]
    NoAttempt,
    #[error("attempt {id} is in phase {actual:?}; expected {expected:?}")]
    PhaseMismatch {
        id: u64,
        expected: AttemptPhase,
        actual: AttemptPhase,
    },
    #[error("persisting progress failed: {message}")]
    PersistFailed { message: String },
    #[error("saved offer references companion {companion} missing from the catalog")]
    CatalogDrift { companion: CompanionId },
}

/// What the outcome resolver will be fed, fixed at preflight time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LotteryPlan {
    /// Single success/fail draw against a probability snapshot.
    Binary {
        purpose: RollPurpose,
        probability: f64,
    },
    /// Single tier draw against a folded rarity window.
    Tiered {
        purpose: RollPurpose,
        weights: [u32; 5],
        center: Rarity,
    },
}

/// Everything the presentation layer needs to play one attempt.
///
/// The rolls inside the cue ARE the attempt's canonical draws; the host must
/// land its visuals on `resolve(roll, plan)` and then signal completion.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationCue {
    pub attempt_id: u64,
    pub rolls: RollEnvelope,
    pub plan: LotteryPlan,
}

/// Presentation capability. `start_animation` receives the cue; the host
/// signals completion by calling back into
/// [`AttemptController::animation_complete`] exactly once.
pub trait AnimationHost {
    fn start_animation(&mut self, cue: &AnimationCue);
}

/// Handle returned by `begin`, usable to show a confirm/decline dialog.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptTicket {
    pub id: u64,
    pub request: AttemptRequest,
    pub plan: LotteryPlan,
}

#[derive(Debug, Clone)]
struct InFlight {
    id: u64,
    request: AttemptRequest,
    plan: LotteryPlan,
    overrides: RollOverrides,
    rolls: Option<RollEnvelope>,
    phase: AttemptPhase,
}

/// Serializes attempts against one progress state and walks each through the
/// two-phase contract.
#[derive(Debug, Clone, Default)]
pub struct AttemptController {
    in_flight: Option<InFlight>,
    next_id: u64,
}

impl AttemptController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an attempt currently occupies the pipeline.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Phase of the in-flight attempt, `Idle` when none.
    #[must_use]
    pub fn phase(&self) -> AttemptPhase {
        self.in_flight
            .as_ref()
            .map_or(AttemptPhase::Idle, |attempt| attempt.phase)
    }

    /// First canonical purpose of the in-flight attempt.
    #[must_use]
    pub(crate) fn primary_purpose(&self) -> Option<RollPurpose> {
        self.in_flight
            .as_ref()
            .and_then(|attempt| attempt.request.purposes().first().copied())
    }

    /// Run preflight and stage an attempt. No roll is generated yet, so a
    /// decline at this point leaves no randomness consumed.
    ///
    /// # Errors
    ///
    /// Returns the blocking reason when preconditions fail or another attempt
    /// is already in flight; nothing is staged in that case.
    pub fn begin(
        &mut self,
        request: AttemptRequest,
        ctx: &PreflightContext<'_>,
        cfg: &EngineConfig,
        overrides: RollOverrides,
    ) -> Result<AttemptTicket, BlockReason> {
        if self.in_flight.is_some() {
            return Err(BlockReason::AttemptInFlight);
        }
        preflight::validate_request(&request, ctx)?;

        let plan = build_plan(&request, ctx, cfg);
        self.next_id += 1;
        let ticket = AttemptTicket {
            id: self.next_id,
            request: request.clone(),
            plan: plan.clone(),
        };
        self.in_flight = Some(InFlight {
            id: self.next_id,
            request,
            plan,
            overrides,
            rolls: None,
            phase: AttemptPhase::PreflightChecked,
        });
        Ok(ticket)
    }

    /// Generate the canonical rolls and hand the attempt to the animation
    /// host. From here the attempt runs to completion; cancellation is no
    /// longer possible because the rolls are committed to be revealed.
    ///
    /// # Errors
    ///
    /// Returns `NoAttempt`/`PhaseMismatch` on protocol misuse.
    pub fn confirm<R: RngCore, A: AnimationHost>(
        &mut self,
        rng: &mut R,
        animator: &mut A,
    ) -> Result<AnimationCue, AttemptError> {
        let attempt = self.in_flight.as_mut().ok_or(AttemptError::NoAttempt)?;
        if attempt.phase != AttemptPhase::PreflightChecked {
            return Err(AttemptError::PhaseMismatch {
                id: attempt.id,
                expected: AttemptPhase::PreflightChecked,
                actual: attempt.phase,
            });
        }

        let rolls = RollEnvelope::generate(attempt.request.purposes(), &attempt.overrides, rng);
        attempt.phase = AttemptPhase::RollGenerated;
        attempt.rolls = Some(rolls.clone());

        let cue = AnimationCue {
            attempt_id: attempt.id,
            rolls,
            plan: attempt.plan.clone(),
        };
        attempt.phase = AttemptPhase::Animating;
        animator.start_animation(&cue);
        Ok(cue)
    }

    /// Decline the staged attempt before any animation starts.
    ///
    /// # Errors
    ///
    /// Returns `NoAttempt` when nothing is staged and `PhaseMismatch` once
    /// animation has begun — a committed roll must be revealed.
    pub fn decline(&mut self) -> Result<(), AttemptError> {
        let attempt = self.in_flight.as_ref().ok_or(AttemptError::NoAttempt)?;
        if attempt.phase != AttemptPhase::PreflightChecked {
            return Err(AttemptError::PhaseMismatch {
                id: attempt.id,
                expected: AttemptPhase::PreflightChecked,
                actual: attempt.phase,
            });
        }
        self.in_flight = None;
        Ok(())
    }

    /// Finalize with the canonical rolls after the host signals completion.
    ///
    /// Persistence happens before any notification; a persist failure kills
    /// the attempt and leaves the progress state untouched.
    ///
    /// # Errors
    ///
    /// Returns `NoAttempt`/`PhaseMismatch` on protocol misuse (including a
    /// second completion signal for the same attempt) and `PersistFailed`
    /// when the storage capability rejects the staged state.
    #[allow(clippy::too_many_arguments)]
    pub fn animation_complete<S: ProgressStore, O: ProgressObserver>(
        &mut self,
        state: &mut ProgressState,
        catalog: &CompanionCatalog,
        cfg: &EngineConfig,
        now: u64,
        store: &S,
        observer: &mut O,
    ) -> Result<ResultEnvelope, AttemptError> {
        let attempt = self.in_flight.as_ref().ok_or(AttemptError::NoAttempt)?;
        if attempt.phase != AttemptPhase::Animating {
            return Err(AttemptError::PhaseMismatch {
                id: attempt.id,
                expected: AttemptPhase::Animating,
                actual: attempt.phase,
            });
        }

        let attempt = self.in_flight.take().expect("checked above");
        let rolls = attempt.rolls.expect("rolls generated at confirm");
        finalize::finalize_attempt(
            state,
            catalog,
            &attempt.request,
            &attempt.plan,
            &rolls,
            cfg,
            now,
            store,
            observer,
        )
    }

    /// Host hook for a stuck animation: immediate finalization with the
    /// already-computed rolls. Never re-rolls.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::animation_complete`].
    #[allow(clippy::too_many_arguments)]
    pub fn force_complete<S: ProgressStore, O: ProgressObserver>(
        &mut self,
        state: &mut ProgressState,
        catalog: &CompanionCatalog,
        cfg: &EngineConfig,
        now: u64,
        store: &S,
        observer: &mut O,
    ) -> Result<ResultEnvelope, AttemptError> {
        self.animation_complete(state, catalog, cfg, now, store, observer)
    }
}

fn build_plan(
    request: &AttemptRequest,
    ctx: &PreflightContext<'_>,
    cfg: &EngineConfig,
) -> LotteryPlan {
    match request {
        AttemptRequest::Bond { encounter_id } => LotteryPlan::Binary {
            purpose: RollPurpose::BondSuccess,
            probability: ctx
                .progress
                .pending_encounter(encounter_id)
                .expect("preflight validated the offer")
                .probability,
        },
        AttemptRequest::RecalibrateRisky { .. } => LotteryPlan::Binary {
            purpose: RollPurpose::RecalcSuccess,
            probability: cfg.recalibration.risky_success,
        },
        AttemptRequest::SessionReward { magnitude } => {
            let (center, weights) = reward_plan(*magnitude, &cfg.rewards);
            LotteryPlan::Tiered {
                purpose: RollPurpose::RewardTier,
                weights,
                center,
            }
        }
        AttemptRequest::Merge { companion_id } => LotteryPlan::Binary {
            purpose: RollPurpose::MergeSuccess,
            probability: merge_probability(
                ctx.catalog
                    .get(companion_id)
                    .expect("preflight validated the companion")
                    .rarity,
            ),
        },
    }
}
