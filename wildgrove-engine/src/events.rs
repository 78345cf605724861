//! Change notifications and explainability telemetry.
//!
//! Observers hear about progress mutations only after the Finalizer has
//! persisted them; nothing in this module is invoked earlier.

use crate::companions::CompanionId;
use crate::finalize::ResultEnvelope;
use serde::{Deserialize, Serialize};

/// Notification sink for post-finalization events.
///
/// Hosts implement this to refresh UI state. Both callbacks fire only after
/// the mutation they describe has been persisted.
pub trait ProgressObserver {
    /// A companion's progress entry (collection, pity, pending offer) changed.
    fn progress_changed(&mut self, companion: &CompanionId);

    /// An attempt ran to completion and its envelope was persisted.
    fn attempt_finalized(&mut self, envelope: &ResultEnvelope);
}

/// Observer that discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl ProgressObserver for NullObserver {
    fn progress_changed(&mut self, _companion: &CompanionId) {}

    fn attempt_finalized(&mut self, _envelope: &ResultEnvelope) {}
}

/// Explainability telemetry for a single lottery decision.
///
/// Populated whenever an outcome is resolved from a roll against weights or
/// a probability, so hosts can render "why did I get this" breakdowns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotteryDecisionTrace {
    /// Identifier for the decision pool (e.g., `wildgrove.bond`).
    pub pool_id: String,
    /// Random draw used for the decision.
    pub roll: RollValue,
    /// Candidate weights considered during selection.
    pub candidates: Vec<WeightedCandidate>,
    /// Identifier of the selected candidate.
    pub chosen_id: String,
}

/// Candidate weight telemetry captured during selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedCandidate {
    pub id: String,
    pub base_weight: f64,
    /// Multipliers applied in order.
    pub multipliers: Vec<WeightFactor>,
    pub final_weight: f64,
}

/// Random roll value used by a decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RollValue {
    U32(u32),
    F64(f64),
}

/// Single multiplicative weight factor used in a decision trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightFactor {
    pub label: String,
    pub value: f64,
}
