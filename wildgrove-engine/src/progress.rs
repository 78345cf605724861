//! Player progress aggregate: collection, pity, pending offers, currency.
//!
//! `ProgressState` is owned by the engine and mutated only through the
//! Finalizer. Readers borrow it; there is no ambient mutable access.

use crate::companions::{CompanionCatalog, CompanionId};
use crate::encounter::{EncounterId, EncounterRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A companion's permanent collection entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CollectionEntry {
    /// Rarer variant flag, set by a successful merge-altar promotion.
    #[serde(default)]
    pub exceptional: bool,
    /// Pity counter frozen at the moment the bond succeeded. Display only;
    /// further accrual stops here.
    #[serde(default)]
    pub attempts_before_bond: u32,
    /// Host-supplied tick at which the bond landed.
    #[serde(default)]
    pub bonded_at: u64,
}

/// Spendable currency plus lifetime counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CurrencyLedger {
    #[serde(default)]
    pub balance: i64,
    #[serde(default)]
    pub lifetime_earned: i64,
    #[serde(default)]
    pub lifetime_spent: i64,
}

impl CurrencyLedger {
    /// Whether the balance covers `cost`.
    #[must_use]
    pub const fn can_afford(&self, cost: i64) -> bool {
        self.balance >= cost
    }

    pub(crate) fn credit(&mut self, amount: i64) {
        self.balance = self.balance.saturating_add(amount);
        self.lifetime_earned = self.lifetime_earned.saturating_add(amount);
    }

    pub(crate) fn debit(&mut self, amount: i64) {
        self.balance = self.balance.saturating_sub(amount);
        self.lifetime_spent = self.lifetime_spent.saturating_add(amount);
    }
}

/// Feature gates resolved by the host's unlock systems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FeatureFlags {
    /// Merge-altar promotions available.
    #[serde(default)]
    pub merge_altar: bool,
    /// Risky (free, backfire-prone) recalibration available.
    #[serde(default)]
    pub risky_recalibration: bool,
    /// One-shot tokens that waive the paid recalibration fee.
    #[serde(default)]
    pub free_recalibrations: u32,
}

/// Per-player mutable progress record.
///
/// Invariant: a companion id is either collected or pity-tracked, never both;
/// a pending encounter references an uncollected companion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProgressState {
    #[serde(default)]
    collection: HashMap<CompanionId, CollectionEntry>,
    #[serde(default)]
    pity: HashMap<CompanionId, u32>,
    #[serde(default)]
    pending: HashMap<EncounterId, EncounterRecord>,
    #[serde(default)]
    ledger: CurrencyLedger,
    #[serde(default)]
    features: FeatureFlags,
    #[serde(default)]
    attempts_resolved: u32,
    #[serde(default)]
    encounters_offered: u32,
}

impl ProgressState {
    /// Fresh progress with nothing collected.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_collected(&self, id: &str) -> bool {
        self.collection.contains_key(id)
    }

    #[must_use]
    pub fn collection_entry(&self, id: &str) -> Option<&CollectionEntry> {
        self.collection.get(id)
    }

    #[must_use]
    pub fn collected_count(&self) -> usize {
        self.collection.len()
    }

    /// Active pity counter for an uncollected companion (0 when untracked).
    #[must_use]
    pub fn pity_for(&self, id: &str) -> u32 {
        self.pity.get(id).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn pending_encounter(&self, id: &str) -> Option<&EncounterRecord> {
        self.pending.get(id)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether a companion already has an open offer waiting.
    #[must_use]
    pub fn has_pending_offer_for(&self, companion_id: &str) -> bool {
        self.pending
            .values()
            .any(|record| record.companion_id == companion_id)
    }

    #[must_use]
    pub const fn ledger(&self) -> &CurrencyLedger {
        &self.ledger
    }

    #[must_use]
    pub const fn features(&self) -> &FeatureFlags {
        &self.features
    }

    /// Host-side unlock systems flip gates through this single entry point.
    pub fn set_features(&mut self, features: FeatureFlags) {
        self.features = features;
    }

    #[must_use]
    pub const fn attempts_resolved(&self) -> u32 {
        self.attempts_resolved
    }

    #[must_use]
    pub const fn encounters_offered(&self) -> u32 {
        self.encounters_offered
    }

    /// True when every authored companion has been collected.
    #[must_use]
    pub fn collection_complete(&self, catalog: &CompanionCatalog) -> bool {
        !catalog.is_empty()
            && catalog
                .companions
                .iter()
                .all(|companion| self.is_collected(&companion.id))
    }

    // ---- Finalizer-only mutators --------------------------------------

    pub(crate) fn record_bond_success(&mut self, companion_id: &str, bonded_at: u64) {
        let frozen_pity = self.pity.remove(companion_id).unwrap_or(0);
        let previous = self.collection.insert(
            companion_id.to_string(),
            CollectionEntry {
                exceptional: false,
                attempts_before_bond: frozen_pity,
                bonded_at,
            },
        );
        assert!(
            previous.is_none(),
            "companion {companion_id} collected twice; collection and pending sets diverged"
        );
    }

    pub(crate) fn record_bond_failure(&mut self, companion_id: &str) {
        let counter = self.pity.entry(companion_id.to_string()).or_insert(0);
        *counter = counter.saturating_add(1);
    }

    pub(crate) fn insert_pending(&mut self, record: EncounterRecord) {
        self.encounters_offered = self.encounters_offered.saturating_add(1);
        self.pending.insert(record.id.clone(), record);
    }

    /// Remove and return a pending record.
    ///
    /// # Panics
    ///
    /// Panics when the record is gone: consuming an encounter twice means the
    /// sequencing contract was broken upstream.
    pub(crate) fn consume_pending(&mut self, id: &str) -> EncounterRecord {
        self.pending
            .remove(id)
            .unwrap_or_else(|| panic!("encounter {id} consumed twice or never offered"))
    }

    pub(crate) fn update_pending(&mut self, id: &str, probability: f64, count_recalibration: bool) {
        if let Some(record) = self.pending.get_mut(id) {
            record.probability = probability;
            if count_recalibration {
                record.recalibrations = record.recalibrations.saturating_add(1);
            }
        }
    }

    pub(crate) fn mark_exceptional(&mut self, companion_id: &str) {
        if let Some(entry) = self.collection.get_mut(companion_id) {
            entry.exceptional = true;
        }
    }

    pub(crate) fn ledger_mut(&mut self) -> &mut CurrencyLedger {
        &mut self.ledger
    }

    pub(crate) fn spend_free_recalibration(&mut self) {
        self.features.free_recalibrations = self.features.free_recalibrations.saturating_sub(1);
    }

    pub(crate) fn note_attempt_resolved(&mut self) {
        self.attempts_resolved = self.attempts_resolved.saturating_add(1);
    }

    /// Full wipe; the only deletion path for progress.
    pub(crate) fn wipe(&mut self) {
        *self = Self {
            features: self.features.clone(),
            ..Self::default()
        };
    }
}
