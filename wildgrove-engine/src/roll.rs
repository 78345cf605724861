//! Canonical roll generation and deterministic per-domain RNG streams.
//!
//! Every lottery outcome in the engine is decided by draws produced here.
//! A draw is captured in a [`RollEnvelope`] before anything is shown to the
//! player; the same envelope must reach resolution untouched.

use crate::numbers::sample_to_unit;
use hmac::{Hmac, Mac};
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use smallvec::SmallVec;
use std::cell::{RefCell, RefMut};

/// Largest value a canonical roll may carry while staying inside [0, 1).
const ROLL_MAX: f64 = 1.0 - f64::EPSILON;

/// What a single canonical draw decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollPurpose {
    /// Binary bond success against a pending encounter.
    BondSuccess,
    /// Stage-one draw of a risky recalibration.
    RecalcSuccess,
    /// Tier selection for a session reward.
    RewardTier,
    /// Exceptional-promotion draw at the merge altar.
    MergeSuccess,
}

/// One purpose-tagged scalar draw in [0, 1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRoll {
    pub purpose: RollPurpose,
    pub value: f64,
    /// True when the value was supplied by the caller instead of drawn.
    pub overridden: bool,
}

/// Caller-supplied replacement draws for replay and staged flows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollOverrides {
    entries: SmallVec<[(RollPurpose, f64); 2]>,
}

impl RollOverrides {
    /// No overrides; every purpose draws fresh.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Pin the draw for one purpose. Non-finite values collapse to 0.0;
    /// everything else is clamped into [0, 1).
    #[must_use]
    pub fn with(mut self, purpose: RollPurpose, value: f64) -> Self {
        let sanitized = if value.is_finite() {
            value.clamp(0.0, ROLL_MAX)
        } else {
            0.0
        };
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|(existing, _)| *existing == purpose)
        {
            entry.1 = sanitized;
        } else {
            self.entries.push((purpose, sanitized));
        }
        self
    }

    #[must_use]
    pub fn get(&self, purpose: RollPurpose) -> Option<f64> {
        self.entries
            .iter()
            .find(|(existing, _)| *existing == purpose)
            .map(|(_, value)| *value)
    }
}

/// The full set of canonical draws backing one attempt.
///
/// Created once per attempt and discarded after resolution; regeneration is
/// forbidden once the envelope has been handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RollEnvelope {
    rolls: SmallVec<[CanonicalRoll; 2]>,
}

impl RollEnvelope {
    /// Draw (or adopt overrides for) every requested purpose. Generation
    /// itself never fails.
    #[must_use]
    pub fn generate<R: RngCore>(
        purposes: &[RollPurpose],
        overrides: &RollOverrides,
        rng: &mut R,
    ) -> Self {
        let rolls = purposes
            .iter()
            .map(|&purpose| match overrides.get(purpose) {
                Some(value) => CanonicalRoll {
                    purpose,
                    value,
                    overridden: true,
                },
                None => CanonicalRoll {
                    purpose,
                    value: draw_roll(rng),
                    overridden: false,
                },
            })
            .collect();
        Self { rolls }
    }

    #[must_use]
    pub fn get(&self, purpose: RollPurpose) -> Option<f64> {
        self.rolls
            .iter()
            .find(|roll| roll.purpose == purpose)
            .map(|roll| roll.value)
    }

    /// Fetch a draw that the attempt plan guarantees to exist.
    ///
    /// # Panics
    ///
    /// Panics when no draw with `purpose` was generated for this envelope;
    /// resolving against a roll that was never produced is a programming
    /// error, never something to paper over with a fresh draw.
    #[must_use]
    pub fn expect(&self, purpose: RollPurpose) -> f64 {
        self.get(purpose).unwrap_or_else(|| {
            panic!("no canonical roll generated for {purpose:?} in this attempt")
        })
    }

    #[must_use]
    pub fn rolls(&self) -> &[CanonicalRoll] {
        &self.rolls
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rolls.is_empty()
    }
}

/// Produce one canonical scalar in [0, 1) from a single `next_u32` draw.
#[must_use]
pub fn draw_roll<R: RngCore>(rng: &mut R) -> f64 {
    sample_to_unit(rng.next_u32())
}

/// Counting wrapper for RNG streams providing instrumentation.
#[derive(Debug, Clone)]
pub struct CountingRng<R> {
    rng: R,
    draws: u64,
}

impl CountingRng<SmallRng> {
    fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            draws: 0,
        }
    }
}

impl<R: RngCore> CountingRng<R> {
    /// Number of draw calls performed against this stream.
    #[must_use]
    pub const fn draws(&self) -> u64 {
        self.draws
    }
}

impl<R: RngCore> RngCore for CountingRng<R> {
    fn next_u32(&mut self) -> u32 {
        self.draws = self.draws.saturating_add(1);
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.draws = self.draws.saturating_add(1);
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.draws = self.draws.saturating_add(1);
        self.rng.fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.draws = self.draws.saturating_add(1);
        self.rng.try_fill_bytes(dest)
    }
}

/// Deterministic bundle of RNG streams segregated by lottery domain.
///
/// Encounter selection, bond attempts, recalibrations, rewards, and merges
/// each consume their own stream so one flow can never perturb another's
/// replay sequence.
#[derive(Debug, Clone)]
pub struct RollBundle {
    encounter: RefCell<CountingRng<SmallRng>>,
    bond: RefCell<CountingRng<SmallRng>>,
    recalc: RefCell<CountingRng<SmallRng>>,
    reward: RefCell<CountingRng<SmallRng>>,
    merge: RefCell<CountingRng<SmallRng>>,
}

impl RollBundle {
    /// Construct the bundle from a user-visible seed.
    #[must_use]
    pub fn from_user_seed(seed: u64) -> Self {
        Self {
            encounter: RefCell::new(CountingRng::new(derive_stream_seed(seed, b"encounter"))),
            bond: RefCell::new(CountingRng::new(derive_stream_seed(seed, b"bond"))),
            recalc: RefCell::new(CountingRng::new(derive_stream_seed(seed, b"recalc"))),
            reward: RefCell::new(CountingRng::new(derive_stream_seed(seed, b"reward"))),
            merge: RefCell::new(CountingRng::new(derive_stream_seed(seed, b"merge"))),
        }
    }

    /// Access the encounter-selection stream.
    #[must_use]
    pub fn encounter(&self) -> RefMut<'_, CountingRng<SmallRng>> {
        self.encounter.borrow_mut()
    }

    /// Access the bond-attempt stream.
    #[must_use]
    pub fn bond(&self) -> RefMut<'_, CountingRng<SmallRng>> {
        self.bond.borrow_mut()
    }

    /// Access the recalibration stream.
    #[must_use]
    pub fn recalc(&self) -> RefMut<'_, CountingRng<SmallRng>> {
        self.recalc.borrow_mut()
    }

    /// Access the session-reward stream.
    #[must_use]
    pub fn reward(&self) -> RefMut<'_, CountingRng<SmallRng>> {
        self.reward.borrow_mut()
    }

    /// Access the merge-altar stream.
    #[must_use]
    pub fn merge(&self) -> RefMut<'_, CountingRng<SmallRng>> {
        self.merge.borrow_mut()
    }

    /// Stream feeding draws for a given purpose.
    #[must_use]
    pub fn stream_for(&self, purpose: RollPurpose) -> RefMut<'_, CountingRng<SmallRng>> {
        match purpose {
            RollPurpose::BondSuccess => self.bond(),
            RollPurpose::RecalcSuccess => self.recalc(),
            RollPurpose::RewardTier => self.reward(),
            RollPurpose::MergeSuccess => self.merge(),
        }
    }
}

fn derive_stream_seed(user_seed: u64, domain_tag: &[u8]) -> u64 {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(&user_seed.to_le_bytes()).expect("64-bit seed is valid key");
    mac.update(domain_tag);
    let digest = mac.finalize().into_bytes();
    let seed_bytes: [u8; 8] = digest[..8].try_into().expect("digest slice length");
    u64::from_le_bytes(seed_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubRng {
        value: u32,
        calls: u32,
    }

    impl StubRng {
        fn new(value: u32) -> Self {
            Self { value, calls: 0 }
        }
    }

    impl RngCore for StubRng {
        fn next_u32(&mut self) -> u32 {
            self.calls = self.calls.saturating_add(1);
            self.value
        }

        fn next_u64(&mut self) -> u64 {
            u64::from(self.next_u32())
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            let value = self.next_u32().to_le_bytes();
            for (idx, byte) in dest.iter_mut().enumerate() {
                *byte = value[idx % value.len()];
            }
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    #[test]
    fn envelope_draws_once_per_purpose() {
        let mut rng = StubRng::new(u32::MAX / 2);
        let envelope = RollEnvelope::generate(
            &[RollPurpose::BondSuccess, RollPurpose::RewardTier],
            &RollOverrides::none(),
            &mut rng,
        );
        assert_eq!(rng.calls, 2);
        assert_eq!(envelope.rolls().len(), 2);
        let bond = envelope.expect(RollPurpose::BondSuccess);
        assert!((0.0..1.0).contains(&bond));
    }

    #[test]
    fn override_suppresses_generation() {
        let mut rng = StubRng::new(0);
        let overrides = RollOverrides::none().with(RollPurpose::BondSuccess, 0.42);
        let envelope =
            RollEnvelope::generate(&[RollPurpose::BondSuccess], &overrides, &mut rng);
        assert_eq!(rng.calls, 0, "an override is the canonical roll");
        let roll = envelope.rolls()[0];
        assert!(roll.overridden);
        assert!((roll.value - 0.42).abs() < f64::EPSILON);
    }

    #[test]
    fn overrides_are_sanitized_into_unit_interval() {
        let overrides = RollOverrides::none()
            .with(RollPurpose::BondSuccess, 3.5)
            .with(RollPurpose::RewardTier, f64::NAN);
        assert!(overrides.get(RollPurpose::BondSuccess).unwrap() < 1.0);
        assert!((overrides.get(RollPurpose::RewardTier).unwrap() - 0.0).abs() < f64::EPSILON);

        let replaced = overrides.with(RollPurpose::BondSuccess, 0.25);
        assert!((replaced.get(RollPurpose::BondSuccess).unwrap() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    #[should_panic(expected = "no canonical roll generated")]
    fn expect_fails_loudly_for_missing_purpose() {
        let envelope = RollEnvelope::default();
        let _ = envelope.expect(RollPurpose::MergeSuccess);
    }

    #[test]
    fn bundle_uses_domain_separated_seeds() {
        let seed = 0xFEED_CAFE_u64;
        let bundle = RollBundle::from_user_seed(seed);

        let mut bond_rng = bundle.bond();
        let mut expected = SmallRng::seed_from_u64(derive_stream_seed(seed, b"bond"));
        assert_eq!(bond_rng.next_u32(), expected.next_u32());
        assert_eq!(bond_rng.draws(), 1);

        assert_ne!(
            derive_stream_seed(seed, b"bond"),
            derive_stream_seed(seed, b"reward"),
            "domain tags must derive distinct seeds"
        );
    }

    #[test]
    fn identical_seeds_replay_identical_draws() {
        let first = RollBundle::from_user_seed(77);
        let second = RollBundle::from_user_seed(77);
        assert_eq!(
            draw_roll(&mut *first.bond()),
            draw_roll(&mut *second.bond())
        );
        assert_eq!(
            draw_roll(&mut *first.encounter()),
            draw_roll(&mut *second.encounter())
        );
    }
}
