//! Wildgrove Lottery Engine
//!
//! Platform-agnostic core for Wildgrove's canonical-roll lotteries: bond
//! encounters, session rewards, recalibrations, and merge promotions. This
//! crate owns the math and the sequencing contract; rendering, persistence
//! I/O, and blocking mechanics live with the host application.

pub mod companions;
pub mod constants;
pub mod encounter;
pub mod events;
pub mod finalize;
pub mod numbers;
pub mod preflight;
pub mod probability;
pub mod progress;
pub mod recalc;
pub mod resolve;
pub mod rewards;
pub mod roll;
pub mod sequence;

// Re-export commonly used types
pub use companions::{Companion, CompanionCatalog, CompanionId, Rarity};
pub use encounter::{EncounterConfig, EncounterId, EncounterRecord, OfferPick, OfferRequest};
pub use events::{
    LotteryDecisionTrace, NullObserver, ProgressObserver, RollValue, WeightFactor,
    WeightedCandidate,
};
pub use finalize::{OperationKind, ResultEnvelope};
pub use preflight::{BlockReason, CostSchedule, PreflightContext};
pub use probability::{
    ConfigError, PityConfig, PityStep, RewardBandConfig, bond_probability,
    effective_bond_probability, merge_probability, pity_bonus, power_ratio, reward_tier_center,
    window_weights,
};
pub use progress::{CollectionEntry, CurrencyLedger, FeatureFlags, ProgressState};
pub use recalc::RecalibrationConfig;
pub use resolve::{resolve_success, resolve_tier};
pub use rewards::RewardConfig;
pub use roll::{CanonicalRoll, CountingRng, RollBundle, RollEnvelope, RollOverrides, RollPurpose};
pub use sequence::{
    AnimationCue, AnimationHost, AttemptController, AttemptError, AttemptPhase, AttemptRequest,
    AttemptTicket, LotteryPlan,
};

/// Trait for abstracting content loading operations.
/// Platform-specific implementations should provide this.
pub trait CatalogLoader {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the authored companion roster from the platform-specific source.
    ///
    /// # Errors
    ///
    /// Returns an error if the roster cannot be loaded.
    fn load_catalog(&self) -> Result<CompanionCatalog, Self::Error>;

    /// Load configuration data for a specific system.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or parsed.
    fn load_config<T>(&self, config_name: &str) -> Result<T, Self::Error>
    where
        T: serde::de::DeserializeOwned;
}

/// Trait for abstracting progress persistence.
/// Platform-specific implementations should provide this.
pub trait ProgressStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Persist the full progress state. The Finalizer treats failure as an
    /// attempt-fatal fault with no partial write.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be persisted.
    fn persist(&self, state: &ProgressState) -> Result<(), Self::Error>;

    /// Load the previously persisted progress state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded.
    fn load(&self) -> Result<Option<ProgressState>, Self::Error>;

    /// Remove persisted progress.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be removed.
    fn clear(&self) -> Result<(), Self::Error>;
}

/// Aggregated engine tuning.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub pity: PityConfig,
    #[serde(default)]
    pub encounter: EncounterConfig,
    #[serde(default)]
    pub recalibration: RecalibrationConfig,
    #[serde(default)]
    pub rewards: RewardConfig,
    #[serde(default)]
    pub costs: CostSchedule,
}

impl EngineConfig {
    /// Validate every subsystem's tuning.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` any subsystem reports.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pity.validate()?;
        self.encounter.validate()?;
        self.recalibration.validate()?;
        self.rewards.validate()?;
        self.costs.validate()?;
        Ok(())
    }
}

/// Main engine facade binding content loading and progress persistence.
pub struct LotteryEngine<L, S>
where
    L: CatalogLoader,
    S: ProgressStore,
{
    loader: L,
    store: S,
    cfg: EngineConfig,
}

impl<L, S> LotteryEngine<L, S>
where
    L: CatalogLoader,
    S: ProgressStore,
{
    /// Create an engine with default tuning.
    pub fn new(loader: L, store: S) -> Self {
        Self::with_config(loader, store, EngineConfig::default())
    }

    /// Create an engine with explicit tuning.
    ///
    /// # Panics
    ///
    /// Panics when the supplied configuration violates validation rules.
    pub fn with_config(loader: L, store: S, cfg: EngineConfig) -> Self {
        cfg.validate().unwrap_or_else(|err| {
            panic!("invalid engine config: {err}");
        });
        Self { loader, store, cfg }
    }

    /// Start a fresh session with the given seed.
    ///
    /// # Errors
    ///
    /// Returns an error if the companion roster cannot be loaded.
    pub fn create_session(&self, seed: u64) -> Result<LotterySession, L::Error> {
        let catalog = self.loader.load_catalog()?;
        Ok(LotterySession::new(catalog, self.cfg.clone(), seed))
    }

    /// Resume a session from persisted progress, if any exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the roster or the stored progress cannot be
    /// loaded.
    pub fn load_session(&self, seed: u64) -> Result<Option<LotterySession>, anyhow::Error>
    where
        L::Error: Into<anyhow::Error>,
        S::Error: Into<anyhow::Error>,
    {
        let Some(state) = self.store.load().map_err(Into::into)? else {
            return Ok(None);
        };
        let catalog = self.loader.load_catalog().map_err(Into::into)?;
        Ok(Some(LotterySession::from_state(
            catalog,
            self.cfg.clone(),
            state,
            seed,
        )))
    }

    /// Persist a session's progress outside the finalization path (e.g. on
    /// app shutdown).
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be persisted.
    pub fn save_progress(&self, state: &ProgressState) -> Result<(), S::Error> {
        self.store.persist(state)
    }

    /// Storage capability, for threading into session operations.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.cfg
    }
}

/// High-level session binding a controller, progress state, and roll streams.
#[derive(Debug, Clone)]
pub struct LotterySession {
    catalog: CompanionCatalog,
    cfg: EngineConfig,
    state: ProgressState,
    controller: AttemptController,
    rolls: RollBundle,
    seed: u64,
}

impl LotterySession {
    /// Fresh session with empty progress.
    #[must_use]
    pub fn new(catalog: CompanionCatalog, cfg: EngineConfig, seed: u64) -> Self {
        Self::from_state(catalog, cfg, ProgressState::new(), seed)
    }

    /// Session over existing progress.
    #[must_use]
    pub fn from_state(
        catalog: CompanionCatalog,
        cfg: EngineConfig,
        state: ProgressState,
        seed: u64,
    ) -> Self {
        Self {
            catalog,
            cfg,
            state,
            controller: AttemptController::new(),
            rolls: RollBundle::from_user_seed(seed),
            seed,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &ProgressState {
        &self.state
    }

    #[must_use]
    pub const fn catalog(&self) -> &CompanionCatalog {
        &self.catalog
    }

    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn phase(&self) -> AttemptPhase {
        self.controller.phase()
    }

    /// Deterministically reseed every roll stream.
    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.rolls = RollBundle::from_user_seed(seed);
    }

    /// Sync feature gates from the host's unlock systems.
    pub fn set_features(&mut self, features: FeatureFlags) {
        self.state.set_features(features);
    }

    /// Draw the next encounter offer, persist it, and announce it.
    ///
    /// `Ok(None)` means every companion is collected or already offered — a
    /// terminal state, not an error.
    ///
    /// # Errors
    ///
    /// Returns `Blocked(AttemptInFlight)` while an attempt is running and
    /// `PersistFailed` when storage rejects the new offer.
    pub fn offer_encounter<S: ProgressStore, O: ProgressObserver>(
        &mut self,
        player_power: u32,
        now: u64,
        store: &S,
        observer: &mut O,
    ) -> Result<Option<EncounterRecord>, AttemptError> {
        self.ensure_idle()?;
        let request = OfferRequest {
            catalog: &self.catalog,
            progress: &self.state,
            player_power,
            now,
            cfg: &self.cfg.encounter,
            pity: &self.cfg.pity,
        };
        let Some(pick) = encounter::offer_encounter(&request, &mut *self.rolls.encounter()) else {
            return Ok(None);
        };
        finalize::apply_offer(&mut self.state, pick, store, observer).map(Some)
    }

    /// Stage an attempt: preflight, odds snapshot, confirm/decline handle.
    ///
    /// # Errors
    ///
    /// Returns an envelope with `operation_success = false` and the blocking
    /// reason when preconditions fail; no roll is generated and no animation
    /// starts in that case.
    pub fn begin(
        &mut self,
        request: AttemptRequest,
        overrides: RollOverrides,
    ) -> Result<AttemptTicket, Box<ResultEnvelope>> {
        let operation = request.operation();
        let ctx = PreflightContext {
            progress: &self.state,
            catalog: &self.catalog,
            costs: &self.cfg.costs,
            recalibration: &self.cfg.recalibration,
        };
        self.controller
            .begin(request, &ctx, &self.cfg, overrides)
            .map_err(|reason| Box::new(ResultEnvelope::blocked(operation, reason)))
    }

    /// Generate the canonical rolls and hand the attempt to the animator.
    ///
    /// # Errors
    ///
    /// Returns `NoAttempt`/`PhaseMismatch` on protocol misuse.
    pub fn confirm<A: AnimationHost>(&mut self, animator: &mut A) -> Result<AnimationCue, AttemptError> {
        let purpose = self
            .controller
            .primary_purpose()
            .ok_or(AttemptError::NoAttempt)?;
        let mut stream = self.rolls.stream_for(purpose);
        self.controller.confirm(&mut *stream, animator)
    }

    /// Decline the staged attempt before any animation starts.
    ///
    /// # Errors
    ///
    /// Returns `PhaseMismatch` once animation has begun.
    pub fn decline(&mut self) -> Result<(), AttemptError> {
        self.controller.decline()
    }

    /// Finalize after the animation host signals completion.
    ///
    /// # Errors
    ///
    /// Returns `NoAttempt`/`PhaseMismatch` on protocol misuse and
    /// `PersistFailed` when storage rejects the staged state.
    pub fn animation_complete<S: ProgressStore, O: ProgressObserver>(
        &mut self,
        now: u64,
        store: &S,
        observer: &mut O,
    ) -> Result<ResultEnvelope, AttemptError> {
        self.controller.animation_complete(
            &mut self.state,
            &self.catalog,
            &self.cfg,
            now,
            store,
            observer,
        )
    }

    /// Host hook for a stuck animation; finalizes with the committed rolls.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::animation_complete`].
    pub fn force_complete<S: ProgressStore, O: ProgressObserver>(
        &mut self,
        now: u64,
        store: &S,
        observer: &mut O,
    ) -> Result<ResultEnvelope, AttemptError> {
        self.controller.force_complete(
            &mut self.state,
            &self.catalog,
            &self.cfg,
            now,
            store,
            observer,
        )
    }

    /// Paid recalibration of a pending offer (deterministic, roll-free).
    ///
    /// # Errors
    ///
    /// Returns `Blocked(AttemptInFlight)` while an attempt is running,
    /// `CatalogDrift` for a saved offer whose companion left the roster, and
    /// `PersistFailed` when storage rejects the staged state.
    pub fn recalibrate_paid<S: ProgressStore, O: ProgressObserver>(
        &mut self,
        encounter_id: &EncounterId,
        player_power: u32,
        store: &S,
        observer: &mut O,
    ) -> Result<ResultEnvelope, AttemptError> {
        self.ensure_idle()?;
        finalize::recalibrate_paid(
            &mut self.state,
            &self.catalog,
            encounter_id,
            player_power,
            &self.cfg,
            store,
            observer,
        )
    }

    /// Credit currency earned outside the lottery.
    ///
    /// # Errors
    ///
    /// Returns `Blocked(AttemptInFlight)` while an attempt is running and
    /// `PersistFailed` when storage rejects the staged state.
    pub fn grant_currency<S: ProgressStore, O: ProgressObserver>(
        &mut self,
        amount: i64,
        store: &S,
        observer: &mut O,
    ) -> Result<ResultEnvelope, AttemptError> {
        self.ensure_idle()?;
        finalize::grant_currency(&mut self.state, amount, store, observer)
    }

    /// Explicit player reset; the only deletion path for progress.
    ///
    /// # Errors
    ///
    /// Returns `Blocked(AttemptInFlight)` while an attempt is running and
    /// `PersistFailed` when storage rejects the staged state.
    pub fn reset_progress<S: ProgressStore, O: ProgressObserver>(
        &mut self,
        store: &S,
        observer: &mut O,
    ) -> Result<ResultEnvelope, AttemptError> {
        self.ensure_idle()?;
        finalize::reset_progress(&mut self.state, store, observer)
    }

    /// Advisory odds preview for an uncollected companion at current
    /// strength. Recomputed on demand and never bound into an attempt; only
    /// canonical rolls inside an envelope are authoritative.
    #[must_use]
    pub fn preview_bond_probability(&self, companion_id: &str, player_power: u32) -> Option<f64> {
        let companion = self.catalog.get(companion_id)?;
        Some(effective_bond_probability(
            bond_probability(player_power, companion.power),
            self.state.pity_for(companion_id),
            &self.cfg.pity,
        ))
    }

    /// Consume the session, returning the underlying progress state.
    #[must_use]
    pub fn into_state(self) -> ProgressState {
        self.state
    }

    fn ensure_idle(&self) -> Result<(), AttemptError> {
        if self.controller.is_in_flight() {
            return Err(AttemptError::Blocked(BlockReason::AttemptInFlight));
        }
        Ok(())
    }
}
