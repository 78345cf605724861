#![allow(clippy::float_cmp)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use thiserror::Error;
use wildgrove_engine::{
    AnimationCue, AnimationHost, AttemptError, AttemptRequest, BlockReason, Companion,
    CompanionCatalog, CompanionId, EngineConfig, FeatureFlags, LotterySession, NullObserver,
    ProgressObserver, ProgressState, ProgressStore, Rarity, ResultEnvelope, RollOverrides,
    RollPurpose, RollValue,
};

#[derive(Debug, Error)]
#[error("storage offline")]
struct StorageOffline;

#[derive(Default)]
struct MemoryStore {
    saves: RefCell<Vec<ProgressState>>,
    fail_next: Cell<bool>,
}

impl ProgressStore for MemoryStore {
    type Error = StorageOffline;

    fn persist(&self, state: &ProgressState) -> Result<(), Self::Error> {
        if self.fail_next.replace(false) {
            return Err(StorageOffline);
        }
        self.saves.borrow_mut().push(state.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<ProgressState>, Self::Error> {
        Ok(self.saves.borrow().last().cloned())
    }

    fn clear(&self) -> Result<(), Self::Error> {
        self.saves.borrow_mut().clear();
        Ok(())
    }
}

/// Shared event timeline so animation starts and notifications can be
/// ordered against each other in assertions.
#[derive(Debug, Clone, PartialEq)]
enum TimelineEvent {
    AnimationStarted(AnimationCue),
    ProgressChanged(CompanionId),
    AttemptFinalized(Box<ResultEnvelope>),
}

#[derive(Default, Clone)]
struct Timeline {
    events: Rc<RefCell<Vec<TimelineEvent>>>,
}

impl Timeline {
    fn animation_count(&self) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|event| matches!(event, TimelineEvent::AnimationStarted(_)))
            .count()
    }

    fn events(&self) -> Vec<TimelineEvent> {
        self.events.borrow().clone()
    }
}

impl AnimationHost for Timeline {
    fn start_animation(&mut self, cue: &AnimationCue) {
        self.events
            .borrow_mut()
            .push(TimelineEvent::AnimationStarted(cue.clone()));
    }
}

impl ProgressObserver for Timeline {
    fn progress_changed(&mut self, companion: &CompanionId) {
        self.events
            .borrow_mut()
            .push(TimelineEvent::ProgressChanged(companion.clone()));
    }

    fn attempt_finalized(&mut self, envelope: &ResultEnvelope) {
        self.events
            .borrow_mut()
            .push(TimelineEvent::AttemptFinalized(Box::new(envelope.clone())));
    }
}

fn solo_roster(id: &str, power: u32, rarity: Rarity) -> CompanionCatalog {
    CompanionCatalog::from_companions(vec![Companion {
        id: id.to_string(),
        name: format!("Companion {id}"),
        power,
        rarity,
        biome: String::from("grove"),
    }])
}

fn solo_session(id: &str, power: u32, rarity: Rarity) -> LotterySession {
    LotterySession::new(solo_roster(id, power, rarity), EngineConfig::default(), 0xABCD)
}

fn offer(session: &mut LotterySession, store: &MemoryStore, power: u32) -> String {
    session
        .offer_encounter(power, 1, store, &mut NullObserver)
        .expect("offer persists")
        .expect("roster has candidates")
        .id
}

#[test]
fn full_bond_pipeline_shares_one_canonical_roll() {
    let mut session = solo_session("moss_wisp", 50, Rarity::Common);
    let store = MemoryStore::default();
    let mut timeline = Timeline::default();

    let encounter_id = offer(&mut session, &store, 50);
    let record = session
        .state()
        .pending_encounter(&encounter_id)
        .expect("offer pending")
        .clone();

    let ticket = session
        .begin(
            AttemptRequest::Bond {
                encounter_id: encounter_id.clone(),
            },
            RollOverrides::none(),
        )
        .expect("preflight passes");
    assert_eq!(ticket.id, 1);

    let mut animator = timeline.clone();
    let cue = session
        .confirm(&mut animator)
        .expect("confirm starts animation");
    let cue_roll = cue.rolls.expect(RollPurpose::BondSuccess);
    assert_eq!(timeline.animation_count(), 1, "exactly one animation start");

    let envelope = session
        .animation_complete(9, &store, &mut timeline)
        .expect("completion finalizes");

    // The roll the animation displayed is the roll resolution used.
    let trace = envelope.trace.as_ref().expect("bond attempts carry a trace");
    assert_eq!(trace.roll, RollValue::F64(cue_roll));
    let expected_success = cue_roll < record.probability;
    assert_eq!(envelope.outcome_success, Some(expected_success));
    assert!(envelope.operation_success);

    // Notifications come strictly after the animation start, progress first.
    let events = timeline.events();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], TimelineEvent::AnimationStarted(_)));
    assert!(matches!(events[1], TimelineEvent::ProgressChanged(ref id) if id == "moss_wisp"));
    assert!(matches!(events[2], TimelineEvent::AttemptFinalized(_)));
}

#[test]
fn preflight_failure_blocks_before_any_animation() {
    let mut session = solo_session("ember_fox", 120, Rarity::Rare);
    session.set_features(FeatureFlags {
        merge_altar: true,
        ..FeatureFlags::default()
    });
    let store = MemoryStore::default();
    let timeline = Timeline::default();

    // Bond the fox first so the merge is gated only by its fee.
    let encounter_id = offer(&mut session, &store, 120);
    session
        .begin(
            AttemptRequest::Bond { encounter_id },
            RollOverrides::none().with(RollPurpose::BondSuccess, 0.0),
        )
        .expect("preflight passes");
    let mut animator = timeline.clone();
    session.confirm(&mut animator).expect("confirm");
    let mut observer = timeline.clone();
    session
        .animation_complete(2, &store, &mut observer)
        .expect("bond lands");
    assert!(session.state().is_collected("ember_fox"));

    session
        .grant_currency(10, &store, &mut NullObserver)
        .expect("grant persists");
    let saves_before = store.saves.borrow().len();
    let animations_before = timeline.animation_count();

    let blocked = session
        .begin(
            AttemptRequest::Merge {
                companion_id: String::from("ember_fox"),
            },
            RollOverrides::none(),
        )
        .expect_err("merge fee is unaffordable");
    assert!(!blocked.operation_success);
    assert_eq!(blocked.outcome_success, None);
    assert_eq!(
        blocked.block_reason,
        Some(BlockReason::InsufficientCurrency {
            required: 160,
            available: 10,
        })
    );
    assert_eq!(timeline.animation_count(), animations_before);
    assert_eq!(store.saves.borrow().len(), saves_before, "no mutation");
    assert_eq!(session.state().ledger().balance, 10);
}

#[test]
fn outcome_failure_is_not_an_operation_failure() {
    let mut session = solo_session("moss_wisp", 50, Rarity::Common);
    let store = MemoryStore::default();

    let encounter_id = offer(&mut session, &store, 50);
    session
        .begin(
            AttemptRequest::Bond {
                encounter_id: encounter_id.clone(),
            },
            RollOverrides::none().with(RollPurpose::BondSuccess, 0.999),
        )
        .expect("preflight passes");
    session.confirm(&mut Timeline::default()).expect("confirm");
    let envelope = session
        .animation_complete(3, &store, &mut NullObserver)
        .expect("finalizes");

    assert!(envelope.operation_success, "the request itself was valid");
    assert_eq!(envelope.outcome_success, Some(false), "the lottery missed");
    assert_eq!(session.state().pity_for("moss_wisp"), 1);
    assert!(!session.state().is_collected("moss_wisp"));
    assert!(
        session.state().pending_encounter(&encounter_id).is_none(),
        "offer is consumed either way"
    );
}

#[test]
fn consumed_offer_cannot_be_opened_twice() {
    let mut session = solo_session("moss_wisp", 50, Rarity::Common);
    let store = MemoryStore::default();

    let encounter_id = offer(&mut session, &store, 50);
    session
        .begin(
            AttemptRequest::Bond {
                encounter_id: encounter_id.clone(),
            },
            RollOverrides::none().with(RollPurpose::BondSuccess, 0.0),
        )
        .expect("preflight passes");
    session.confirm(&mut Timeline::default()).expect("confirm");
    session
        .animation_complete(4, &store, &mut NullObserver)
        .expect("bond lands");
    assert!(session.state().is_collected("moss_wisp"));

    let second = session
        .begin(
            AttemptRequest::Bond {
                encounter_id: encounter_id.clone(),
            },
            RollOverrides::none(),
        )
        .expect_err("consumed offers are gone");
    assert_eq!(
        second.block_reason,
        Some(BlockReason::UnknownEncounter {
            encounter: encounter_id
        })
    );
}

#[test]
fn session_reward_pays_the_resolved_tier() {
    let mut session = solo_session("moss_wisp", 50, Rarity::Common);
    let store = MemoryStore::default();
    let mut timeline = Timeline::default();

    session
        .begin(
            AttemptRequest::SessionReward { magnitude: 90 },
            RollOverrides::none().with(RollPurpose::RewardTier, 0.999),
        )
        .expect("rewards have no preconditions");
    let mut animator = timeline.clone();
    let cue = session.confirm(&mut animator).expect("confirm");
    let envelope = session
        .animation_complete(5, &store, &mut timeline)
        .expect("finalizes");

    // Magnitude 90 centers the window on Rare; 0.999 lands the top bucket.
    assert_eq!(envelope.tier, Some(Rarity::Legendary));
    assert_eq!(envelope.currency_delta, 400);
    assert_eq!(session.state().ledger().balance, 400);
    match cue.plan {
        wildgrove_engine::LotteryPlan::Tiered { weights, center, .. } => {
            assert_eq!(center, Rarity::Rare);
            assert_eq!(weights.iter().sum::<u32>(), 100);
        }
        wildgrove_engine::LotteryPlan::Binary { .. } => panic!("reward plans are tiered"),
    }
}

#[test]
fn risky_recalibration_shifts_the_snapshot_then_bond_uses_it() {
    let mut session = solo_session("moss_wisp", 50, Rarity::Common);
    session.set_features(FeatureFlags {
        risky_recalibration: true,
        ..FeatureFlags::default()
    });
    let store = MemoryStore::default();

    let encounter_id = offer(&mut session, &store, 50);
    let before = session
        .state()
        .pending_encounter(&encounter_id)
        .expect("pending")
        .probability;

    session
        .begin(
            AttemptRequest::RecalibrateRisky {
                encounter_id: encounter_id.clone(),
            },
            RollOverrides::none().with(RollPurpose::RecalcSuccess, 0.0),
        )
        .expect("unlocked and pending");
    session.confirm(&mut Timeline::default()).expect("confirm");
    let envelope = session
        .animation_complete(6, &store, &mut NullObserver)
        .expect("finalizes");
    assert_eq!(envelope.outcome_success, Some(true));

    let after = session
        .state()
        .pending_encounter(&encounter_id)
        .expect("still pending")
        .probability;
    assert_eq!(after, (before + 0.15).clamp(0.01, 0.99));

    // The boosted snapshot is what the follow-up bond resolves against.
    let ticket = session
        .begin(
            AttemptRequest::Bond { encounter_id },
            RollOverrides::none(),
        )
        .expect("offer survives recalibration");
    match ticket.plan {
        wildgrove_engine::LotteryPlan::Binary { probability, .. } => {
            assert_eq!(probability, after);
        }
        wildgrove_engine::LotteryPlan::Tiered { .. } => panic!("bond plans are binary"),
    }
}

#[test]
fn paid_recalibration_is_roll_free_and_fee_backed() {
    let mut session = solo_session("moss_wisp", 50, Rarity::Common);
    let store = MemoryStore::default();

    let encounter_id = offer(&mut session, &store, 10);
    session
        .grant_currency(80, &store, &mut NullObserver)
        .expect("grant persists");

    // Strength rose since the offer was created; the paid flavor re-snapshots.
    let envelope = session
        .recalibrate_paid(&encounter_id, 50, &store, &mut NullObserver)
        .expect("affordable");
    assert!(envelope.operation_success);
    assert_eq!(envelope.outcome_success, None, "no lottery ran");
    assert_eq!(envelope.currency_delta, -50);
    assert_eq!(session.state().ledger().balance, 30);

    let record = session
        .state()
        .pending_encounter(&encounter_id)
        .expect("still pending");
    assert_eq!(record.probability, 0.50, "snapshot at parity strength");
    assert_eq!(record.recalibrations, 1);

    let blocked = session
        .recalibrate_paid(&encounter_id, 50, &store, &mut NullObserver)
        .expect("returns an envelope");
    assert!(!blocked.operation_success);
    assert_eq!(
        blocked.block_reason,
        Some(BlockReason::InsufficientCurrency {
            required: 50,
            available: 30,
        })
    );
}

#[test]
fn decline_leaves_the_offer_open_and_consumes_nothing() {
    let mut session = solo_session("moss_wisp", 50, Rarity::Common);
    let store = MemoryStore::default();

    let encounter_id = offer(&mut session, &store, 50);
    session
        .begin(
            AttemptRequest::Bond {
                encounter_id: encounter_id.clone(),
            },
            RollOverrides::none(),
        )
        .expect("preflight passes");
    session.decline().expect("decline before animation");

    assert!(
        session.state().pending_encounter(&encounter_id).is_some(),
        "declining the attempt keeps the offer"
    );
    session
        .begin(
            AttemptRequest::Bond { encounter_id },
            RollOverrides::none(),
        )
        .expect("offer can be opened later");
}

#[test]
fn no_notification_leaks_before_the_completion_signal() {
    let mut session = solo_session("moss_wisp", 50, Rarity::Common);
    let store = MemoryStore::default();
    let mut timeline = Timeline::default();

    let encounter_id = offer(&mut session, &store, 50);
    session
        .begin(
            AttemptRequest::Bond { encounter_id },
            RollOverrides::none(),
        )
        .expect("preflight passes");
    let mut animator = timeline.clone();
    session.confirm(&mut animator).expect("confirm");

    let events = timeline.events();
    assert_eq!(events.len(), 1, "only the animation start so far");
    assert!(matches!(events[0], TimelineEvent::AnimationStarted(_)));

    session
        .animation_complete(8, &store, &mut timeline)
        .expect("finalizes");
    assert!(
        timeline.events().len() > 1,
        "notifications follow completion"
    );
}

#[test]
fn direct_operations_are_rejected_mid_attempt() {
    let mut session = solo_session("moss_wisp", 50, Rarity::Common);
    let store = MemoryStore::default();

    let encounter_id = offer(&mut session, &store, 50);
    session
        .begin(
            AttemptRequest::Bond { encounter_id },
            RollOverrides::none(),
        )
        .expect("preflight passes");

    let offer_result = session.offer_encounter(50, 9, &store, &mut NullObserver);
    assert!(matches!(
        offer_result,
        Err(AttemptError::Blocked(BlockReason::AttemptInFlight))
    ));
    let grant_result = session.grant_currency(5, &store, &mut NullObserver);
    assert!(matches!(
        grant_result,
        Err(AttemptError::Blocked(BlockReason::AttemptInFlight))
    ));
}

#[test]
fn persist_failure_surfaces_without_partial_state() {
    let mut session = solo_session("moss_wisp", 50, Rarity::Common);
    let store = MemoryStore::default();
    let mut timeline = Timeline::default();

    let encounter_id = offer(&mut session, &store, 50);
    let before = session.state().clone();
    session
        .begin(
            AttemptRequest::Bond { encounter_id },
            RollOverrides::none().with(RollPurpose::BondSuccess, 0.0),
        )
        .expect("preflight passes");
    let mut animator = timeline.clone();
    session.confirm(&mut animator).expect("confirm");

    store.fail_next.set(true);
    let result = session.animation_complete(9, &store, &mut timeline);
    assert!(matches!(result, Err(AttemptError::PersistFailed { .. })));
    assert_eq!(session.state(), &before, "no partial write");
    assert_eq!(
        timeline.events().len(),
        1,
        "nothing announced after a collaborator fault"
    );
}
