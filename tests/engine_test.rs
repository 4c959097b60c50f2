//! Integration tests for the chore engine command surface: the full
//! claim/approve/disapprove lifecycle, streak behavior across periods,
//! rotation turns, due windows, shared-first masking, and the
//! persist-before-emit guarantee.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chored::chores::record::{AssigneeRecord, CheckpointState, RotationState};
use chored::chores::schema::{
    ChoreSpec, ChoresFile, CompletionMode, OverduePolicy, PendingClaimPolicy, ResetBoundary,
};
use chored::chores::store::{CheckpointStore, MemoryStore, StoreError, StoredChore};
use chored::events::FactBus;
use chored::metrics::EngineMetrics;
use chored::recurrence::{Frequency, Schedule};
use chored::{ChoreEngine, EngineError, LifecycleState};
use chrono::{DateTime, NaiveTime, TimeZone, Utc, Weekday};

fn engine() -> ChoreEngine {
    ChoreEngine::new(
        Arc::new(MemoryStore::new()),
        FactBus::new(),
        Arc::new(EngineMetrics::new()),
    )
}

fn daily_spec(id: &str, assignees: &[&str]) -> ChoreSpec {
    ChoreSpec {
        id: id.into(),
        name: "Test chore".into(),
        points: 5,
        schedule: Schedule {
            frequency: Frequency::Daily,
            ..Schedule::default()
        },
        completion: CompletionMode::Independent,
        rotation: false,
        overdue: OverduePolicy::HoldUntilDone,
        pending_claims: PendingClaimPolicy::Hold,
        reset: ResetBoundary::AtMidnight,
        due_window_minutes: None,
        assignees: assignees.iter().map(|s| s.to_string()).collect(),
    }
}

fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, d, h, m, 0).unwrap()
}

// ── Lifecycle flows ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_claim_approve_lifecycle_emits_facts_with_payloads() {
    let engine = engine();
    engine
        .define_chore(daily_spec("dishes", &["alice"]), at(5, 8, 0))
        .await
        .expect("define");
    let mut rx = engine.bus().subscribe();

    let resolved = engine.claim("dishes", "alice", at(5, 9, 0)).await.expect("claim");
    assert_eq!(resolved.state, LifecycleState::Claimed);
    assert!(!resolved.can_act, "a claim locks the pair until adjudication");

    let streak = engine
        .approve("dishes", "alice", at(5, 10, 0))
        .await
        .expect("approve");
    assert_eq!(streak, 1, "first completion starts the streak");

    let claimed = rx.try_recv().expect("claim fact");
    assert_eq!(claimed.kind.name(), "task-claimed");
    assert_eq!(claimed.assignee.as_deref(), Some("alice"));
    let approved = rx.try_recv().expect("approval fact");
    assert_eq!(approved.kind.name(), "task-approved");
    let json = serde_json::to_value(&approved).expect("serialize");
    assert_eq!(json["points"], 5);
    assert_eq!(json["streak"], 1);

    let rec = engine.record("dishes", "alice").await.expect("record");
    assert_eq!(rec.checkpoint, CheckpointState::Approved);
    // Completion is credited at the claim instant, not the approval.
    assert_eq!(rec.last_completed, Some(at(5, 9, 0)));
    assert_eq!(rec.last_approved, Some(at(5, 10, 0)));
}

#[tokio::test]
async fn test_streak_increments_across_consecutive_days() {
    // Daily chore approved Jan 1 and again Jan 2: the streak extends.
    let engine = engine();
    engine
        .define_chore(daily_spec("dishes", &["alice"]), at(1, 8, 0))
        .await
        .expect("define");

    engine.claim("dishes", "alice", at(1, 9, 55)).await.expect("claim");
    let first = engine.approve("dishes", "alice", at(1, 10, 0)).await.expect("approve");
    assert_eq!(first, 1);

    engine.boundary_tick(at(1, 23, 59), at(2, 0, 1)).await;

    engine.claim("dishes", "alice", at(2, 9, 55)).await.expect("claim");
    let second = engine.approve("dishes", "alice", at(2, 10, 0)).await.expect("approve");
    assert_eq!(second, 2, "no occurrence missed between the approvals");

    let rec = engine.record("dishes", "alice").await.expect("record");
    assert_eq!(rec.longest_streak, 2);
}

#[tokio::test]
async fn test_weekly_monday_skip_resets_streak() {
    // Weekly-Monday chore approved Mon Jan 6 2025, then next on Mon Jan 20:
    // the skipped Jan 13 occurrence resets the streak to 1.
    let jan25 = |d: u32, h: u32, m: u32| Utc.with_ymd_and_hms(2025, 1, d, h, m, 0).unwrap();
    let engine = engine();
    let mut spec = daily_spec("lawn", &["alice"]);
    spec.schedule = Schedule {
        frequency: Frequency::Weekly,
        weekdays: Some(vec![Weekday::Mon]),
        ..Schedule::default()
    };
    engine.define_chore(spec, jan25(6, 8, 0)).await.expect("define");
    assert_eq!(
        engine.due_date("lawn").await.expect("due"),
        Some(jan25(6, 23, 59))
    );

    engine.claim("lawn", "alice", jan25(6, 9, 0)).await.expect("claim");
    let first = engine.approve("lawn", "alice", jan25(6, 9, 30)).await.expect("approve");
    assert_eq!(first, 1);

    // Two weeks of boundary ticks collapsed into one: the reset fires, the
    // streak value survives untouched, and the due date lands on Jan 20.
    engine.boundary_tick(jan25(6, 23, 59), jan25(20, 8, 0)).await;
    let rec = engine.record("lawn", "alice").await.expect("record");
    assert_eq!(rec.checkpoint, CheckpointState::Pending);
    assert_eq!(rec.streak, 1, "resets never touch the streak value");
    assert_eq!(
        engine.due_date("lawn").await.expect("due"),
        Some(jan25(20, 23, 59))
    );

    engine.claim("lawn", "alice", jan25(20, 9, 0)).await.expect("claim");
    let second = engine.approve("lawn", "alice", jan25(20, 9, 30)).await.expect("approve");
    assert_eq!(second, 1, "the missed Jan 13 occurrence breaks the streak");
}

#[tokio::test]
async fn test_disapprove_returns_claim_to_pending() {
    let engine = engine();
    engine
        .define_chore(daily_spec("dishes", &["alice"]), at(5, 8, 0))
        .await
        .expect("define");
    engine.claim("dishes", "alice", at(5, 9, 0)).await.expect("claim");
    let mut rx = engine.bus().subscribe();

    engine.disapprove("dishes", "alice", at(5, 10, 0)).await.expect("disapprove");
    let rec = engine.record("dishes", "alice").await.expect("record");
    assert_eq!(rec.checkpoint, CheckpointState::Pending);
    assert!(!rec.pending_claim);
    assert_eq!(rec.streak, 0, "a rejected claim earns nothing");
    assert_eq!(rx.try_recv().expect("fact").kind.name(), "task-disapproved");

    // The pair is actionable again.
    engine.claim("dishes", "alice", at(5, 11, 0)).await.expect("re-claim");
}

#[tokio::test]
async fn test_undo_steps_streak_back_but_keeps_longest() {
    let engine = engine();
    engine
        .define_chore(daily_spec("dishes", &["alice"]), at(5, 8, 0))
        .await
        .expect("define");
    engine.claim("dishes", "alice", at(5, 9, 0)).await.expect("claim");
    engine.approve("dishes", "alice", at(5, 10, 0)).await.expect("approve");
    let mut rx = engine.bus().subscribe();

    // Disapproving an approved pair is the undo path.
    engine.disapprove("dishes", "alice", at(5, 11, 0)).await.expect("undo");
    let rec = engine.record("dishes", "alice").await.expect("record");
    assert_eq!(rec.checkpoint, CheckpointState::Pending);
    assert_eq!(rec.streak, 0, "undo steps the streak back by one");
    assert_eq!(rec.longest_streak, 1, "the high-water mark is not rewound");

    let fact = rx.try_recv().expect("undo fact");
    assert_eq!(fact.kind.name(), "task-undone");
    let json = serde_json::to_value(&fact).expect("serialize");
    assert_eq!(json["streak"], 0);
}

#[tokio::test]
async fn test_multi_claim_allows_repeat_within_period() {
    let engine = engine();
    let mut spec = daily_spec("water-plants", &["alice"]);
    spec.reset = ResetBoundary::AtMidnightMulti;
    engine.define_chore(spec, at(5, 8, 0)).await.expect("define");

    engine.claim("water-plants", "alice", at(5, 9, 0)).await.expect("claim");
    let first = engine
        .approve("water-plants", "alice", at(5, 9, 30))
        .await
        .expect("approve");
    assert_eq!(first, 1);

    // The approval itself returned the checkpoint to pending.
    let rec = engine.record("water-plants", "alice").await.expect("record");
    assert_eq!(rec.checkpoint, CheckpointState::Pending);

    engine.claim("water-plants", "alice", at(5, 14, 0)).await.expect("re-claim");
    let second = engine
        .approve("water-plants", "alice", at(5, 14, 30))
        .await
        .expect("approve");
    assert_eq!(second, 2, "same-period repeat extends the streak");
}

#[tokio::test]
async fn test_on_completion_reset_advances_due_at_approval() {
    let engine = engine();
    let mut spec = daily_spec("laundry", &["alice"]);
    spec.reset = ResetBoundary::OnCompletion;
    engine.define_chore(spec, at(5, 8, 0)).await.expect("define");
    assert_eq!(engine.due_date("laundry").await.expect("due"), Some(at(5, 23, 59)));

    engine.claim("laundry", "alice", at(5, 9, 0)).await.expect("claim");
    engine.approve("laundry", "alice", at(5, 9, 30)).await.expect("approve");

    let rec = engine.record("laundry", "alice").await.expect("record");
    assert_eq!(rec.checkpoint, CheckpointState::Pending, "reset at approval");
    assert_eq!(
        engine.due_date("laundry").await.expect("due"),
        Some(at(6, 23, 59)),
        "due date advanced at approval"
    );
}

// ── Rotation ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_rotation_turn_advances_on_approval_not_claim() {
    let engine = engine();
    let mut spec = daily_spec("trash", &["alice", "bob"]);
    spec.rotation = true;
    engine.define_chore(spec, at(5, 8, 0)).await.expect("define");

    let holder = |rot: Option<RotationState>| rot.and_then(|r| r.turn);
    assert_eq!(
        holder(engine.rotation("trash").await.expect("rotation")),
        Some("alice".to_string()),
        "definition order seeds the opening turn"
    );

    engine.claim("trash", "alice", at(5, 9, 0)).await.expect("claim");
    assert_eq!(
        holder(engine.rotation("trash").await.expect("rotation")),
        Some("alice".to_string()),
        "a claim never moves the turn"
    );

    engine.approve("trash", "alice", at(5, 10, 0)).await.expect("approve");
    assert_eq!(
        holder(engine.rotation("trash").await.expect("rotation")),
        Some("bob".to_string()),
        "approval advances the turn"
    );
}

#[tokio::test]
async fn test_off_turn_claim_is_rejected_with_the_actual_state() {
    let engine = engine();
    let mut spec = daily_spec("trash", &["alice", "bob"]);
    spec.rotation = true;
    engine.define_chore(spec, at(5, 8, 0)).await.expect("define");

    let err = engine.claim("trash", "bob", at(5, 9, 0)).await.unwrap_err();
    match err {
        EngineError::StateConflict { actual, .. } => {
            assert_eq!(actual, LifecycleState::NotMyTurn)
        }
        other => panic!("expected a state conflict, got {other}"),
    }
}

#[tokio::test]
async fn test_steal_opens_past_due_and_advances_from_the_stealer() {
    // Three-way rotation with the turn pinned to ben; once the due date
    // passes under allow_steal, ann may claim despite being off turn.
    let engine = engine();
    let mut spec = daily_spec("bins", &["ann", "ben", "cal"]);
    spec.rotation = true;
    spec.overdue = OverduePolicy::AllowSteal;
    engine.define_chore(spec, at(5, 8, 0)).await.expect("define");
    engine.set_rotation_turn("bins", "ben").await.expect("set turn");

    // Before the due instant the turn guard still holds.
    let before = engine.resolve("bins", "ann", at(5, 23, 0)).await.expect("resolve");
    assert_eq!(before.state, LifecycleState::NotMyTurn);
    assert!(!before.can_act);

    // Past due (no boundary has run, the due date is still Jan 5 23:59):
    // the steal window bypasses the turn guard and the pair is overdue but
    // actionable.
    let after = engine.resolve("bins", "ann", at(6, 0, 30)).await.expect("resolve");
    assert_eq!(after.state, LifecycleState::Overdue);
    assert!(after.can_act, "steal window opens the pair");

    engine.claim("bins", "ann", at(6, 0, 30)).await.expect("steal claim");
    engine.approve("bins", "ann", at(6, 0, 45)).await.expect("approve");
    let rot = engine.rotation("bins").await.expect("rotation").expect("state");
    assert_eq!(
        rot.turn.as_deref(),
        Some("ben"),
        "the turn moves on from the stealer, re-exposing the skipped holder"
    );
}

#[tokio::test]
async fn test_override_lets_anyone_act_once() {
    let engine = engine();
    let mut spec = daily_spec("trash", &["alice", "bob"]);
    spec.rotation = true;
    engine.define_chore(spec, at(5, 8, 0)).await.expect("define");

    engine.open_rotation_override("trash").await.expect("override");
    engine.claim("trash", "bob", at(5, 9, 0)).await.expect("off-turn claim");
    engine.approve("trash", "bob", at(5, 9, 30)).await.expect("approve");

    let rot = engine.rotation("trash").await.expect("rotation").expect("state");
    assert!(!rot.override_open, "approval closes the one-shot override");
}

// ── Due windows and shared-first ─────────────────────────────────────────────

#[tokio::test]
async fn test_due_window_waits_until_window_start() {
    // Window 09:00–18:00 against an 18:00 due instant: at 08:00 the pair
    // waits, knows when it becomes claimable, and refuses claims.
    let engine = engine();
    let mut spec = daily_spec("homework", &["alice"]);
    spec.schedule.due_time = NaiveTime::from_hms_opt(18, 0, 0).expect("time");
    spec.due_window_minutes = Some(540);
    engine.define_chore(spec, at(5, 7, 0)).await.expect("define");

    let resolved = engine.resolve("homework", "alice", at(5, 8, 0)).await.expect("resolve");
    assert_eq!(resolved.state, LifecycleState::Waiting);
    assert!(!resolved.can_act);
    assert_eq!(resolved.claimable_at, Some(at(5, 9, 0)));

    let err = engine.claim("homework", "alice", at(5, 8, 0)).await.unwrap_err();
    match err {
        EngineError::StateConflict { actual, .. } => {
            assert_eq!(actual, LifecycleState::Waiting)
        }
        other => panic!("expected a state conflict, got {other}"),
    }

    // Inside the window the pair is due and open.
    let open = engine.resolve("homework", "alice", at(5, 9, 30)).await.expect("resolve");
    assert_eq!(open.state, LifecycleState::Due);
    engine.claim("homework", "alice", at(5, 9, 30)).await.expect("claim");
}

#[tokio::test]
async fn test_shared_first_masks_the_rest_without_persisting() {
    let engine = engine();
    let mut spec = daily_spec("feed-cat", &["alice", "bob"]);
    spec.completion = CompletionMode::SharedFirst;
    engine.define_chore(spec, at(5, 8, 0)).await.expect("define");

    engine.claim("feed-cat", "alice", at(5, 9, 0)).await.expect("claim");

    let other = engine.resolve("feed-cat", "bob", at(5, 9, 30)).await.expect("resolve");
    assert_eq!(other.state, LifecycleState::CompletedByOther);
    assert!(!other.can_act);

    // The overlay is display-only: bob's checkpoint is untouched.
    let rec = engine.record("feed-cat", "bob").await.expect("record");
    assert_eq!(rec.checkpoint, CheckpointState::Pending);
}

#[tokio::test]
async fn test_shared_completion_approves_everyone_once() {
    let engine = engine();
    let mut spec = daily_spec("tidy-room", &["alice", "bob"]);
    spec.completion = CompletionMode::Shared;
    engine.define_chore(spec, at(5, 8, 0)).await.expect("define");

    engine.claim("tidy-room", "alice", at(5, 9, 0)).await.expect("claim");
    engine.approve("tidy-room", "alice", at(5, 9, 30)).await.expect("approve");

    for who in ["alice", "bob"] {
        let rec = engine.record("tidy-room", who).await.expect("record");
        assert_eq!(rec.checkpoint, CheckpointState::Approved, "{who} approved");
    }
    // Only the completer earns the streak.
    assert_eq!(engine.record("tidy-room", "alice").await.expect("r").streak, 1);
    assert_eq!(engine.record("tidy-room", "bob").await.expect("r").streak, 0);
}

// ── Due-date commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_skip_and_set_due_date() {
    let engine = engine();
    engine
        .define_chore(daily_spec("dishes", &["alice"]), at(5, 8, 0))
        .await
        .expect("define");
    assert_eq!(engine.due_date("dishes").await.expect("due"), Some(at(5, 23, 59)));

    let next = engine.skip_due_date("dishes", at(5, 10, 0)).await.expect("skip");
    assert_eq!(next, Some(at(6, 23, 59)));

    engine.set_due_date("dishes", None).await.expect("clear");
    assert_eq!(engine.due_date("dishes").await.expect("due"), None);
    // Without a due date nothing is ever due or overdue.
    let resolved = engine.resolve("dishes", "alice", at(9, 12, 0)).await.expect("resolve");
    assert_eq!(resolved.state, LifecycleState::Pending);
}

// ── Persist-before-emit ──────────────────────────────────────────────────────

/// Store that can be switched to fail record writes, for proving that a
/// failed persist aborts the command before any fact escapes.
struct FlakyStore {
    inner: MemoryStore,
    fail_records: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_records: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CheckpointStore for FlakyStore {
    async fn save_record(
        &self,
        chore: &str,
        assignee: &str,
        record: &AssigneeRecord,
    ) -> Result<(), StoreError> {
        if self.fail_records.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected write failure".into()));
        }
        self.inner.save_record(chore, assignee, record).await
    }

    async fn remove_record(&self, chore: &str, assignee: &str) -> Result<(), StoreError> {
        self.inner.remove_record(chore, assignee).await
    }

    async fn save_rotation(&self, chore: &str, rotation: &RotationState) -> Result<(), StoreError> {
        self.inner.save_rotation(chore, rotation).await
    }

    async fn save_due_date(
        &self,
        chore: &str,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.inner.save_due_date(chore, due_date).await
    }

    async fn remove_chore(&self, chore: &str) -> Result<(), StoreError> {
        self.inner.remove_chore(chore).await
    }

    async fn load_chore(&self, chore: &str) -> Result<Option<StoredChore>, StoreError> {
        self.inner.load_chore(chore).await
    }
}

#[tokio::test]
async fn test_failed_persist_aborts_before_any_fact() {
    let store = Arc::new(FlakyStore::new());
    let engine = ChoreEngine::new(
        store.clone(),
        FactBus::new(),
        Arc::new(EngineMetrics::new()),
    );
    engine
        .define_chore(daily_spec("dishes", &["alice"]), at(5, 8, 0))
        .await
        .expect("define");
    let mut rx = engine.bus().subscribe();

    store.fail_records.store(true, Ordering::SeqCst);
    let err = engine.claim("dishes", "alice", at(5, 9, 0)).await.unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));
    assert!(rx.try_recv().is_err(), "no fact may precede a durable write");

    // The runtime is untouched: once the store recovers the claim works.
    store.fail_records.store(false, Ordering::SeqCst);
    let rec = engine.record("dishes", "alice").await.expect("record");
    assert_eq!(rec.checkpoint, CheckpointState::Pending);
    engine.claim("dishes", "alice", at(5, 9, 5)).await.expect("claim");
    assert_eq!(rx.try_recv().expect("fact").kind.name(), "task-claimed");
}

// ── Definitions file ─────────────────────────────────────────────────────────

#[test]
fn test_definitions_file_parses_and_validates() {
    let doc = r#"
        [[chore]]
        id = "dishes"
        name = "Do the dishes"
        points = 5
        assignees = ["alice", "bob"]

        [chore.schedule]
        frequency = { kind = "daily" }
        due_time = "19:30"

        [[chore]]
        id = "trash"
        name = "Take out the trash"
        rotation = true
        overdue = "allow_steal"
        assignees = ["alice", "bob", "carol"]

        [chore.schedule]
        frequency = { kind = "weekly" }
        weekdays = ["mon", "thu"]
    "#;
    let specs = ChoresFile::parse(doc).expect("parse");
    assert_eq!(specs.len(), 2);
    assert_eq!(specs[0].points, 5);
    assert_eq!(
        specs[0].schedule.due_time,
        NaiveTime::from_hms_opt(19, 30, 0).expect("time")
    );
    assert!(specs[1].rotation);
    assert_eq!(specs[1].overdue, OverduePolicy::AllowSteal);

    // First invalid chore fails the whole document, by id.
    let bad = r#"
        [[chore]]
        id = "solo"
        name = "Solo rotation"
        rotation = true
        assignees = ["alice"]
    "#;
    let err = ChoresFile::parse(bad).unwrap_err();
    assert!(err.to_string().contains("solo"), "error names the chore: {err}");
}
