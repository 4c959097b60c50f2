//! State resolver: turns a checkpoint record plus the clock into the single
//! authoritative lifecycle state for an (assignee, chore) pair.
//!
//! The guards run top to bottom and the first match wins, so exactly one
//! state comes out for any input. Resolution is pure: nothing here mutates a
//! record, takes a lock, or touches the store, and re-resolving unchanged
//! inputs always returns the same answer.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{AssigneeRecord, CheckpointState, ChoreRuntime};
use super::schema::{ChoreSpec, CompletionMode, OverduePolicy};

// ─── Resolver output ─────────────────────────────────────────────────────────

/// The authoritative per-pair lifecycle state.
///
/// `CompletedByOther` never falls out of the guard table: it is the
/// display-only overlay applied for shared-first chores once another
/// assignee owns the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Approved,
    Claimed,
    NotMyTurn,
    Missed,
    Overdue,
    Waiting,
    Due,
    Pending,
    CompletedByOther,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Approved => "approved",
            Self::Claimed => "claimed",
            Self::NotMyTurn => "not_my_turn",
            Self::Missed => "missed",
            Self::Overdue => "overdue",
            Self::Waiting => "waiting",
            Self::Due => "due",
            Self::Pending => "pending",
            Self::CompletedByOther => "completed_by_other",
        };
        f.write_str(s)
    }
}

/// Why an actionable command would be refused right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    AlreadyApproved,
    AwaitingApproval,
    NotYourTurn,
    MissedLocked,
    BeforeWindow,
    CompletedByOther,
}

/// Full resolver answer for one (assignee, chore) pair at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedState {
    pub state: LifecycleState,
    pub can_act: bool,
    pub lock_reason: Option<LockReason>,
    /// When a claim becomes possible, for pairs waiting on the due window.
    pub claimable_at: Option<DateTime<Utc>>,
}

impl ResolvedState {
    fn locked(state: LifecycleState, reason: LockReason) -> Self {
        Self {
            state,
            can_act: false,
            lock_reason: Some(reason),
            claimable_at: None,
        }
    }

    fn open(state: LifecycleState) -> Self {
        Self {
            state,
            can_act: true,
            lock_reason: None,
            claimable_at: None,
        }
    }
}

// ─── Resolution ──────────────────────────────────────────────────────────────

/// Resolves the lifecycle state for one pair, shared-first overlay included.
pub fn resolve(
    spec: &ChoreSpec,
    runtime: &ChoreRuntime,
    assignee: &str,
    now: DateTime<Utc>,
) -> ResolvedState {
    let core = resolve_core(spec, runtime, assignee, now);
    apply_shared_first_overlay(spec, runtime, assignee, core)
}

/// The eight-guard table without the overlay. The aggregate roll-up works
/// on these so a masked pair still counts as what it really is.
fn resolve_core(
    spec: &ChoreSpec,
    runtime: &ChoreRuntime,
    assignee: &str,
    now: DateTime<Utc>,
) -> ResolvedState {
    let fallback = AssigneeRecord::default();
    let record = runtime.record(assignee).unwrap_or(&fallback);
    let due = runtime.due_date;
    let past_due = due.is_some_and(|d| now > d);

    // 1. Approved dominates everything this period.
    if record.checkpoint == CheckpointState::Approved {
        return ResolvedState::locked(LifecycleState::Approved, LockReason::AlreadyApproved);
    }

    // 2. A claim (including one held across a boundary) awaits adjudication.
    if record.checkpoint == CheckpointState::Claimed || record.pending_claim {
        return ResolvedState::locked(LifecycleState::Claimed, LockReason::AwaitingApproval);
    }

    // 3. Rotation: off-turn assignees are locked out unless the override is
    //    open or the steal window (allow_steal past the due date) is.
    if spec.rotation {
        if let Some(rot) = &runtime.rotation {
            let steal_open = spec.overdue == OverduePolicy::AllowSteal && past_due;
            if !rot.is_turn(assignee) && !rot.override_open && !steal_open {
                return ResolvedState::locked(LifecycleState::NotMyTurn, LockReason::NotYourTurn);
            }
        }
    }

    // 4. Missed lock: either already persisted by a boundary, or derived
    //    live the instant the due date passes under mark_missed_and_lock.
    if record.checkpoint == CheckpointState::Missed
        || (spec.overdue == OverduePolicy::MarkMissedAndLock && past_due)
    {
        return ResolvedState::locked(LifecycleState::Missed, LockReason::MissedLocked);
    }

    // 5. Overdue, still actionable, for the relaxed policies. A persisted
    //    overdue checkpoint keeps the pair here even after a boundary
    //    advances the due date: the dwell ends when the work is done, not
    //    when the calendar moves. Lateness under clear_immediately_on_late
    //    never dwells here: the pair falls through to due/pending as if the
    //    due date had not passed.
    if (spec.overdue.is_relaxed() && past_due) || record.checkpoint == CheckpointState::Overdue {
        return ResolvedState::open(LifecycleState::Overdue);
    }

    // 6–7. Due-window phases.
    if let Some(due) = due {
        if spec.overdue == OverduePolicy::ClearImmediatelyOnLate && now > due {
            return ResolvedState::open(LifecycleState::Pending);
        }
        let window_start = match spec.due_window_minutes {
            Some(mins) => due
                .checked_sub_signed(Duration::minutes(i64::from(mins)))
                .unwrap_or(due),
            // No window configured: the due phase opens with the due date's
            // day, and nothing ever waits.
            None => due.date_naive().and_time(NaiveTime::MIN).and_utc(),
        };
        if spec.due_window_minutes.is_some() && now < window_start {
            return ResolvedState {
                state: LifecycleState::Waiting,
                can_act: false,
                lock_reason: Some(LockReason::BeforeWindow),
                claimable_at: Some(window_start),
            };
        }
        if now >= window_start && now <= due {
            return ResolvedState::open(LifecycleState::Due);
        }
    }

    // 8. Default.
    ResolvedState::open(LifecycleState::Pending)
}

/// Shared-first chores: once another assignee owns the cycle, everyone
/// else's pending/due/overdue collapses to completed-by-other. Display only;
/// checkpoints are untouched.
fn apply_shared_first_overlay(
    spec: &ChoreSpec,
    runtime: &ChoreRuntime,
    assignee: &str,
    core: ResolvedState,
) -> ResolvedState {
    if spec.completion != CompletionMode::SharedFirst {
        return core;
    }
    let maskable = matches!(
        core.state,
        LifecycleState::Pending | LifecycleState::Due | LifecycleState::Overdue
    );
    if maskable && runtime.other_active_owner(assignee).is_some() {
        return ResolvedState::locked(
            LifecycleState::CompletedByOther,
            LockReason::CompletedByOther,
        );
    }
    core
}

// ─── Aggregate roll-up ───────────────────────────────────────────────────────

/// Whole-chore state across all assignees, for host display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateState {
    Unknown,
    Pending,
    PartiallyClaimed,
    Claimed,
    PartiallyApproved,
    Approved,
    Overdue,
    Missed,
}

/// Rolls the per-assignee core states up to one chore-level answer.
///
/// Rotation chores defer to the turn holder. Shared-criteria chores treat
/// any claim as the whole chore being claimed. Independent multi-assignee
/// chores report partial progress, with outstanding overdue/missed work
/// taking precedence over partial completion.
pub fn aggregate(spec: &ChoreSpec, runtime: &ChoreRuntime, now: DateTime<Utc>) -> AggregateState {
    if spec.assignees.is_empty() {
        return AggregateState::Unknown;
    }

    let all_approved = spec.assignees.iter().all(|a| {
        runtime
            .record(a)
            .map(|r| r.checkpoint == CheckpointState::Approved)
            .unwrap_or(false)
    });
    if all_approved {
        return AggregateState::Approved;
    }

    if spec.rotation {
        if let Some(holder) = runtime.rotation.as_ref().and_then(|r| r.turn.clone()) {
            let holder_state = resolve_core(spec, runtime, &holder, now).state;
            return match holder_state {
                LifecycleState::Approved => AggregateState::Approved,
                LifecycleState::Claimed => AggregateState::Claimed,
                LifecycleState::Overdue => AggregateState::Overdue,
                LifecycleState::Missed => AggregateState::Missed,
                _ => AggregateState::Pending,
            };
        }
    }

    let states: Vec<LifecycleState> = spec
        .assignees
        .iter()
        .map(|a| resolve_core(spec, runtime, a, now).state)
        .collect();

    if matches!(
        spec.completion,
        CompletionMode::Shared | CompletionMode::SharedFirst
    ) && states.iter().any(|s| *s == LifecycleState::Claimed)
    {
        return AggregateState::Claimed;
    }

    if states.iter().any(|s| *s == LifecycleState::Overdue) {
        return AggregateState::Overdue;
    }
    if states.iter().any(|s| *s == LifecycleState::Missed) {
        return AggregateState::Missed;
    }
    if states.iter().any(|s| *s == LifecycleState::Approved) {
        return AggregateState::PartiallyApproved;
    }
    if states.iter().any(|s| *s == LifecycleState::Claimed) {
        return AggregateState::PartiallyClaimed;
    }
    AggregateState::Pending
}

// ─── Tests ───────────────────────────────────────────────────────────────────
