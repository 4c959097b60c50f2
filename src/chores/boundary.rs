// SPDX-License-Identifier: MIT

//! Overdue boundary processor: the tick-driven half of state resolution.
//!
//! Each scan does two jobs per chore, under the chore's own mutex:
//!
//! 1. Edge maintenance, every tick: persist the overdue checkpoint the
//!    first time a pair crosses its due date, and emit the matching fact
//!    exactly once per period. A mark-missed-and-lock miss is announced
//!    here too, but the lock itself is a boundary action. Edges are
//!    tracked with in-memory markers, so a restart may re-emit;
//!    collaborators treat facts as at-least-once.
//! 2. Boundary processing, only when the chore's own boundary kind fires:
//!    the reset matrix with the missed lock-in and release, the
//!    missed-turn rotation advance, and the due-date advance.
//!    Midnight-kind chores react to a crossed UTC date line,
//!    due-date-kind chores to a due instant that has passed, and
//!    on-completion chores never react to ticks at all.
//!
//! Fire detection is self-healing. A completed boundary always moves the
//! due date past `now` and stamps every record with the new period start,
//! so a stale due date or a stale stamp means unfinished boundary work —
//! whether the process slept through the instant or a store failure cut the
//! previous attempt short — and the next scan picks it up.
//!
//! Store writes happen before the corresponding fact is emitted, and a
//! failing chore is logged and skipped rather than aborting the scan.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::events::{new_correlation_id, Fact, FactKind};

use super::engine::{
    commit_approval, stage_approval, ChoreCell, ChoreEngine, ChoreInner, EngineError, SharedEngine,
};
use super::record::{CheckpointState, ChoreRuntime};
use super::resolver::{self, LifecycleState};
use super::schema::{OverduePolicy, PendingClaimPolicy};

/// Default scan cadence for the daemon host.
pub const DEFAULT_TICK_SECS: u64 = 60;

/// An unacted pair gets its single per-period reminder this close to the
/// due date, or any time once it is overdue.
pub const REMINDER_LEAD_MINUTES: i64 = 30;

/// What one scan did, for logs and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryReport {
    pub chores_scanned: usize,
    pub boundaries_fired: usize,
    pub pairs_reset: usize,
    pub facts_emitted: usize,
}

impl ChoreEngine {
    /// One boundary scan covering the window `(previous, now]`.
    pub async fn boundary_tick(
        &self,
        previous: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BoundaryReport {
        self.metrics.incr_boundary_scans();
        let midnight_crossed = previous.date_naive() < now.date_naive();

        let cells: Vec<(String, Arc<ChoreCell>)> = {
            let map = self.cells.read().await;
            map.iter().map(|(id, c)| (id.clone(), c.clone())).collect()
        };

        let mut report = BoundaryReport::default();
        for (chore_id, cell) in cells {
            let mut inner = cell.inner.lock().await;
            report.chores_scanned += 1;
            match self.tick_chore(&mut inner, now, midnight_crossed).await {
                Ok((fired, resets, facts)) => {
                    if fired {
                        report.boundaries_fired += 1;
                    }
                    report.pairs_reset += resets;
                    report.facts_emitted += facts;
                }
                Err(err) => {
                    warn!(chore_id = %chore_id, err = %err, "boundary scan failed for chore, skipping");
                }
            }
        }
        report
    }

    async fn tick_chore(
        &self,
        inner: &mut ChoreInner,
        now: DateTime<Utc>,
        midnight_crossed: bool,
    ) -> Result<(bool, usize, usize), EngineError> {
        let chore = inner.spec.id.clone();
        let corr = new_correlation_id();
        let mut facts = 0usize;

        facts += self.maintain_edges(inner, &chore, &corr, now).await?;

        let reset = inner.spec.reset;
        let fired_midnight = reset.is_midnight_kind()
            && (midnight_crossed || stale_since_midnight(&inner.runtime, now));
        let fired_due =
            reset.is_due_date_kind() && inner.runtime.due_date.is_some_and(|d| d <= now);

        if !(fired_midnight || fired_due) {
            return Ok((false, 0, facts));
        }

        // A pure miss is judged on the pre-boundary state, before any
        // auto-approval rewrites it: the due date passed and nobody acted
        // this period. Multi-claim kinds return approved records to pending
        // at the approval itself, so a completion since the period opened
        // counts as acting even when every checkpoint reads pending now.
        let due_passed = inner.runtime.due_date.is_some_and(|d| d <= now);
        let period_open = inner
            .runtime
            .records
            .values()
            .filter_map(|r| r.period_start)
            .max();
        let acted = inner.runtime.records.values().any(|r| {
            matches!(
                r.checkpoint,
                CheckpointState::Claimed | CheckpointState::Approved
            ) || r.pending_claim
                || match period_open {
                    Some(open) => r.last_approved.is_some_and(|t| t >= open),
                    None => r.last_approved.is_some(),
                }
        });
        let pure_miss = inner.spec.rotation && due_passed && !acted;

        // Auto-approve adjudicates surviving claims through the normal
        // approval path (streak, rotation advance, facts) before the reset.
        // First claim first; shared completion subsumes the rest.
        if inner.spec.pending_claims == PendingClaimPolicy::AutoApprove {
            let mut claimants: Vec<(Option<DateTime<Utc>>, String)> = inner
                .runtime
                .records
                .iter()
                .filter(|(_, r)| r.checkpoint == CheckpointState::Claimed || r.pending_claim)
                .map(|(a, r)| (r.last_claimed, a.clone()))
                .collect();
            claimants.sort();
            for (_, assignee) in claimants {
                let still_claimed = inner
                    .runtime
                    .record(&assignee)
                    .map(|r| r.checkpoint == CheckpointState::Claimed || r.pending_claim)
                    .unwrap_or(false);
                if !still_claimed {
                    continue;
                }
                let staged = stage_approval(inner, &assignee, now)?;
                self.persist_approval(&chore, &staged).await?;
                let streak = staged.streak;
                let fact = commit_approval(inner, staged, now);
                self.metrics.incr_approvals();
                info!(chore_id = %chore, assignee = %assignee, streak, "claim auto-approved at boundary");
                self.emit(Fact::new(&chore, Some(assignee.as_str()), now, &corr, fact));
                facts += 1;
            }
        }

        // The reset matrix, pair by pair, covering assigned pairs with no
        // record yet. The missed lock is persisted here, at the boundary
        // closing the period that was missed, and released one matching
        // boundary later, so a locked pair dwells for a full period.
        let mut resets = 0usize;
        let mut targets: Vec<String> = inner.spec.assignees.clone();
        for known in inner.runtime.records.keys() {
            if !targets.iter().any(|a| a == known) {
                targets.push(known.clone());
            }
        }
        for assignee in targets {
            let current = inner.runtime.record(&assignee).cloned().unwrap_or_default();
            // Lock-in is judged on the pre-reset state: a pair the resolver
            // still calls missed when its period closes gets the persisted
            // lock, while a pair locked one boundary ago takes the missed
            // exit arm below instead.
            let lock_in = inner.spec.overdue == OverduePolicy::MarkMissedAndLock
                && current.checkpoint == CheckpointState::Pending
                && !current.pending_claim
                && resolver::resolve(&inner.spec, &inner.runtime, &assignee, now).state
                    == LifecycleState::Missed;
            let mut rec = current.clone();

            if (rec.checkpoint == CheckpointState::Claimed || rec.pending_claim)
                && inner.spec.pending_claims == PendingClaimPolicy::Clear
            {
                rec.reset_to_pending();
            }
            match rec.checkpoint {
                CheckpointState::Approved => rec.reset_to_pending(),
                CheckpointState::Overdue => match inner.spec.overdue {
                    OverduePolicy::HoldUntilDone => {}
                    OverduePolicy::ClearAtReset | OverduePolicy::AllowSteal => {
                        rec.reset_to_pending()
                    }
                    OverduePolicy::MarkMissedAndLock => {
                        rec.checkpoint = CheckpointState::Missed
                    }
                    OverduePolicy::ClearImmediatelyOnLate => {}
                },
                // A lock persisted by the previous matching boundary exits
                // at this one.
                CheckpointState::Missed => rec.reset_to_pending(),
                CheckpointState::Pending if lock_in => {
                    rec.checkpoint = CheckpointState::Missed
                }
                _ => {}
            }
            rec.period_start = Some(now);

            self.store.save_record(&chore, &assignee, &rec).await?;
            let was_reset = (rec.checkpoint == CheckpointState::Pending
                && current.checkpoint != CheckpointState::Pending)
                || (current.pending_claim && !rec.pending_claim);
            if !matches!(
                rec.checkpoint,
                CheckpointState::Overdue | CheckpointState::Missed
            ) {
                // Dwelling pairs keep their markers, so the overdue or
                // missed fact is not re-emitted for the same unfinished
                // work.
                inner.runtime.notify.remove(&assignee);
            }
            inner.runtime.records.insert(assignee, rec);
            if was_reset {
                resets += 1;
                self.metrics.incr_boundary_resets();
            }
        }

        // A missed turn moves on, except under hold-until-done where the
        // holder keeps the obligation.
        if pure_miss && inner.spec.overdue != OverduePolicy::HoldUntilDone {
            if let Some(mut rot) = inner.runtime.rotation.clone() {
                rot.advance_after_miss();
                self.store.save_rotation(&chore, &rot).await?;
                info!(
                    chore_id = %chore,
                    new_holder = rot.holder().unwrap_or("-"),
                    "rotation advanced after missed period"
                );
                inner.runtime.rotation = Some(rot);
            }
        }

        // Advance a consumed (or absent) due date to the next occurrence; a
        // future due date is left alone. Arithmetic failure keeps the old
        // value and the next scan retries.
        if inner.runtime.due_date.map_or(true, |d| d <= now) {
            match inner.spec.schedule.next_occurrence(now) {
                Ok(next) => {
                    if next != inner.runtime.due_date {
                        self.store.save_due_date(&chore, next).await?;
                        inner.runtime.due_date = next;
                    }
                }
                Err(err) => {
                    warn!(chore_id = %chore, err = %err, "due-date advance failed at boundary, keeping previous");
                }
            }
        }

        Ok((true, resets, facts))
    }

    /// Every-tick edge maintenance: overdue checkpoint persistence plus
    /// the once-per-period derived facts.
    async fn maintain_edges(
        &self,
        inner: &mut ChoreInner,
        chore: &str,
        corr: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, EngineError> {
        let mut facts = 0usize;
        let assignees = inner.spec.assignees.clone();
        for assignee in &assignees {
            let resolved = resolver::resolve(&inner.spec, &inner.runtime, assignee, now);
            let due = inner.runtime.due_date;

            match resolved.state {
                LifecycleState::Overdue => {
                    let seen = inner.runtime.markers_mut(assignee).overdue_seen;
                    if !seen {
                        if let Some(due) = due {
                            let mut rec =
                                inner.runtime.record(assignee).cloned().unwrap_or_default();
                            if rec.checkpoint != CheckpointState::Overdue {
                                rec.checkpoint = CheckpointState::Overdue;
                                self.store.save_record(chore, assignee, &rec).await?;
                                inner.runtime.records.insert(assignee.clone(), rec);
                            }
                            inner.runtime.markers_mut(assignee).overdue_seen = true;
                            self.emit(Fact::new(
                                chore,
                                Some(assignee.as_str()),
                                now,
                                corr,
                                FactKind::Overdue { due_date: due },
                            ));
                            facts += 1;
                        }
                    }
                }
                LifecycleState::Missed => {
                    // Announce the miss once; the lock itself is persisted
                    // by the boundary, not here.
                    let seen = inner.runtime.markers_mut(assignee).overdue_seen;
                    if !seen {
                        if let Some(due) = due {
                            inner.runtime.markers_mut(assignee).overdue_seen = true;
                            self.emit(Fact::new(
                                chore,
                                Some(assignee.as_str()),
                                now,
                                corr,
                                FactKind::Missed { due_date: due },
                            ));
                            facts += 1;
                        }
                    }
                }
                LifecycleState::Due => {
                    if let (Some(due), Some(mins)) = (due, inner.spec.due_window_minutes) {
                        if !inner.runtime.markers_mut(assignee).window_seen {
                            let window_start = due
                                .checked_sub_signed(Duration::minutes(i64::from(mins)))
                                .unwrap_or(due);
                            inner.runtime.markers_mut(assignee).window_seen = true;
                            self.emit(Fact::new(
                                chore,
                                Some(assignee.as_str()),
                                now,
                                corr,
                                FactKind::DueWindowOpened {
                                    due_date: due,
                                    window_start,
                                },
                            ));
                            facts += 1;
                        }
                    }
                }
                _ => {}
            }

            // Single per-period reminder for unacted work close to, or past,
            // its due date.
            if resolved.can_act
                && matches!(resolved.state, LifecycleState::Due | LifecycleState::Overdue)
            {
                let remind_now = resolved.state == LifecycleState::Overdue
                    || due.is_some_and(|d| now >= d - Duration::minutes(REMINDER_LEAD_MINUTES));
                if remind_now && inner.runtime.markers_mut(assignee).last_reminder.is_none() {
                    if let Some(due) = due {
                        inner.runtime.markers_mut(assignee).last_reminder = Some(now);
                        self.emit(Fact::new(
                            chore,
                            Some(assignee.as_str()),
                            now,
                            corr,
                            FactKind::DueReminder { due_date: due },
                        ));
                        facts += 1;
                    }
                }
            }
        }
        Ok(facts)
    }
}

/// A midnight-kind chore with a period-start stamp or a due date from an
/// earlier UTC date slept through at least one midnight.
fn stale_since_midnight(runtime: &ChoreRuntime, now: DateTime<Utc>) -> bool {
    let today = now.date_naive();
    runtime
        .records
        .values()
        .any(|r| r.period_start.is_some_and(|p| p.date_naive() < today))
        || runtime.due_date.is_some_and(|d| d.date_naive() < today)
}

/// Background ticker driving the scans, in the daemon host.
pub async fn run_boundary_ticker(engine: SharedEngine, tick_secs: u64) {
    let mut interval = tokio::time::interval(StdDuration::from_secs(tick_secs.max(1)));
    interval.tick().await; // skip the immediate first tick
    let mut previous = Utc::now();
    loop {
        interval.tick().await;
        let now = Utc::now();
        let report = engine.boundary_tick(previous, now).await;
        if report.boundaries_fired > 0 || report.facts_emitted > 0 {
            info!(
                chores = report.chores_scanned,
                fired = report.boundaries_fired,
                resets = report.pairs_reset,
                facts = report.facts_emitted,
                "boundary scan"
            );
        }
        previous = now;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
