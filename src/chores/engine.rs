//! Chore engine: the arena of chores, the command surface, and the
//! persist-before-emit pipeline.
//!
//! Every command follows the same shape: look the chore up in the arena,
//! take its cell mutex (the per-pair exclusive region, coarsened to chore
//! scope because pairs of one chore share rotation and ownership state),
//! stage the updated checkpoint data as owned values, write them through
//! the store, commit them to the runtime, and only then emit facts. A store
//! failure aborts the command before anything externally visible happens.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::events::{new_correlation_id, Fact, FactBus, FactKind};
use crate::metrics::SharedMetrics;
use crate::recurrence::ScheduleError;

use super::record::{AssigneeRecord, CheckpointState, ChoreRuntime, RotationState};
use super::resolver::{self, AggregateState, LifecycleState, ResolvedState};
use super::schema::{ChoreId, ChoreSpec, CompletionMode, DefinitionError, ResetBoundary};
use super::store::{CheckpointStore, StoreError};

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Typed command failures. Nothing here is fatal to the host; callers map
/// these onto their own surfaces.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid definition for chore '{chore}': {source}")]
    InvalidDefinition {
        chore: ChoreId,
        #[source]
        source: DefinitionError,
    },
    #[error("unknown chore: {0}")]
    UnknownChore(ChoreId),
    #[error("assignee '{assignee}' is not assigned to chore '{chore}'")]
    UnknownAssignee { chore: ChoreId, assignee: String },
    #[error("chore '{chore}' for '{assignee}' is {actual}, needs {needed}")]
    StateConflict {
        chore: ChoreId,
        assignee: String,
        actual: LifecycleState,
        needed: &'static str,
    },
    #[error("chore '{0}' has no rotation")]
    NotRotating(ChoreId),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

// ─── Arena ───────────────────────────────────────────────────────────────────

/// One chore's definition and runtime behind a single mutex. The mutex is
/// the exclusive region for every pair of the chore.
pub(crate) struct ChoreCell {
    pub(crate) inner: Mutex<ChoreInner>,
}

pub(crate) struct ChoreInner {
    pub(crate) spec: ChoreSpec,
    pub(crate) runtime: ChoreRuntime,
}

pub struct ChoreEngine {
    pub(crate) cells: RwLock<HashMap<ChoreId, Arc<ChoreCell>>>,
    pub(crate) store: Arc<dyn CheckpointStore>,
    pub(crate) bus: FactBus,
    pub(crate) metrics: SharedMetrics,
}

pub type SharedEngine = Arc<ChoreEngine>;

impl ChoreEngine {
    pub fn new(store: Arc<dyn CheckpointStore>, bus: FactBus, metrics: SharedMetrics) -> Self {
        Self {
            cells: RwLock::new(HashMap::new()),
            store,
            bus,
            metrics,
        }
    }

    pub fn bus(&self) -> &FactBus {
        &self.bus
    }

    pub(crate) fn emit(&self, fact: Fact) {
        self.metrics.incr_facts_emitted();
        self.bus.emit(fact);
    }

    async fn cell(&self, chore: &str) -> Result<Arc<ChoreCell>, EngineError> {
        self.cells
            .read()
            .await
            .get(chore)
            .cloned()
            .ok_or_else(|| EngineError::UnknownChore(chore.to_string()))
    }

    fn require_member(spec: &ChoreSpec, assignee: &str) -> Result<(), EngineError> {
        if spec.assignees.iter().any(|a| a == assignee) {
            Ok(())
        } else {
            Err(EngineError::UnknownAssignee {
                chore: spec.id.clone(),
                assignee: assignee.to_string(),
            })
        }
    }

    // ─── Definition commands ─────────────────────────────────────────────────

    /// Admits (or redefines) a chore. The definition is validated first and
    /// rejected definitions leave no trace. On first definition any state
    /// the store holds for the id is restored; on redefinition records of
    /// removed assignees are dropped and the rotation is re-seeded around
    /// the surviving turn holder.
    pub async fn define_chore(
        &self,
        spec: ChoreSpec,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        spec.validate().map_err(|source| EngineError::InvalidDefinition {
            chore: spec.id.clone(),
            source,
        })?;

        let mut cells = self.cells.write().await;
        if let Some(cell) = cells.get(&spec.id).cloned() {
            let mut inner = cell.inner.lock().await;
            self.redefine_locked(&mut inner, spec, now).await?;
            return Ok(());
        }

        let stored = self.store.load_chore(&spec.id).await?.unwrap_or_default();
        let mut runtime = ChoreRuntime {
            due_date: stored.due_date,
            ..ChoreRuntime::default()
        };
        for (assignee, record) in stored.records {
            if spec.assignees.iter().any(|a| *a == assignee) {
                runtime.records.insert(assignee, record);
            }
        }
        if spec.rotation {
            runtime.rotation = Some(restore_rotation(&spec, stored.rotation));
        }
        if runtime.due_date.is_none() {
            runtime.due_date = spec.schedule.next_occurrence(now)?;
        }

        if let Some(rot) = &runtime.rotation {
            self.store.save_rotation(&spec.id, rot).await?;
        }
        self.store.save_due_date(&spec.id, runtime.due_date).await?;

        info!(chore_id = %spec.id, schedule = %spec.schedule, "chore defined");
        cells.insert(
            spec.id.clone(),
            Arc::new(ChoreCell {
                inner: Mutex::new(ChoreInner { spec, runtime }),
            }),
        );
        Ok(())
    }

    async fn redefine_locked(
        &self,
        inner: &mut ChoreInner,
        spec: ChoreSpec,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let removed: Vec<String> = inner
            .runtime
            .records
            .keys()
            .filter(|a| !spec.assignees.contains(a))
            .cloned()
            .collect();
        for assignee in &removed {
            self.store.remove_record(&spec.id, assignee).await?;
        }

        let rotation = if spec.rotation {
            let prior = inner.runtime.rotation.clone();
            Some(restore_rotation(&spec, prior))
        } else {
            None
        };
        let due_date = if inner.spec.schedule == spec.schedule {
            inner.runtime.due_date
        } else {
            spec.schedule.next_occurrence(now)?
        };

        if let Some(rot) = &rotation {
            self.store.save_rotation(&spec.id, rot).await?;
        }
        self.store.save_due_date(&spec.id, due_date).await?;

        for assignee in &removed {
            inner.runtime.records.remove(assignee);
            inner.runtime.notify.remove(assignee);
        }
        inner.runtime.rotation = rotation;
        inner.runtime.due_date = due_date;
        inner.spec = spec;
        info!(chore_id = %inner.spec.id, "chore redefined");
        Ok(())
    }

    pub async fn remove_chore(&self, chore: &str) -> Result<(), EngineError> {
        let mut cells = self.cells.write().await;
        if cells.remove(chore).is_none() {
            return Err(EngineError::UnknownChore(chore.to_string()));
        }
        self.store.remove_chore(chore).await?;
        info!(chore_id = %chore, "chore removed");
        Ok(())
    }

    /// Adds an assignee to a chore; a no-op if already assigned. Rotation
    /// chores append them to the end of the turn order.
    pub async fn assign(&self, chore: &str, assignee: &str) -> Result<(), EngineError> {
        let cell = self.cell(chore).await?;
        let mut inner = cell.inner.lock().await;
        if inner.spec.assignees.iter().any(|a| a == assignee) {
            return Ok(());
        }
        let mut rotation = inner.runtime.rotation.clone();
        if let Some(rot) = &mut rotation {
            rot.order.push(assignee.to_string());
        }
        if let Some(rot) = &rotation {
            self.store.save_rotation(chore, rot).await?;
        }
        inner.spec.assignees.push(assignee.to_string());
        inner.runtime.rotation = rotation;
        info!(chore_id = %chore, assignee = %assignee, "assignee added");
        Ok(())
    }

    /// Removes an assignee and cascades: their record and markers go, and a
    /// held rotation turn is reassigned to the first remaining assignee.
    pub async fn unassign(&self, chore: &str, assignee: &str) -> Result<(), EngineError> {
        let cell = self.cell(chore).await?;
        let mut inner = cell.inner.lock().await;
        Self::require_member(&inner.spec, assignee)?;

        let mut rotation = inner.runtime.rotation.clone();
        if let Some(rot) = &mut rotation {
            rot.remove_assignee(assignee);
        }
        self.store.remove_record(chore, assignee).await?;
        if let Some(rot) = &rotation {
            self.store.save_rotation(chore, rot).await?;
        }

        inner.spec.assignees.retain(|a| a != assignee);
        inner.runtime.records.remove(assignee);
        inner.runtime.notify.remove(assignee);
        inner.runtime.rotation = rotation;
        info!(chore_id = %chore, assignee = %assignee, "assignee removed");
        Ok(())
    }

    // ─── Lifecycle commands ──────────────────────────────────────────────────

    /// An assignee claims the chore. Refused with a state conflict unless
    /// the resolver says the pair is actionable right now.
    pub async fn claim(
        &self,
        chore: &str,
        assignee: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedState, EngineError> {
        let cell = self.cell(chore).await?;
        let mut inner = cell.inner.lock().await;
        Self::require_member(&inner.spec, assignee)?;

        let resolved = resolver::resolve(&inner.spec, &inner.runtime, assignee, now);
        if !resolved.can_act {
            return Err(EngineError::StateConflict {
                chore: chore.to_string(),
                assignee: assignee.to_string(),
                actual: resolved.state,
                needed: "an actionable state",
            });
        }

        let mut record = inner.runtime.record(assignee).cloned().unwrap_or_default();
        record.checkpoint = CheckpointState::Claimed;
        record.pending_claim = true;
        record.last_claimed = Some(now);

        self.store.save_record(chore, assignee, &record).await?;
        inner
            .runtime
            .records
            .insert(assignee.to_string(), record);

        self.metrics.incr_claims();
        info!(chore_id = %chore, assignee = %assignee, "claim accepted");
        let corr = new_correlation_id();
        let points = inner.spec.points;
        self.emit(Fact::new(
            chore,
            Some(assignee),
            now,
            &corr,
            FactKind::Claimed { points },
        ));
        Ok(resolver::resolve(&inner.spec, &inner.runtime, assignee, now))
    }

    /// Adjudicates a claim as done: streak bookkeeping, reset-kind
    /// handling, rotation advance, persist, emit.
    pub async fn approve(
        &self,
        chore: &str,
        assignee: &str,
        now: DateTime<Utc>,
    ) -> Result<u32, EngineError> {
        let cell = self.cell(chore).await?;
        let mut inner = cell.inner.lock().await;
        Self::require_member(&inner.spec, assignee)?;

        let has_claim = inner
            .runtime
            .record(assignee)
            .map(|r| r.checkpoint == CheckpointState::Claimed || r.pending_claim)
            .unwrap_or(false);
        if !has_claim {
            let resolved = resolver::resolve(&inner.spec, &inner.runtime, assignee, now);
            return Err(EngineError::StateConflict {
                chore: chore.to_string(),
                assignee: assignee.to_string(),
                actual: resolved.state,
                needed: "a claim awaiting approval",
            });
        }

        let staged = stage_approval(&inner, assignee, now)?;
        self.persist_approval(chore, &staged).await?;
        let streak = staged.streak;
        let was_steal = staged.was_steal;
        let fact = commit_approval(&mut inner, staged, now);

        self.metrics.incr_approvals();
        if was_steal {
            self.metrics.incr_steals();
            info!(chore_id = %chore, assignee = %assignee, "turn stolen by approval");
        }
        info!(chore_id = %chore, assignee = %assignee, streak, "claim approved");
        let corr = new_correlation_id();
        self.emit(Fact::new(chore, Some(assignee), now, &corr, fact));
        Ok(streak)
    }

    /// Rejects a claim (claimed → pending), or undoes an approval
    /// (approved → pending, streak stepped back by one).
    pub async fn disapprove(
        &self,
        chore: &str,
        assignee: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let cell = self.cell(chore).await?;
        let mut inner = cell.inner.lock().await;
        Self::require_member(&inner.spec, assignee)?;

        let mut record = inner.runtime.record(assignee).cloned().unwrap_or_default();
        let is_claim = record.checkpoint == CheckpointState::Claimed || record.pending_claim;
        let is_undo = record.checkpoint == CheckpointState::Approved;
        if !is_claim && !is_undo {
            let resolved = resolver::resolve(&inner.spec, &inner.runtime, assignee, now);
            return Err(EngineError::StateConflict {
                chore: chore.to_string(),
                assignee: assignee.to_string(),
                actual: resolved.state,
                needed: "a claim or an approval to adjudicate",
            });
        }

        let kind = if is_undo {
            // Streak steps back to its pre-approval value; the longest
            // streak and the rotation are deliberately not rewound.
            record.streak = record.streak.saturating_sub(1);
            record.reset_to_pending();
            FactKind::Undone {
                streak: record.streak,
            }
        } else {
            record.reset_to_pending();
            FactKind::Disapproved
        };

        self.store.save_record(chore, assignee, &record).await?;
        inner
            .runtime
            .records
            .insert(assignee.to_string(), record);
        inner.runtime.markers_mut(assignee).clear();

        if is_undo {
            self.metrics.incr_undos();
            info!(chore_id = %chore, assignee = %assignee, "approval undone");
        } else {
            self.metrics.incr_disapprovals();
            info!(chore_id = %chore, assignee = %assignee, "claim disapproved");
        }
        let corr = new_correlation_id();
        self.emit(Fact::new(chore, Some(assignee), now, &corr, kind));
        Ok(())
    }

    /// Administrative reset: one pair (or every pair) back to pending.
    pub async fn reset_chore(
        &self,
        chore: &str,
        assignee: Option<&str>,
        _now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let cell = self.cell(chore).await?;
        let mut inner = cell.inner.lock().await;

        let targets: Vec<String> = match assignee {
            Some(a) => {
                Self::require_member(&inner.spec, a)?;
                vec![a.to_string()]
            }
            None => inner.spec.assignees.clone(),
        };

        let mut staged: Vec<(String, AssigneeRecord)> = Vec::new();
        for target in &targets {
            let mut record = inner.runtime.record(target).cloned().unwrap_or_default();
            record.reset_to_pending();
            staged.push((target.clone(), record));
        }
        for (target, record) in &staged {
            self.store.save_record(chore, target, record).await?;
        }
        for (target, record) in staged {
            inner.runtime.notify.remove(&target);
            inner.runtime.records.insert(target, record);
        }
        info!(chore_id = %chore, scope = assignee.unwrap_or("all"), "chore reset");
        Ok(())
    }

    // ─── Due-date commands ───────────────────────────────────────────────────

    /// Skips past the current due date to the next scheduled occurrence.
    /// Unlike the streak path, arithmetic failures here surface as errors:
    /// the caller explicitly asked for a computation.
    pub async fn skip_due_date(
        &self,
        chore: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, EngineError> {
        let cell = self.cell(chore).await?;
        let mut inner = cell.inner.lock().await;
        let after = inner.runtime.due_date.map_or(now, |d| d.max(now));
        let next = inner.spec.schedule.next_occurrence(after)?;
        self.store.save_due_date(chore, next).await?;
        inner.runtime.due_date = next;
        inner.runtime.notify.clear();
        info!(chore_id = %chore, due = ?next, "due date skipped forward");
        Ok(next)
    }

    /// Pins (or clears) the due date directly.
    pub async fn set_due_date(
        &self,
        chore: &str,
        when: Option<DateTime<Utc>>,
    ) -> Result<(), EngineError> {
        let cell = self.cell(chore).await?;
        let mut inner = cell.inner.lock().await;
        self.store.save_due_date(chore, when).await?;
        inner.runtime.due_date = when;
        inner.runtime.notify.clear();
        info!(chore_id = %chore, due = ?when, "due date set");
        Ok(())
    }

    // ─── Rotation commands ───────────────────────────────────────────────────

    pub async fn set_rotation_turn(&self, chore: &str, assignee: &str) -> Result<(), EngineError> {
        let cell = self.cell(chore).await?;
        let mut inner = cell.inner.lock().await;
        Self::require_member(&inner.spec, assignee)?;
        let mut rotation = inner
            .runtime
            .rotation
            .clone()
            .ok_or_else(|| EngineError::NotRotating(chore.to_string()))?;
        if !rotation.set_turn(assignee) {
            return Err(EngineError::UnknownAssignee {
                chore: chore.to_string(),
                assignee: assignee.to_string(),
            });
        }
        self.store.save_rotation(chore, &rotation).await?;
        inner.runtime.rotation = Some(rotation);
        info!(chore_id = %chore, assignee = %assignee, "rotation turn set");
        Ok(())
    }

    /// Re-seeds the rotation order; `None` restores the definition order.
    pub async fn reset_rotation(
        &self,
        chore: &str,
        order: Option<Vec<String>>,
    ) -> Result<(), EngineError> {
        let cell = self.cell(chore).await?;
        let mut inner = cell.inner.lock().await;
        if inner.runtime.rotation.is_none() {
            return Err(EngineError::NotRotating(chore.to_string()));
        }
        let order = order.unwrap_or_else(|| inner.spec.assignees.clone());
        for name in &order {
            Self::require_member(&inner.spec, name)?;
        }
        let mut rotation = inner.runtime.rotation.clone().unwrap_or_default();
        rotation.reset(order);
        self.store.save_rotation(chore, &rotation).await?;
        inner.runtime.rotation = Some(rotation);
        info!(chore_id = %chore, "rotation reset");
        Ok(())
    }

    /// Opens the one-shot override: the next approval closes it again.
    pub async fn open_rotation_override(&self, chore: &str) -> Result<(), EngineError> {
        let cell = self.cell(chore).await?;
        let mut inner = cell.inner.lock().await;
        let mut rotation = inner
            .runtime
            .rotation
            .clone()
            .ok_or_else(|| EngineError::NotRotating(chore.to_string()))?;
        rotation.open_override();
        self.store.save_rotation(chore, &rotation).await?;
        inner.runtime.rotation = Some(rotation);
        info!(chore_id = %chore, "rotation override opened");
        Ok(())
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    pub async fn resolve(
        &self,
        chore: &str,
        assignee: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedState, EngineError> {
        let cell = self.cell(chore).await?;
        let inner = cell.inner.lock().await;
        Self::require_member(&inner.spec, assignee)?;
        Ok(resolver::resolve(&inner.spec, &inner.runtime, assignee, now))
    }

    pub async fn aggregate_state(
        &self,
        chore: &str,
        now: DateTime<Utc>,
    ) -> Result<AggregateState, EngineError> {
        let cell = self.cell(chore).await?;
        let inner = cell.inner.lock().await;
        Ok(resolver::aggregate(&inner.spec, &inner.runtime, now))
    }

    pub async fn list_chores(&self) -> Vec<ChoreId> {
        let mut ids: Vec<ChoreId> = self.cells.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn spec(&self, chore: &str) -> Result<ChoreSpec, EngineError> {
        let cell = self.cell(chore).await?;
        let inner = cell.inner.lock().await;
        Ok(inner.spec.clone())
    }

    pub async fn record(
        &self,
        chore: &str,
        assignee: &str,
    ) -> Result<AssigneeRecord, EngineError> {
        let cell = self.cell(chore).await?;
        let inner = cell.inner.lock().await;
        Self::require_member(&inner.spec, assignee)?;
        Ok(inner.runtime.record(assignee).cloned().unwrap_or_default())
    }

    pub async fn due_date(&self, chore: &str) -> Result<Option<DateTime<Utc>>, EngineError> {
        let cell = self.cell(chore).await?;
        let inner = cell.inner.lock().await;
        Ok(inner.runtime.due_date)
    }

    pub async fn rotation(&self, chore: &str) -> Result<Option<RotationState>, EngineError> {
        let cell = self.cell(chore).await?;
        let inner = cell.inner.lock().await;
        Ok(inner.runtime.rotation.clone())
    }

    // ─── Internals shared with the boundary scan ─────────────────────────────

    pub(crate) async fn persist_approval(
        &self,
        chore: &str,
        staged: &StagedApproval,
    ) -> Result<(), EngineError> {
        for (assignee, record) in &staged.records {
            self.store.save_record(chore, assignee, record).await?;
        }
        if let Some(rot) = &staged.rotation {
            self.store.save_rotation(chore, rot).await?;
        }
        if let Some(due) = staged.due_date {
            self.store.save_due_date(chore, due).await?;
        }
        Ok(())
    }
}

// ─── Approval staging ────────────────────────────────────────────────────────

/// Owned copies of everything an approval changes, staged before any store
/// write so a failure leaves the runtime untouched.
pub(crate) struct StagedApproval {
    pub(crate) records: Vec<(String, AssigneeRecord)>,
    pub(crate) rotation: Option<RotationState>,
    /// `Some(new_value)` when the approval advances the due date.
    pub(crate) due_date: Option<Option<DateTime<Utc>>>,
    pub(crate) streak: u32,
    pub(crate) was_steal: bool,
    pub(crate) points: i64,
}

/// Computes the full effect of approving `assignee`'s claim at `now`.
///
/// The completion instant credited to the streak is the claim's timestamp —
/// the work was done when it was claimed, and a boundary auto-approval at
/// midnight must not shift the completion onto the next day.
pub(crate) fn stage_approval(
    inner: &ChoreInner,
    assignee: &str,
    now: DateTime<Utc>,
) -> Result<StagedApproval, EngineError> {
    let spec = &inner.spec;
    let runtime = &inner.runtime;

    let mut record = runtime.record(assignee).cloned().unwrap_or_default();
    let work_time = record.last_claimed.unwrap_or(now);
    let streak = super::streak::compute_streak(
        record.streak,
        record.last_completed,
        work_time,
        &spec.schedule,
    );

    record.streak = streak;
    record.longest_streak = record.longest_streak.max(streak);
    record.last_approved = Some(now);
    record.last_completed = Some(work_time);
    record.checkpoint = CheckpointState::Approved;
    record.pending_claim = false;

    let mut records: Vec<(String, AssigneeRecord)> = vec![(assignee.to_string(), record)];

    // Shared completion: one approval covers everyone, but only the
    // completer earns streak and timestamp bookkeeping.
    if spec.completion == CompletionMode::Shared {
        for other in spec.assignees.iter().filter(|a| *a != assignee) {
            let mut rec = runtime.record(other).cloned().unwrap_or_default();
            rec.checkpoint = CheckpointState::Approved;
            rec.pending_claim = false;
            records.push((other.clone(), rec));
        }
    }

    // Reset-kind handling at the approval itself.
    let mut due_date = None;
    match spec.reset {
        ResetBoundary::OnCompletion => {
            for (_, rec) in &mut records {
                if rec.checkpoint == CheckpointState::Approved {
                    rec.reset_to_pending();
                }
            }
            let after = runtime.due_date.map_or(now, |d| d.max(now));
            // Arithmetic failures here degrade to a reset without a new due
            // date rather than failing the approval.
            let next = match spec.schedule.next_occurrence(after) {
                Ok(next) => next,
                Err(err) => {
                    tracing::warn!(
                        chore_id = %spec.id,
                        err = %err,
                        "due-date advance failed at approval, clearing due date"
                    );
                    None
                }
            };
            due_date = Some(next);
        }
        boundary if boundary.is_multi_claim() => {
            for (_, rec) in &mut records {
                if rec.checkpoint == CheckpointState::Approved {
                    rec.reset_to_pending();
                }
            }
        }
        _ => {}
    }

    let mut was_steal = false;
    let rotation = if spec.rotation {
        let mut rot = runtime.rotation.clone().unwrap_or_else(|| {
            RotationState::new(spec.assignees.clone())
        });
        was_steal = !rot.is_turn(assignee);
        rot.advance_turn(assignee);
        Some(rot)
    } else {
        None
    };

    Ok(StagedApproval {
        records,
        rotation,
        due_date,
        streak,
        was_steal,
        points: spec.points,
    })
}

/// Applies a persisted staging to the runtime and returns the fact to emit.
pub(crate) fn commit_approval(
    inner: &mut ChoreInner,
    staged: StagedApproval,
    _now: DateTime<Utc>,
) -> FactKind {
    for (assignee, record) in staged.records {
        if record.checkpoint == CheckpointState::Pending {
            inner.runtime.notify.remove(&assignee);
        }
        inner.runtime.records.insert(assignee, record);
    }
    if staged.rotation.is_some() {
        inner.runtime.rotation = staged.rotation;
    }
    if let Some(due) = staged.due_date {
        inner.runtime.due_date = due;
        inner.runtime.notify.clear();
    }
    FactKind::Approved {
        points: staged.points,
        streak: staged.streak,
    }
}

/// Rebuilds rotation state around a new definition, keeping the current
/// turn holder and an open override when the holder survives.
fn restore_rotation(spec: &ChoreSpec, prior: Option<RotationState>) -> RotationState {
    let mut rot = RotationState::new(spec.assignees.clone());
    if let Some(prior) = prior {
        if let Some(turn) = prior.turn {
            if rot.set_turn(&turn) {
                rot.override_open = prior.override_open;
            }
        }
    }
    rot
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chores::schema::{OverduePolicy, PendingClaimPolicy};
    use crate::chores::store::MemoryStore;
    use crate::metrics::EngineMetrics;
    use crate::recurrence::{Frequency, Schedule};
    use chrono::TimeZone;

    fn engine() -> ChoreEngine {
        ChoreEngine::new(
            Arc::new(MemoryStore::new()),
            FactBus::new(),
            Arc::new(EngineMetrics::new()),
        )
    }

    fn daily_spec(id: &str) -> ChoreSpec {
        ChoreSpec {
            id: id.into(),
            name: "Test chore".into(),
            points: 2,
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
            assignees: vec!["alice".into(), "bob".into()],
        }
    }

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, d, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn invalid_definition_is_rejected_and_unstored() {
        let engine = engine();
        let mut spec = daily_spec("broken");
        spec.assignees.clear();
        let err = engine.define_chore(spec, at(1, 8)).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidDefinition { .. }));
        assert!(engine.list_chores().await.is_empty());
    }

    #[tokio::test]
    async fn define_computes_the_first_due_date() {
        let engine = engine();
        engine.define_chore(daily_spec("dishes"), at(5, 8)).await.unwrap();
        let due = engine.due_date("dishes").await.unwrap().expect("due set");
        assert_eq!(due, Utc.with_ymd_and_hms(2026, 1, 5, 23, 59, 0).unwrap());
    }

    #[tokio::test]
    async fn commands_on_unknown_chores_fail_typed() {
        let engine = engine();
        let err = engine.claim("ghost", "alice", at(1, 8)).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownChore(_)));
    }

    #[tokio::test]
    async fn approve_without_a_claim_is_a_state_conflict() {
        let engine = engine();
        engine.define_chore(daily_spec("dishes"), at(5, 8)).await.unwrap();
        let err = engine.approve("dishes", "alice", at(5, 9)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::StateConflict {
                needed: "a claim awaiting approval",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unassign_cascades_record_and_turn() {
        let engine = engine();
        let mut spec = daily_spec("trash");
        spec.rotation = true;
        spec.assignees = vec!["alice".into(), "bob".into(), "carol".into()];
        engine.define_chore(spec, at(5, 8)).await.unwrap();

        engine.unassign("trash", "alice").await.unwrap();
        let rot = engine.rotation("trash").await.unwrap().expect("rotation");
        assert_eq!(rot.holder(), Some("bob"));
        let spec = engine.spec("trash").await.unwrap();
        assert!(!spec.assignees.contains(&"alice".to_string()));
    }
}
