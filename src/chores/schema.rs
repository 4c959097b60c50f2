//! Chore definitions: the static shape of a chore and its policies, plus
//! definition-time validation. Invalid definitions are rejected here and
//! never reach the engine's stores.

use serde::{Deserialize, Serialize};

use crate::recurrence::{Frequency, Schedule};

/// Chores are addressed by caller-supplied string ids.
pub type ChoreId = String;

fn default_points() -> i64 {
    1
}

// ─── Policy enums ────────────────────────────────────────────────────────────

/// Who has to do the chore for it to count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// Every assignee completes their own copy.
    Independent,
    /// All assignees share one completion.
    Shared,
    /// First assignee to complete wins; the rest see completed-by-other.
    SharedFirst,
}

impl Default for CompletionMode {
    fn default() -> Self {
        Self::Independent
    }
}

/// What happens once a due date passes without an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverduePolicy {
    /// Stays actionable (and visibly overdue) until someone does it.
    HoldUntilDone,
    /// Stays actionable until the next reset boundary clears it.
    ClearAtReset,
    /// Lateness is erased the moment it occurs; never dwells in overdue.
    ClearImmediatelyOnLate,
    /// Locks the pair in a missed state until the next matching boundary.
    MarkMissedAndLock,
    /// Rotation chores only: after the due date anyone may take the turn.
    AllowSteal,
}

impl OverduePolicy {
    /// Policies under which a pair dwells in an actionable overdue state.
    pub fn is_relaxed(self) -> bool {
        matches!(
            self,
            Self::HoldUntilDone | Self::ClearAtReset | Self::AllowSteal
        )
    }
}

impl Default for OverduePolicy {
    fn default() -> Self {
        Self::HoldUntilDone
    }
}

/// What a reset boundary does to a claim still awaiting approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingClaimPolicy {
    /// Claim survives the boundary untouched.
    Hold,
    /// Claim is discarded; the pair returns to pending.
    Clear,
    /// Claim is approved on the spot (full approval path), then reset.
    AutoApprove,
}

impl Default for PendingClaimPolicy {
    fn default() -> Self {
        Self::Hold
    }
}

/// Which periodic boundary returns a chore to pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetBoundary {
    AtMidnight,
    /// Midnight reset, with re-claims allowed within the period.
    AtMidnightMulti,
    AtDueDate,
    /// Due-date reset, with re-claims allowed within the period.
    AtDueDateMulti,
    /// Resets (and advances the due date) at the moment of approval.
    OnCompletion,
}

impl ResetBoundary {
    pub fn is_midnight_kind(self) -> bool {
        matches!(self, Self::AtMidnight | Self::AtMidnightMulti)
    }

    pub fn is_due_date_kind(self) -> bool {
        matches!(self, Self::AtDueDate | Self::AtDueDateMulti)
    }

    /// Multi-claim kinds return the checkpoint to pending right after an
    /// approval so the pair can be claimed again within the same period.
    pub fn is_multi_claim(self) -> bool {
        matches!(self, Self::AtMidnightMulti | Self::AtDueDateMulti)
    }
}

impl Default for ResetBoundary {
    fn default() -> Self {
        Self::AtMidnight
    }
}

// ─── Definition ──────────────────────────────────────────────────────────────

/// Static definition of a chore. Runtime state lives elsewhere; this struct
/// is immutable once admitted and is exactly what the definitions file holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoreSpec {
    pub id: ChoreId,
    pub name: String,
    /// Base points carried in fact payloads for reward bookkeeping.
    #[serde(default = "default_points")]
    pub points: i64,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub completion: CompletionMode,
    /// Turn-restricted chore: only the rotation turn holder may claim.
    #[serde(default)]
    pub rotation: bool,
    #[serde(default)]
    pub overdue: OverduePolicy,
    #[serde(default)]
    pub pending_claims: PendingClaimPolicy,
    #[serde(default)]
    pub reset: ResetBoundary,
    /// Claims are refused until this many minutes before the due date.
    #[serde(default)]
    pub due_window_minutes: Option<u32>,
    /// Ordered; the order seeds the rotation.
    pub assignees: Vec<String>,
}

/// Why a definition was rejected. Rejection is synchronous; nothing about a
/// bad definition is ever stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("chore id must not be empty")]
    EmptyId,
    #[error("chore name must not be empty")]
    EmptyName,
    #[error("chore needs at least one assignee")]
    NoAssignees,
    #[error("assignee listed twice: {0}")]
    DuplicateAssignee(String),
    #[error("rotation requires at least two assignees")]
    RotationNeedsTwoAssignees,
    #[error("rotation cannot be combined with shared completion")]
    RotationSharedCompletion,
    #[error("allow_steal requires rotation")]
    StealWithoutRotation,
    #[error("allow_steal requires a schedule that produces due dates")]
    StealWithoutSchedule,
    #[error("allow_steal requires a midnight-based reset")]
    StealWithoutMidnightReset,
    #[error("interval count must be at least 1")]
    ZeroIntervalCount,
    #[error("weekday filter must not be empty")]
    EmptyWeekdayFilter,
    #[error("weekday filter only applies to weekly schedules")]
    WeekdayFilterNotWeekly,
    #[error("due window must be at least one minute")]
    ZeroDueWindow,
}

impl ChoreSpec {
    /// Checks every definition invariant. Called by the engine before a
    /// definition is admitted and by the `validate` subcommand.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.id.trim().is_empty() {
            return Err(DefinitionError::EmptyId);
        }
        if self.name.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        if self.assignees.is_empty() {
            return Err(DefinitionError::NoAssignees);
        }
        for (i, a) in self.assignees.iter().enumerate() {
            if self.assignees[..i].contains(a) {
                return Err(DefinitionError::DuplicateAssignee(a.clone()));
            }
        }
        if self.rotation {
            if self.assignees.len() < 2 {
                return Err(DefinitionError::RotationNeedsTwoAssignees);
            }
            if self.completion == CompletionMode::Shared {
                return Err(DefinitionError::RotationSharedCompletion);
            }
        }
        if self.overdue == OverduePolicy::AllowSteal {
            if !self.rotation {
                return Err(DefinitionError::StealWithoutRotation);
            }
            if self.schedule.is_unscheduled() {
                return Err(DefinitionError::StealWithoutSchedule);
            }
            if !self.reset.is_midnight_kind() {
                return Err(DefinitionError::StealWithoutMidnightReset);
            }
        }
        if let Frequency::Every { count, .. } = self.schedule.frequency {
            if count == 0 {
                return Err(DefinitionError::ZeroIntervalCount);
            }
        }
        if let Some(days) = &self.schedule.weekdays {
            if days.is_empty() {
                return Err(DefinitionError::EmptyWeekdayFilter);
            }
            if !self.schedule.is_weekly_kind() {
                return Err(DefinitionError::WeekdayFilterNotWeekly);
            }
        }
        if self.due_window_minutes == Some(0) {
            return Err(DefinitionError::ZeroDueWindow);
        }
        Ok(())
    }
}

// ─── Definitions file ────────────────────────────────────────────────────────

/// On-disk chore definitions: a TOML document of `[[chore]]` tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChoresFile {
    #[serde(default)]
    pub chore: Vec<ChoreSpec>,
}

#[derive(Debug, thiserror::Error)]
pub enum DefinitionsFileError {
    #[error("definitions file is not valid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid chore '{chore}': {source}")]
    Invalid {
        chore: ChoreId,
        #[source]
        source: DefinitionError,
    },
}

impl ChoresFile {
    /// Parses and validates a definitions document, failing on the first
    /// invalid chore.
    pub fn parse(text: &str) -> Result<Vec<ChoreSpec>, DefinitionsFileError> {
        let file: ChoresFile = toml::from_str(text)?;
        for spec in &file.chore {
            spec.validate().map_err(|source| DefinitionsFileError::Invalid {
                chore: spec.id.clone(),
                source,
            })?;
        }
        Ok(file.chore)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
