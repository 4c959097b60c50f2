//! Runtime state for a chore: per-assignee checkpoint records, rotation
//! state, the current due date, and in-memory notification markers.
//!
//! Only the checkpoint data (records, rotation, due date) crosses the store
//! boundary. Resolver output and notification markers are derived or
//! ephemeral and are never persisted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Checkpoint ──────────────────────────────────────────────────────────────

/// The coarse per-pair state that survives restarts. The resolver derives
/// its richer answer from this plus the clock; the richer answer is never
/// written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointState {
    Pending,
    Claimed,
    Approved,
    Overdue,
    Missed,
}

impl Default for CheckpointState {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for CheckpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Approved => "approved",
            Self::Overdue => "overdue",
            Self::Missed => "missed",
        };
        f.write_str(s)
    }
}

// ─── Per-assignee record ─────────────────────────────────────────────────────

/// One record per (assignee, chore) pair. Every field here is part of the
/// persisted-checkpoint contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssigneeRecord {
    pub last_claimed: Option<DateTime<Utc>>,
    pub last_approved: Option<DateTime<Utc>>,
    pub last_completed: Option<DateTime<Utc>>,
    pub streak: u32,
    pub longest_streak: u32,
    /// Start of the current reset period, stamped at each boundary.
    pub period_start: Option<DateTime<Utc>>,
    pub checkpoint: CheckpointState,
    /// A claim awaiting adjudication. Read together with the checkpoint so a
    /// held claim is still visible after a boundary returns the checkpoint
    /// to pending.
    pub pending_claim: bool,
}

impl AssigneeRecord {
    /// True while this assignee holds active ownership of the current cycle
    /// (claimed or approved). Drives the shared-first overlay.
    pub fn is_active_owner(&self) -> bool {
        matches!(
            self.checkpoint,
            CheckpointState::Claimed | CheckpointState::Approved
        ) || self.pending_claim
    }

    /// Returns the pair to pending, discarding any claim.
    pub fn reset_to_pending(&mut self) {
        self.checkpoint = CheckpointState::Pending;
        self.pending_claim = false;
    }
}

// ─── Rotation ────────────────────────────────────────────────────────────────

/// Turn state for rotation chores. Operations live in `chores::rotation`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RotationState {
    /// Rotation order; seeded from the definition's assignee order.
    pub order: Vec<String>,
    pub turn: Option<String>,
    /// One-shot override: everyone may act until the next approval.
    pub override_open: bool,
}

// ─── Notification markers ────────────────────────────────────────────────────

/// Edge-trigger bookkeeping for derived facts, kept in memory only. Cleared
/// whenever the pair returns to pending.
#[derive(Debug, Clone, Default)]
pub struct NotifyMarkers {
    pub overdue_seen: bool,
    pub window_seen: bool,
    pub last_reminder: Option<DateTime<Utc>>,
}

impl NotifyMarkers {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

// ─── Per-chore runtime ───────────────────────────────────────────────────────

/// Mutable runtime cell for one chore: due date, rotation, the per-assignee
/// record map, and notification markers. Lives behind the chore's mutex.
#[derive(Debug, Default)]
pub struct ChoreRuntime {
    pub due_date: Option<DateTime<Utc>>,
    pub rotation: Option<RotationState>,
    pub records: HashMap<String, AssigneeRecord>,
    pub(crate) notify: HashMap<String, NotifyMarkers>,
}

impl ChoreRuntime {
    pub fn record(&self, assignee: &str) -> Option<&AssigneeRecord> {
        self.records.get(assignee)
    }

    pub fn record_mut(&mut self, assignee: &str) -> &mut AssigneeRecord {
        self.records.entry(assignee.to_string()).or_default()
    }

    pub(crate) fn markers_mut(&mut self, assignee: &str) -> &mut NotifyMarkers {
        self.notify.entry(assignee.to_string()).or_default()
    }

    /// Another assignee than `assignee` currently owns the cycle. Used by
    /// the shared-first overlay and the aggregate roll-up.
    pub fn other_active_owner(&self, assignee: &str) -> Option<&str> {
        self.records
            .iter()
            .find(|(id, rec)| id.as_str() != assignee && rec.is_active_owner())
            .map(|(id, _)| id.as_str())
    }
}
