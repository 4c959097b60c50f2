//! Outbound facts. The engine tells collaborators what already happened —
//! it never asks for permission and never waits for them. Facts are plain
//! data on a broadcast channel; a slow subscriber lags and catches up (or
//! misses) without ever blocking the emitting command.

pub mod consumers;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Capacity of the fact channel. Lagging subscribers lose oldest-first.
pub const FACT_CHANNEL_CAPACITY: usize = 1024;

/// Correlation ids tie every fact of one command to that command.
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

// ─── Fact payloads ───────────────────────────────────────────────────────────

/// What happened. Payloads carry enough (due date, base points, streak) for
/// collaborators to act without re-querying the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FactKind {
    #[serde(rename = "task-claimed")]
    Claimed { points: i64 },
    #[serde(rename = "task-approved")]
    Approved { points: i64, streak: u32 },
    #[serde(rename = "task-disapproved")]
    Disapproved,
    #[serde(rename = "task-undone")]
    Undone { streak: u32 },
    #[serde(rename = "task-overdue")]
    Overdue { due_date: DateTime<Utc> },
    #[serde(rename = "task-missed")]
    Missed { due_date: DateTime<Utc> },
    #[serde(rename = "task-due-window-opened")]
    DueWindowOpened {
        due_date: DateTime<Utc>,
        window_start: DateTime<Utc>,
    },
    #[serde(rename = "task-due-reminder-due")]
    DueReminder { due_date: DateTime<Utc> },
}

impl FactKind {
    /// Stable name for logs and metrics, matching the wire tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Claimed { .. } => "task-claimed",
            Self::Approved { .. } => "task-approved",
            Self::Disapproved => "task-disapproved",
            Self::Undone { .. } => "task-undone",
            Self::Overdue { .. } => "task-overdue",
            Self::Missed { .. } => "task-missed",
            Self::DueWindowOpened { .. } => "task-due-window-opened",
            Self::DueReminder { .. } => "task-due-reminder-due",
        }
    }
}

/// Envelope around a fact: which pair, when, and which command caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub chore_id: String,
    /// Absent for chore-level facts (e.g. the due window opening for an
    /// unassigned scan); present for everything per-pair.
    pub assignee: Option<String>,
    pub at: DateTime<Utc>,
    pub correlation_id: String,
    #[serde(flatten)]
    pub kind: FactKind,
}

impl Fact {
    pub fn new(
        chore_id: &str,
        assignee: Option<&str>,
        at: DateTime<Utc>,
        correlation_id: &str,
        kind: FactKind,
    ) -> Self {
        Self {
            chore_id: chore_id.to_string(),
            assignee: assignee.map(str::to_string),
            at,
            correlation_id: correlation_id.to_string(),
            kind,
        }
    }
}

// ─── Bus ─────────────────────────────────────────────────────────────────────

/// Broadcast bus for facts. Cheap to clone; every subscriber gets every
/// fact emitted after it subscribed.
#[derive(Debug, Clone)]
pub struct FactBus {
    tx: broadcast::Sender<Fact>,
}

impl FactBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FACT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Fact> {
        self.tx.subscribe()
    }

    /// Emits a fact; returns how many subscribers saw it. Zero subscribers
    /// is not an error — the engine does not care who listens.
    pub fn emit(&self, fact: Fact) -> usize {
        let name = fact.kind.name();
        match self.tx.send(fact) {
            Ok(n) => {
                debug!(fact = name, receivers = n, "fact emitted");
                n
            }
            Err(_) => 0,
        }
    }
}

impl Default for FactBus {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
