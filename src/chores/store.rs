// SPDX-License-Identifier: MIT

//! Checkpoint persistence contract. The engine writes checkpoint data
//! through this trait before emitting any fact about the change; what a
//! backend does with the writes is its own business. Only checkpoint data
//! crosses this boundary — resolver output and notification markers never
//! land here.
//!
//! `MemoryStore` is the in-crate reference backend used by the daemon host
//! and the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::record::{AssigneeRecord, RotationState};
use super::schema::ChoreId;

/// Backend failure surfaced to the engine. The engine treats any store
/// error as grounds to abort the command before a fact is emitted.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Everything a backend holds for one chore.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredChore {
    pub due_date: Option<DateTime<Utc>>,
    pub rotation: Option<RotationState>,
    pub records: HashMap<String, AssigneeRecord>,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save_record(
        &self,
        chore: &str,
        assignee: &str,
        record: &AssigneeRecord,
    ) -> Result<(), StoreError>;

    async fn remove_record(&self, chore: &str, assignee: &str) -> Result<(), StoreError>;

    async fn save_rotation(&self, chore: &str, rotation: &RotationState) -> Result<(), StoreError>;

    async fn save_due_date(
        &self,
        chore: &str,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    async fn remove_chore(&self, chore: &str) -> Result<(), StoreError>;

    /// Host restore: the persisted state for one chore, if any.
    async fn load_chore(&self, chore: &str) -> Result<Option<StoredChore>, StoreError>;
}

// ─── In-memory backend ───────────────────────────────────────────────────────

/// Reference backend: a mirror of the checkpoint data behind an RwLock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    chores: RwLock<HashMap<ChoreId, StoredChore>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything held, for shutdown summaries and tests.
    pub async fn dump(&self) -> HashMap<ChoreId, StoredChore> {
        self.chores.read().await.clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn save_record(
        &self,
        chore: &str,
        assignee: &str,
        record: &AssigneeRecord,
    ) -> Result<(), StoreError> {
        let mut chores = self.chores.write().await;
        chores
            .entry(chore.to_string())
            .or_default()
            .records
            .insert(assignee.to_string(), record.clone());
        Ok(())
    }

    async fn remove_record(&self, chore: &str, assignee: &str) -> Result<(), StoreError> {
        let mut chores = self.chores.write().await;
        if let Some(stored) = chores.get_mut(chore) {
            stored.records.remove(assignee);
        }
        Ok(())
    }

    async fn save_rotation(&self, chore: &str, rotation: &RotationState) -> Result<(), StoreError> {
        let mut chores = self.chores.write().await;
        chores.entry(chore.to_string()).or_default().rotation = Some(rotation.clone());
        Ok(())
    }

    async fn save_due_date(
        &self,
        chore: &str,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut chores = self.chores.write().await;
        chores.entry(chore.to_string()).or_default().due_date = due_date;
        Ok(())
    }

    async fn remove_chore(&self, chore: &str) -> Result<(), StoreError> {
        self.chores.write().await.remove(chore);
        Ok(())
    }

    async fn load_chore(&self, chore: &str) -> Result<Option<StoredChore>, StoreError> {
        Ok(self.chores.read().await.get(chore).cloned())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
