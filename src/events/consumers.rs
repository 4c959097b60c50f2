// SPDX-License-Identifier: MIT

//! Fact consumers. One dispatch task drains the bus and hands each fact to
//! every registered consumer in turn, so handling is sequential per
//! (chore, assignee) pair and a handler can issue engine commands without
//! racing its own earlier facts.
//!
//! A consumer that commands the engine can start a feedback loop: its
//! command emits a fact, the fact reaches the consumer, the consumer
//! commands again. The dispatcher suppresses any repeat of the same fact
//! kind for the same pair inside a short horizon, which breaks such loops
//! while day-scale legitimate repeats (reminders, next-period claims) pass.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::{Fact, FactBus};

/// Repeats of one (chore, assignee, kind) inside this horizon are treated
/// as a consumer feedback loop and dropped.
pub const LOOP_GUARD_SECS: i64 = 5;

/// Guard-map entries beyond this count trigger a prune of expired keys.
const LOOP_GUARD_PRUNE_LEN: usize = 1024;

#[async_trait]
pub trait FactConsumer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Handle one fact. Errors are logged and never stop the dispatch.
    async fn handle(&self, fact: &Fact) -> anyhow::Result<()>;
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

pub struct FactDispatcher {
    consumers: Vec<Arc<dyn FactConsumer>>,
    recent: HashMap<(String, String, &'static str), DateTime<Utc>>,
}

impl FactDispatcher {
    pub fn new(consumers: Vec<Arc<dyn FactConsumer>>) -> Self {
        Self {
            consumers,
            recent: HashMap::new(),
        }
    }

    /// Hands the fact to every consumer in registration order. Returns
    /// `false` when the loop guard suppressed it.
    pub async fn dispatch(&mut self, fact: &Fact) -> bool {
        if !self.admit(fact) {
            warn!(
                chore_id = %fact.chore_id,
                kind = fact.kind.name(),
                "repeated fact suppressed, likely a consumer feedback loop"
            );
            return false;
        }
        for consumer in &self.consumers {
            if let Err(err) = consumer.handle(fact).await {
                warn!(
                    consumer = consumer.name(),
                    chore_id = %fact.chore_id,
                    kind = fact.kind.name(),
                    err = %err,
                    "fact consumer failed"
                );
            }
        }
        true
    }

    fn admit(&mut self, fact: &Fact) -> bool {
        let key = (
            fact.chore_id.clone(),
            fact.assignee.clone().unwrap_or_default(),
            fact.kind.name(),
        );
        let horizon = Duration::seconds(LOOP_GUARD_SECS);
        if let Some(last) = self.recent.get(&key) {
            if fact.at.signed_duration_since(*last) < horizon {
                return false;
            }
        }
        if self.recent.len() > LOOP_GUARD_PRUNE_LEN {
            let cutoff = fact.at - horizon;
            self.recent.retain(|_, seen| *seen > cutoff);
        }
        self.recent.insert(key, fact.at);
        true
    }
}

/// Drains the bus until it closes. Spawned once by the host next to the
/// boundary ticker.
pub async fn run_fact_dispatch(bus: FactBus, consumers: Vec<Arc<dyn FactConsumer>>) {
    let mut rx = bus.subscribe();
    let mut dispatcher = FactDispatcher::new(consumers);
    loop {
        match rx.recv().await {
            Ok(fact) => {
                dispatcher.dispatch(&fact).await;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "fact dispatch lagged behind the bus");
            }
            Err(RecvError::Closed) => {
                debug!("fact bus closed, dispatch stopping");
                break;
            }
        }
    }
}

// ─── Built-in consumers ──────────────────────────────────────────────────────

/// Structured-log sink shipped with the daemon host.
pub struct LogConsumer;

#[async_trait]
impl FactConsumer for LogConsumer {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn handle(&self, fact: &Fact) -> anyhow::Result<()> {
        info!(
            chore_id = %fact.chore_id,
            assignee = fact.assignee.as_deref().unwrap_or("-"),
            kind = fact.kind.name(),
            correlation_id = %fact.correlation_id,
            "fact"
        );
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
