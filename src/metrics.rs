// SPDX-License-Identifier: MIT

//! In-process counters. Cheap relaxed atomics bumped on the hot paths,
//! rendered once into the shutdown log. No exporter, no registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub claims: AtomicU64,
    pub approvals: AtomicU64,
    pub disapprovals: AtomicU64,
    pub undos: AtomicU64,
    /// Approvals by an off-turn assignee through the steal window.
    pub steals: AtomicU64,
    pub boundary_scans: AtomicU64,
    /// Pairs returned to pending (or locked) by a boundary scan.
    pub boundary_resets: AtomicU64,
    pub facts_emitted: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_claims(&self) {
        self.claims.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_approvals(&self) {
        self.approvals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_disapprovals(&self) {
        self.disapprovals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_undos(&self) {
        self.undos.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_steals(&self) {
        self.steals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_boundary_scans(&self) {
        self.boundary_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_boundary_resets(&self) {
        self.boundary_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_facts_emitted(&self) {
        self.facts_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// One-line rollup for the shutdown log.
    pub fn summary(&self) -> String {
        format!(
            "claims={} approvals={} disapprovals={} undos={} steals={} \
             boundary_scans={} boundary_resets={} facts={}",
            self.claims.load(Ordering::Relaxed),
            self.approvals.load(Ordering::Relaxed),
            self.disapprovals.load(Ordering::Relaxed),
            self.undos.load(Ordering::Relaxed),
            self.steals.load(Ordering::Relaxed),
            self.boundary_scans.load(Ordering::Relaxed),
            self.boundary_resets.load(Ordering::Relaxed),
            self.facts_emitted.load(Ordering::Relaxed),
        )
    }
}

pub type SharedMetrics = Arc<EngineMetrics>;
