pub mod chores;
pub mod config;
pub mod events;
pub mod metrics;
pub mod recurrence;

// Re-export the engine surface so main.rs and integration tests can use
// chored::ChoreEngine directly.
pub use chores::boundary::{run_boundary_ticker, BoundaryReport};
pub use chores::engine::{ChoreEngine, EngineError, SharedEngine};
pub use chores::resolver::{AggregateState, LifecycleState, ResolvedState};
pub use chores::schema::{ChoreSpec, ChoresFile};
pub use chores::store::{CheckpointStore, MemoryStore};
pub use config::EngineConfig;
pub use events::{Fact, FactBus, FactKind};
pub use metrics::{EngineMetrics, SharedMetrics};
