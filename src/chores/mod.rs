pub mod boundary;
pub mod engine;
pub mod record;
pub mod resolver;
pub mod rotation;
pub mod schema;
pub mod store;
pub mod streak;

pub use engine::{ChoreEngine, EngineError, SharedEngine};
