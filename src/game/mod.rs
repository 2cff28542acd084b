//! Game simulation modules

pub mod engine;
pub mod r#match;
pub mod physics;
pub mod registry;
pub mod scheduler;
pub mod snapshot;

pub use engine::{EngineSettings, MatchEngine, RegisterError};
pub use r#match::{valid_score_limit, MatchStatus};
pub use registry::MatchEntry;

/// Match identifier, as assigned by match-creation logic
pub type MatchId = i64;
