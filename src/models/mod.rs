//! Core data types for the routing and synthesis pipeline.

mod assessment;
mod context;
mod query;
mod run;

pub use assessment::{ConfidenceInterval, DifficultyAssessment, Tier};
pub use context::{ContextItem, ContextItemId, RetrievedItem};
pub use query::QueryRequest;
pub use run::{RunMetadata, RunResult, StageTiming};
