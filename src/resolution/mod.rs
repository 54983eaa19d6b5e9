//! Question-to-SQL resolution runs.

pub mod pipeline;
pub mod resolver;
pub mod state;

pub use pipeline::ResolutionPipeline;
pub use resolver::{ChatQueryResponse, ChatResolver};
pub use state::{Phase, ResolutionState, ResolutionWarning, ResultSummary};
