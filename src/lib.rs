//! Natural-language analytics questions to physical SQL.
//!
//! Catalog phrases are matched inside the question, kept when they name a
//! field of the chat's dataset, and handed to a language-model oracle that
//! drafts and then reviews SQL over business aliases. The alias SQL is then
//! rewritten against physical tables and executed.

pub mod catalog;
pub mod config;
pub mod drafting;
pub mod error;
pub mod execution;
pub mod llm;
pub mod mapping;
pub mod phrase;
pub mod resolution;
pub mod telemetry;
pub mod transition;

pub use catalog::{CatalogStore, PgCatalog, SqliteCatalog};
pub use config::Settings;
pub use error::{ResolveError, Result};
pub use execution::{QueryExecutor, QueryResult, SqliteExecutor};
pub use llm::{LlmClient, SqlOracle};
pub use resolution::{ChatQueryResponse, ChatResolver, Phase, ResolutionPipeline, ResolutionState};
