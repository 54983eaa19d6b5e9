use crate::resolution::Phase;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Whitelist lookup error: {0}")]
    WhitelistLookup(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Upstream generation error: {0}")]
    UpstreamGeneration(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("{phase} stage timed out after {elapsed_ms}ms")]
    Timeout { phase: Phase, elapsed_ms: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ResolveError>;
