//! Execution of physical SQL.

pub mod result;
pub mod sqlite;

pub use result::QueryResult;
pub use sqlite::SqliteExecutor;

use crate::error::Result;
use async_trait::async_trait;

/// Runs physical SQL against a data store.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Execute `sql` and materialize every returned row.
    async fn execute(&self, sql: &str) -> Result<QueryResult>;
}
