//! Rows handed back by an executor.

use serde::{Deserialize, Serialize};

/// One result row keyed by column name, in select-list order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Rows returned by a [`super::QueryExecutor`], column order preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in select-list order, repeated names suffixed `_2`, `_3`, ...
    pub columns: Vec<String>,

    pub rows: Vec<Row>,

    /// Rows produced by the query, before any truncation
    pub row_count: usize,

    pub execution_time_ms: u64,

    /// Executor that ran the query
    pub engine_name: String,

    /// Non-fatal issues
    pub warnings: Vec<String>,
}

impl QueryResult {
    pub fn new(
        columns: Vec<String>,
        rows: Vec<Row>,
        engine_name: &str,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            row_count: rows.len(),
            columns,
            rows,
            execution_time_ms,
            engine_name: engine_name.to_string(),
            warnings: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, in row order.
    pub fn column_values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a serde_json::Value> {
        self.rows.iter().filter_map(move |row| row.get(column))
    }
}
