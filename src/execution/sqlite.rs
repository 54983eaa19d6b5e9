//! SQLite executor.
//!
//! Handy for local catalogs and tests; physical tables live in the same
//! SQLite file the executor opens.

use crate::error::{ResolveError, Result};
use crate::execution::result::{QueryResult, Row};
use crate::execution::QueryExecutor;
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{info, warn};

/// Queries run on the blocking pool. When the caller stops waiting (stage
/// timeout) the statement still holding the connection is interrupted.
#[derive(Clone)]
pub struct SqliteExecutor {
    db: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    max_rows: Option<usize>,
}

fn execution_err(e: rusqlite::Error) -> ResolveError {
    ResolveError::Execution(e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Queued,
    Running,
    Finished,
    Abandoned,
}

fn lock_slot(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owned by the awaiting future. Dropping it before the query finished
/// cancels the query: a queued one never starts, a running one is
/// interrupted.
struct CancelOnDrop {
    slot: Arc<Mutex<Slot>>,
    interrupt: Arc<InterruptHandle>,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        let mut slot = lock_slot(&self.slot);
        match *slot {
            Slot::Queued => *slot = Slot::Abandoned,
            Slot::Running => {
                // slot lock held: the connection is still running our statement
                self.interrupt.interrupt();
                *slot = Slot::Abandoned;
                warn!("abandoned query interrupted");
            }
            Slot::Finished | Slot::Abandoned => {}
        }
    }
}

impl SqliteExecutor {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(execution_err)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(execution_err)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Self {
            db: Arc::new(Mutex::new(conn)),
            interrupt,
            max_rows: None,
        }
    }

    /// Keep at most `limit` rows in results; `row_count` still reports the total.
    pub fn with_max_rows(mut self, limit: usize) -> Self {
        self.max_rows = Some(limit);
        self
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| ResolveError::Execution("executor connection lock poisoned".to_string()))
    }

    /// Run setup statements (DDL, fixture inserts).
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn()?.execute_batch(sql).map_err(execution_err)
    }

    /// Blocking body of [`QueryExecutor::execute`]. The slot flips to
    /// `Finished` before the connection is released.
    fn run(&self, sql: &str, slot: &Mutex<Slot>) -> Result<QueryResult> {
        let db = self.conn()?;
        {
            let mut state = lock_slot(slot);
            if *state == Slot::Abandoned {
                return Err(ResolveError::Execution(
                    "query abandoned before it started".to_string(),
                ));
            }
            *state = Slot::Running;
        }

        let outcome = self.query(&db, sql);
        *lock_slot(slot) = Slot::Finished;
        drop(db);
        outcome
    }

    fn query(&self, db: &Connection, sql: &str) -> Result<QueryResult> {
        let started = Instant::now();
        let mut stmt = db.prepare(sql).map_err(execution_err)?;
        let columns = unique_names(stmt.column_names());

        let mut rows = stmt.query([]).map_err(execution_err)?;
        let mut out: Vec<Row> = Vec::new();
        let mut total = 0usize;
        while let Some(row) = rows.next().map_err(execution_err)? {
            total += 1;
            if self.max_rows.is_some_and(|limit| out.len() >= limit) {
                continue;
            }
            let mut record = Row::new();
            for (idx, name) in columns.iter().enumerate() {
                let value = row.get_ref(idx).map_err(execution_err)?;
                record.insert(name.clone(), to_json(value));
            }
            out.push(record);
        }

        let elapsed = started.elapsed().as_millis() as u64;
        let mut result = QueryResult::new(columns, out, self.name(), elapsed);
        if total > result.rows.len() {
            warn!(total, kept = result.rows.len(), "result truncated");
            result
                .warnings
                .push(format!("{} of {} rows returned", result.rows.len(), total));
        }
        result.row_count = total;
        Ok(result)
    }
}

/// Column names as row keys. A repeated name gets `_2`, `_3`, ... so
/// `SELECT a.id, b.id` keeps both values.
fn unique_names(names: Vec<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let mut candidate = name.to_string();
        let mut n = 1;
        while out.contains(&candidate) {
            n += 1;
            candidate = format!("{}_{}", name, n);
        }
        out.push(candidate);
    }
    out
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => {
            serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Blob(bytes) => {
            serde_json::Value::String(bytes.iter().map(|b| format!("{:02x}", b)).collect())
        }
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn execute(&self, sql: &str) -> Result<QueryResult> {
        let slot = Arc::new(Mutex::new(Slot::Queued));
        let _cancel = CancelOnDrop {
            slot: Arc::clone(&slot),
            interrupt: Arc::clone(&self.interrupt),
        };

        let executor = self.clone();
        let sql = sql.to_string();
        let result = tokio::task::spawn_blocking(move || executor.run(&sql, &slot))
            .await
            .map_err(|e| ResolveError::Execution(format!("query task failed: {}", e)))??;

        info!(
            engine = self.name(),
            rows = result.row_count,
            elapsed_ms = result.execution_time_ms,
            "query executed"
        );
        Ok(result)
    }
}
