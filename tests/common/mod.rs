#![allow(dead_code)]

use async_trait::async_trait;
use chat2sql::catalog::SqliteCatalog;
use chat2sql::config::Settings;
use chat2sql::error::{ResolveError, Result};
use chat2sql::execution::SqliteExecutor;
use chat2sql::llm::{OracleRequest, PromptKind, SqlOracle};
use chat2sql::resolution::ChatResolver;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SCENARIO_QUERY: &str = "show me total tpv in 2024 of transaction time";

pub const SCENARIO_DRAFT: &str = "select sum(`tpv`) from transaction \
where `transaction time` >= '2024-01-01 00:00:00' AND `transaction time` <= '2024-12-31 23:59:59'";

pub const SCENARIO_PHYSICAL: &str = "select sum(tpv_table.tpv_col) from tpv_table \
where tpv_table.txn_time_col >= '2024-01-01 00:00:00' AND tpv_table.txn_time_col <= '2024-12-31 23:59:59'";

/// Model 1 `tpv_table` with metric `tpv` and dimension `transaction time`,
/// exposed as dataset 7 "transaction" through chat 1.
pub fn scenario_catalog() -> Arc<SqliteCatalog> {
    let catalog = SqliteCatalog::open_in_memory().unwrap();
    catalog.insert_model(1, "payments", "tpv_table").unwrap();
    catalog.insert_metric(2, 1, "tpv_col", "tpv").unwrap();
    catalog
        .insert_dimension(3, 1, "txn_time_col", "transaction time", Some("time"), None)
        .unwrap();
    catalog.insert_term(9, "gross volume", "gmv").unwrap();
    catalog.insert_dataset(7, "transaction").unwrap();
    catalog.link_dataset_metric(7, 2).unwrap();
    catalog.link_dataset_dimension(7, 3).unwrap();
    catalog.link_chat_dataset(1, 11, 7).unwrap();
    Arc::new(catalog)
}

pub fn scenario_executor() -> Arc<SqliteExecutor> {
    let executor = SqliteExecutor::open_in_memory().unwrap();
    executor
        .execute_batch(
            "CREATE TABLE tpv_table (tpv_col REAL, txn_time_col TEXT);
             INSERT INTO tpv_table VALUES (10.5, '2024-03-01 00:00:00');
             INSERT INTO tpv_table VALUES (4.5, '2024-07-01 00:00:00');
             INSERT INTO tpv_table VALUES (1.0, '2023-01-01 00:00:00');",
        )
        .unwrap();
    Arc::new(executor)
}

enum Reply {
    Sql(String),
    Fail(String),
}

/// Oracle stand-in with one canned reply per prompt kind.
pub struct ScriptedOracle {
    draft: Reply,
    correct: Reply,
    delay: Option<Duration>,
    calls: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new(draft: &str, correct: &str) -> Arc<Self> {
        Arc::new(Self {
            draft: Reply::Sql(draft.to_string()),
            correct: Reply::Sql(correct.to_string()),
            delay: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Correction hands the draft back unchanged.
    pub fn echoing(sql: &str) -> Arc<Self> {
        Self::new(sql, sql)
    }

    pub fn failing_draft(message: &str) -> Arc<Self> {
        Arc::new(Self {
            draft: Reply::Fail(message.to_string()),
            correct: Reply::Fail(message.to_string()),
            delay: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn slow(sql: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            draft: Reply::Sql(sql.to_string()),
            correct: Reply::Sql(sql.to_string()),
            delay: Some(delay),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<OracleRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqlOracle for ScriptedOracle {
    async fn complete(&self, request: &OracleRequest) -> Result<String> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = match request.template {
            PromptKind::Draft => &self.draft,
            PromptKind::Correct => &self.correct,
        };
        match reply {
            Reply::Sql(sql) => Ok(sql.clone()),
            Reply::Fail(message) => Err(ResolveError::UpstreamGeneration(message.clone())),
        }
    }
}

pub async fn resolver(
    catalog: Arc<SqliteCatalog>,
    oracle: Arc<ScriptedOracle>,
    executor: Arc<SqliteExecutor>,
) -> ChatResolver {
    resolver_with(catalog, oracle, executor, Settings::default()).await
}

pub async fn resolver_with(
    catalog: Arc<SqliteCatalog>,
    oracle: Arc<ScriptedOracle>,
    executor: Arc<SqliteExecutor>,
    settings: Settings,
) -> ChatResolver {
    ChatResolver::bootstrap(catalog, oracle, executor, settings)
        .await
        .unwrap()
}
