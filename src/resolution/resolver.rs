use crate::catalog::{CatalogStore, DatasetRef};
use crate::config::Settings;
use crate::error::{ResolveError, Result};
use crate::execution::result::Row;
use crate::execution::QueryExecutor;
use crate::llm::SqlOracle;
use crate::mapping::FieldMapping;
use crate::phrase::{PhraseIndex, SharedPhraseIndex, SimpleTokenizer, Tokenizer};
use crate::resolution::pipeline::ResolutionPipeline;
use crate::resolution::state::{Phase, ResolutionState, ResolutionWarning, ResultSummary};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// What the request layer gets back for one chat question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatQueryResponse {
    pub run_id: Uuid,
    /// Physical SQL; only present for runs that did not fail
    pub sql: Option<String>,
    pub rows: Vec<Row>,
    /// Where the run stopped
    pub phase: Phase,
    pub error: Option<String>,
    pub warnings: Vec<ResolutionWarning>,
    pub mapping: FieldMapping,
    pub summary: Option<ResultSummary>,
}

impl From<ResolutionState> for ChatQueryResponse {
    fn from(state: ResolutionState) -> Self {
        let phase = state.stopped_at();
        let failed = state.is_failed();
        let sql = if !failed && phase.reached(Phase::Execution) {
            state.physical_sql
        } else {
            None
        };
        let rows = match state.result_info {
            Some(result) if !failed => result.rows,
            _ => Vec::new(),
        };

        Self {
            run_id: state.run_id,
            sql,
            rows,
            phase,
            error: state.error,
            warnings: state.warnings,
            mapping: state.mapping,
            summary: if failed { None } else { state.summary },
        }
    }
}

/// Entry point: owns the shared phrase index and the pipeline, and answers
/// chat questions against whichever dataset the chat is bound to.
pub struct ChatResolver {
    catalog: Arc<dyn CatalogStore>,
    index: Arc<SharedPhraseIndex>,
    tokenizer: Arc<dyn Tokenizer>,
    pipeline: ResolutionPipeline,
    settings: Settings,
}

impl ChatResolver {
    /// Build the phrase index from the catalog with the default tokenizer.
    pub async fn bootstrap(
        catalog: Arc<dyn CatalogStore>,
        oracle: Arc<dyn SqlOracle>,
        executor: Arc<dyn QueryExecutor>,
        settings: Settings,
    ) -> Result<Self> {
        Self::bootstrap_with(catalog, Arc::new(SimpleTokenizer), oracle, executor, settings).await
    }

    pub async fn bootstrap_with(
        catalog: Arc<dyn CatalogStore>,
        tokenizer: Arc<dyn Tokenizer>,
        oracle: Arc<dyn SqlOracle>,
        executor: Arc<dyn QueryExecutor>,
        settings: Settings,
    ) -> Result<Self> {
        settings.validate()?;

        let index = Arc::new(SharedPhraseIndex::new(PhraseIndex::new(
            settings.matching.metric,
        )));
        let phrases = index.rebuild(catalog.as_ref(), tokenizer.as_ref()).await?;
        info!(phrases, metric = ?settings.matching.metric, "chat resolver ready");

        let pipeline = ResolutionPipeline::new(
            Arc::clone(&catalog),
            Arc::clone(&tokenizer),
            oracle,
            executor,
            &settings,
        );

        Ok(Self {
            catalog,
            index,
            tokenizer,
            pipeline,
            settings,
        })
    }

    /// Swap in a replacement pipeline, e.g. one with a pinned current date.
    pub fn with_pipeline(mut self, pipeline: ResolutionPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Reload every phrase from the catalog. Runs already in flight keep the
    /// index they started with.
    pub async fn rebuild_index(&self) -> Result<usize> {
        self.index
            .rebuild(self.catalog.as_ref(), self.tokenizer.as_ref())
            .await
    }

    pub fn index(&self) -> &Arc<SharedPhraseIndex> {
        &self.index
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn resolve_chat_query(&self, query_text: &str, chat_id: i64) -> ChatQueryResponse {
        self.resolve_state(query_text, chat_id).await.into()
    }

    /// Same as [`Self::resolve_chat_query`] but hands back the whole run record.
    pub async fn resolve_state(&self, query_text: &str, chat_id: i64) -> ResolutionState {
        let dataset = self
            .pipeline
            .bounded(Phase::Mapping, self.catalog.dataset_for_chat(chat_id))
            .await;

        let dataset = match dataset {
            Ok(Some(dataset)) => dataset,
            Ok(None) => {
                let error = ResolveError::WhitelistLookup(format!(
                    "no dataset is bound to chat {}",
                    chat_id
                ));
                return Self::unresolved(query_text, chat_id, &error);
            }
            Err(ResolveError::Catalog(msg)) => {
                return Self::unresolved(query_text, chat_id, &ResolveError::WhitelistLookup(msg));
            }
            Err(e) => return Self::unresolved(query_text, chat_id, &e),
        };

        let snapshot = self.index.snapshot();
        let state = ResolutionState::new(query_text, chat_id, &dataset);
        self.pipeline.run(state, &snapshot).await
    }

    fn unresolved(query_text: &str, chat_id: i64, error: &ResolveError) -> ResolutionState {
        warn!(chat_id, %error, "chat has no dataset");
        let placeholder = DatasetRef {
            id: 0,
            name: String::new(),
        };
        ResolutionState::new(query_text, chat_id, &placeholder).fail(error)
    }
}
