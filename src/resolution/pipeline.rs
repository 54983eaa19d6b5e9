//! Resolution Pipeline
//!
//! Linear stage chain: Mapping → Parsing → Correction → Transition →
//! Execution → ResultAnalysis → Done. A failing stage moves the run to
//! `Failed` and nothing after it runs.

use crate::catalog::CatalogStore;
use crate::config::Settings;
use crate::drafting::{SqlCorrector, SqlDrafter};
use crate::error::{ResolveError, Result};
use crate::execution::QueryExecutor;
use crate::llm::SqlOracle;
use crate::mapping::FieldMapper;
use crate::phrase::{PhraseIndex, PhraseMatcher, Tokenizer};
use crate::resolution::state::{Phase, ResolutionState, ResolutionWarning, ResultSummary};
use crate::transition::SemanticTransitionResolver;
use chrono::NaiveDate;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, info_span, warn, Instrument};

pub struct ResolutionPipeline {
    catalog: Arc<dyn CatalogStore>,
    tokenizer: Arc<dyn Tokenizer>,
    mapper: FieldMapper,
    drafter: SqlDrafter,
    corrector: SqlCorrector,
    transition: SemanticTransitionResolver,
    executor: Arc<dyn QueryExecutor>,
    stage_timeout: Duration,
}

impl ResolutionPipeline {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        tokenizer: Arc<dyn Tokenizer>,
        oracle: Arc<dyn SqlOracle>,
        executor: Arc<dyn QueryExecutor>,
        settings: &Settings,
    ) -> Self {
        Self {
            mapper: FieldMapper::new(settings.matching.threshold),
            drafter: SqlDrafter::new(Arc::clone(&oracle), settings.schema.clone()),
            corrector: SqlCorrector::new(oracle, settings.schema.clone()),
            transition: SemanticTransitionResolver::new(Arc::clone(&catalog)),
            catalog,
            tokenizer,
            executor,
            stage_timeout: settings.pipeline.stage_timeout(),
        }
    }

    /// Fix the date both oracle prompts report as today.
    pub fn with_current_date(mut self, date: NaiveDate) -> Self {
        self.drafter = self.drafter.with_current_date(date);
        self.corrector = self.corrector.with_current_date(date);
        self
    }

    pub fn with_examples(mut self, examples: Vec<String>) -> Self {
        self.drafter = self.drafter.with_examples(examples);
        self
    }

    /// Drive `state` from its current phase to `Done` or `Failed`.
    pub async fn run(&self, state: ResolutionState, index: &PhraseIndex) -> ResolutionState {
        let span = info_span!(
            "resolve",
            run_id = %state.run_id,
            chat_id = state.chat_id,
            dataset_id = state.dataset_id
        );

        async move {
            let started = Instant::now();
            let mut state = state;
            while !state.current_phase.is_terminal() {
                state = self.step(state, index).await;
            }

            match &state.error {
                None => info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    warnings = state.warnings.len(),
                    "resolution done"
                ),
                Some(error) => warn!(
                    phase = %state.stopped_at(),
                    %error,
                    "resolution failed"
                ),
            }
            state
        }
        .instrument(span)
        .await
    }

    /// Run the current stage once and move to the next phase, or to `Failed`.
    pub async fn step(&self, mut state: ResolutionState, index: &PhraseIndex) -> ResolutionState {
        let phase = state.current_phase;
        let started = Instant::now();

        let outcome = match phase {
            Phase::Mapping => self.map_terms(&mut state, index).await,
            Phase::Parsing => self.draft(&mut state).await,
            Phase::Correction => self.correct(&mut state).await,
            Phase::Transition => self.make_physical(&mut state).await,
            Phase::Execution => self.execute(&mut state).await,
            Phase::ResultAnalysis => Self::analyze(&mut state),
            Phase::Done | Phase::Failed => return state,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => {
                info!(%phase, elapsed_ms, "stage complete");
                state.advance()
            }
            Err(e) => {
                warn!(%phase, elapsed_ms, error = %e, "stage failed");
                state.fail(&e)
            }
        }
    }

    /// Await `fut`, failing with [`ResolveError::Timeout`] past the stage budget.
    pub(crate) async fn bounded<T, F>(&self, phase: Phase, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        match tokio::time::timeout(self.stage_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ResolveError::Timeout {
                phase,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    async fn map_terms(&self, state: &mut ResolutionState, index: &PhraseIndex) -> Result<()> {
        let whitelist = self
            .bounded(Phase::Mapping, self.catalog.dataset_whitelist(state.dataset_id))
            .await
            .map_err(|e| match e {
                ResolveError::Catalog(msg) => ResolveError::WhitelistLookup(msg),
                other => other,
            })?;

        let candidates = PhraseMatcher::new(index, self.tokenizer.as_ref()).match_all(&state.query);
        let mapping = self.mapper.map_fields(&candidates, &whitelist);
        info!(
            candidates = candidates.len(),
            whitelisted = whitelist.len(),
            mapped = mapping.len(),
            "query terms mapped"
        );

        if mapping.is_empty() {
            state.warn(ResolutionWarning::NoConfidentMapping);
        }
        state.mapping = mapping;
        Ok(())
    }

    async fn draft(&self, state: &mut ResolutionState) -> Result<()> {
        let sql = self
            .bounded(
                Phase::Parsing,
                self.drafter
                    .draft(&state.query, &state.dataset_name, &state.mapping),
            )
            .await?;
        state.draft_sql = Some(sql);
        Ok(())
    }

    async fn correct(&self, state: &mut ResolutionState) -> Result<()> {
        let draft = state
            .draft_sql
            .as_deref()
            .ok_or_else(|| ResolveError::UpstreamGeneration("no draft SQL to correct".to_string()))?;
        let sql = self
            .bounded(
                Phase::Correction,
                self.corrector
                    .correct(&state.query, &state.dataset_name, &state.mapping, draft),
            )
            .await?;
        state.corrected_sql = Some(sql);
        Ok(())
    }

    async fn make_physical(&self, state: &mut ResolutionState) -> Result<()> {
        let transition = self
            .bounded(Phase::Transition, self.transition.resolve(state))
            .await?;
        for warning in transition.warnings {
            state.warn(warning);
        }
        state.physical_sql = Some(transition.physical_sql);
        Ok(())
    }

    async fn execute(&self, state: &mut ResolutionState) -> Result<()> {
        let sql = state
            .physical_sql
            .as_deref()
            .ok_or_else(|| ResolveError::Execution("no physical SQL to execute".to_string()))?;
        let result = self
            .bounded(Phase::Execution, self.executor.execute(sql))
            .await
            .map_err(|e| match e {
                ResolveError::Execution(_) | ResolveError::Timeout { .. } => e,
                other => ResolveError::Execution(other.to_string()),
            })?;
        state.result_info = Some(result);
        Ok(())
    }

    fn analyze(state: &mut ResolutionState) -> Result<()> {
        let result = state
            .result_info
            .as_ref()
            .ok_or_else(|| ResolveError::Execution("no result to analyze".to_string()))?;
        state.summary = Some(ResultSummary::of(result));
        Ok(())
    }
}
