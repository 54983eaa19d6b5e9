//! The record threaded through one resolution run.

use crate::catalog::DatasetRef;
use crate::error::ResolveError;
use crate::execution::QueryResult;
use crate::mapping::FieldMapping;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Pipeline stages in execution order, plus the terminal `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Mapping,
    Parsing,
    Correction,
    Transition,
    Execution,
    ResultAnalysis,
    Done,
    Failed,
}

impl Phase {
    pub const ORDER: [Phase; 7] = [
        Phase::Mapping,
        Phase::Parsing,
        Phase::Correction,
        Phase::Transition,
        Phase::Execution,
        Phase::ResultAnalysis,
        Phase::Done,
    ];

    /// Stage that follows this one; `None` once terminal.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Mapping => Some(Phase::Parsing),
            Phase::Parsing => Some(Phase::Correction),
            Phase::Correction => Some(Phase::Transition),
            Phase::Transition => Some(Phase::Execution),
            Phase::Execution => Some(Phase::ResultAnalysis),
            Phase::ResultAnalysis => Some(Phase::Done),
            Phase::Done | Phase::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Mapping => "Mapping",
            Phase::Parsing => "Parsing",
            Phase::Correction => "Correction",
            Phase::Transition => "Transition",
            Phase::Execution => "Execution",
            Phase::ResultAnalysis => "ResultAnalysis",
            Phase::Done => "Done",
            Phase::Failed => "Failed",
        }
    }

    /// Whether a run that stopped in `self` got as far as `stage`.
    pub fn reached(self, stage: Phase) -> bool {
        let rank = |p: Phase| Phase::ORDER.iter().position(|o| *o == p);
        match (rank(self), rank(stage)) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recoverable conditions; the run continues with less information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionWarning {
    /// No phrase in the query mapped to a dataset field
    NoConfidentMapping,
    /// An alias or the dataset name was not found in the drafted SQL
    SubstitutionAmbiguity { token: String },
}

impl fmt::Display for ResolutionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionWarning::NoConfidentMapping => {
                f.write_str("no query phrase mapped to a dataset field")
            }
            ResolutionWarning::SubstitutionAmbiguity { token } => {
                write!(f, "could not locate '{}' in the drafted SQL", token)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub row_count: usize,
    pub columns: Vec<String>,
}

impl ResultSummary {
    pub fn of(result: &QueryResult) -> Self {
        Self {
            row_count: result.row_count,
            columns: result.columns.clone(),
        }
    }
}

/// State of one run. Each stage takes it by value and hands back the next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionState {
    pub run_id: Uuid,
    pub query: String,
    pub chat_id: i64,
    pub dataset_id: i64,
    pub dataset_name: String,
    pub mapping: FieldMapping,
    pub draft_sql: Option<String>,
    pub corrected_sql: Option<String>,
    pub physical_sql: Option<String>,
    pub current_phase: Phase,
    /// Every phase entered, in order
    pub phase_history: Vec<Phase>,
    pub failed_at: Option<Phase>,
    pub error: Option<String>,
    pub warnings: Vec<ResolutionWarning>,
    pub result_info: Option<QueryResult>,
    pub summary: Option<ResultSummary>,
}

impl ResolutionState {
    pub fn new(query: &str, chat_id: i64, dataset: &DatasetRef) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            query: query.to_string(),
            chat_id,
            dataset_id: dataset.id,
            dataset_name: dataset.name.clone(),
            mapping: FieldMapping::new(),
            draft_sql: None,
            corrected_sql: None,
            physical_sql: None,
            current_phase: Phase::Mapping,
            phase_history: vec![Phase::Mapping],
            failed_at: None,
            error: None,
            warnings: Vec::new(),
            result_info: None,
            summary: None,
        }
    }

    /// Move to the next stage. Terminal states stay where they are.
    pub fn advance(mut self) -> Self {
        if let Some(next) = self.current_phase.next() {
            self.current_phase = next;
            self.phase_history.push(next);
        }
        self
    }

    /// Stop the run in the current stage with `error`.
    pub fn fail(mut self, error: &ResolveError) -> Self {
        if self.current_phase.is_terminal() {
            return self;
        }
        self.failed_at = Some(self.current_phase);
        self.error = Some(error.to_string());
        self.current_phase = Phase::Failed;
        self.phase_history.push(Phase::Failed);
        self
    }

    pub fn is_failed(&self) -> bool {
        self.current_phase == Phase::Failed
    }

    pub fn warn(&mut self, warning: ResolutionWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    /// Where the run stopped: the failing stage, or the current phase.
    pub fn stopped_at(&self) -> Phase {
        self.failed_at.unwrap_or(self.current_phase)
    }

    /// Latest oracle SQL: the corrected one when correction ran.
    pub fn generated_sql(&self) -> Option<&str> {
        self.corrected_sql.as_deref().or(self.draft_sql.as_deref())
    }
}
