//! SQL drafting and correction through the language-model oracle.
//!
//! Both stages describe the mapped fields to the oracle in a compact schema
//! line, ask it for SQL, and clean the reply down to a single statement.
//! The SQL they produce still uses business aliases in backticks and the
//! dataset name as its table; [`crate::transition`] makes it physical.

use crate::config::SchemaSettings;
use crate::error::{ResolveError, Result};
use crate::llm::{OracleRequest, SqlOracle, TPV_EXAMPLE};
use crate::mapping::FieldMapping;
use chrono::NaiveDate;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use std::sync::Arc;
use tracing::{debug, warn};

lazy_static! {
    static ref THINK_BLOCK: Regex = Regex::new(r"(?is)<think>.*?</think>").unwrap();
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)```").unwrap();
    static ref SQL_LABEL: Regex = Regex::new(r"(?i)^sql\s*:\s*").unwrap();
    static ref SQL_START: Regex = Regex::new(r"(?i)^(select|with)\b").unwrap();
}

/// Render the one-line schema description handed to the oracle:
///
/// `Table=[<dataset>],PartitionTimeField=[],Metrics=[a,b],Dimensions=[c,d]`
///
/// Dimensions whose alias ends in a time suffix get a ` Format <fmt>` hint.
pub fn schema_description(
    dataset_name: &str,
    mapping: &FieldMapping,
    settings: &SchemaSettings,
) -> String {
    let metrics = mapping.metrics().map(|(alias, _)| alias).join(",");
    let dimensions = mapping
        .dimensions()
        .map(|(alias, _)| {
            if is_time_alias(alias, &settings.time_suffixes) {
                format!("{} Format {}", alias, settings.time_format)
            } else {
                alias.to_string()
            }
        })
        .join(",");

    format!(
        "Table=[{}],PartitionTimeField=[],Metrics=[{}],Dimensions=[{}]",
        dataset_name, metrics, dimensions
    )
}

fn is_time_alias(alias: &str, suffixes: &[String]) -> bool {
    suffixes.iter().any(|suffix| alias.ends_with(suffix.as_str()))
}

/// Reduce raw oracle output to one SQL statement.
///
/// Drops `<think>` blocks, unwraps the first markdown code fence and a
/// leading `SQL:` label. What is left must start with `SELECT` or `WITH`.
pub fn extract_sql(raw: &str) -> Result<String> {
    let mut text = THINK_BLOCK.replace_all(raw, "").into_owned();
    // streamed reasoning output may lose the opening tag
    if let Some(pos) = text.rfind("</think>") {
        text = text[pos + "</think>".len()..].to_string();
    }
    if let Some(inner) = CODE_FENCE.captures(&text).and_then(|c| c.get(1)) {
        text = inner.as_str().to_string();
    }
    let text = SQL_LABEL.replace(text.trim(), "").trim().to_string();

    if text.is_empty() {
        return Err(ResolveError::UpstreamGeneration(
            "oracle returned no SQL".to_string(),
        ));
    }
    if !SQL_START.is_match(&text) {
        let preview: String = text.chars().take(80).collect();
        return Err(ResolveError::UpstreamGeneration(format!(
            "oracle reply is not a query: {}",
            preview
        )));
    }
    Ok(text)
}

/// Parse `sql` as MySQL and return the parser's complaint, if any.
pub fn syntax_issue(sql: &str) -> Option<String> {
    Parser::parse_sql(&MySqlDialect {}, sql)
        .err()
        .map(|e| e.to_string())
}

async fn ask_oracle(oracle: &dyn SqlOracle, request: &OracleRequest) -> Result<String> {
    let raw = oracle.complete(request).await.map_err(|e| match e {
        ResolveError::UpstreamGeneration(_) => e,
        other => ResolveError::UpstreamGeneration(other.to_string()),
    })?;
    let sql = extract_sql(&raw)?;

    if let Some(issue) = syntax_issue(&sql) {
        warn!(template = ?request.template, %issue, "oracle SQL did not parse, passing it on");
    }
    debug!(template = ?request.template, %sql, "oracle SQL");
    Ok(sql)
}

fn current_date(fixed: Option<NaiveDate>) -> String {
    fixed
        .unwrap_or_else(|| chrono::Local::now().date_naive())
        .format("%Y-%m-%d")
        .to_string()
}

/// Produces the first SQL draft for a question.
pub struct SqlDrafter {
    oracle: Arc<dyn SqlOracle>,
    schema: SchemaSettings,
    examples: Vec<String>,
    today: Option<NaiveDate>,
}

impl SqlDrafter {
    pub fn new(oracle: Arc<dyn SqlOracle>, schema: SchemaSettings) -> Self {
        Self {
            oracle,
            schema,
            examples: vec![TPV_EXAMPLE.to_string()],
            today: None,
        }
    }

    pub fn with_examples(mut self, examples: Vec<String>) -> Self {
        self.examples = examples;
        self
    }

    /// Pin the date the prompt reports as current.
    pub fn with_current_date(mut self, date: NaiveDate) -> Self {
        self.today = Some(date);
        self
    }

    pub async fn draft(
        &self,
        query: &str,
        dataset_name: &str,
        mapping: &FieldMapping,
    ) -> Result<String> {
        let schema = schema_description(dataset_name, mapping, &self.schema);
        let request = OracleRequest::draft(query, &schema, &current_date(self.today))
            .with_examples(self.examples.clone());
        ask_oracle(self.oracle.as_ref(), &request).await
    }
}

/// Reviews a draft; the oracle may hand it back unchanged.
pub struct SqlCorrector {
    oracle: Arc<dyn SqlOracle>,
    schema: SchemaSettings,
    today: Option<NaiveDate>,
}

impl SqlCorrector {
    pub fn new(oracle: Arc<dyn SqlOracle>, schema: SchemaSettings) -> Self {
        Self {
            oracle,
            schema,
            today: None,
        }
    }

    pub fn with_current_date(mut self, date: NaiveDate) -> Self {
        self.today = Some(date);
        self
    }

    pub async fn correct(
        &self,
        query: &str,
        dataset_name: &str,
        mapping: &FieldMapping,
        draft_sql: &str,
    ) -> Result<String> {
        let schema = schema_description(dataset_name, mapping, &self.schema);
        let request = OracleRequest::correct(query, &schema, &current_date(self.today), draft_sql);
        ask_oracle(self.oracle.as_ref(), &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldKind, FieldRef};
    use crate::llm::PromptKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recorder {
        reply: Result<String>,
        seen: Mutex<Vec<OracleRequest>>,
    }

    impl Recorder {
        fn replying(reply: Result<String>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SqlOracle for Recorder {
        async fn complete(&self, request: &OracleRequest) -> Result<String> {
            self.seen.lock().unwrap().push(request.clone());
            match &self.reply {
                Ok(sql) => Ok(sql.clone()),
                Err(e) => Err(ResolveError::Execution(e.to_string())),
            }
        }
    }

    fn scenario_mapping() -> FieldMapping {
        [
            ("tpv".to_string(), FieldRef::new(1, 2, FieldKind::Metric)),
            ("transaction time".to_string(), FieldRef::new(1, 3, FieldKind::Dimension)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_schema_description_format() {
        let schema = schema_description("transaction", &scenario_mapping(), &SchemaSettings::default());
        assert_eq!(
            schema,
            "Table=[transaction],PartitionTimeField=[],Metrics=[tpv],\
             Dimensions=[transaction time Format yyyy-MM-dd 00:00:00]"
        );

        let empty = schema_description("transaction", &FieldMapping::new(), &SchemaSettings::default());
        assert_eq!(empty, "Table=[transaction],PartitionTimeField=[],Metrics=[],Dimensions=[]");
    }

    #[test]
    fn test_extract_sql_cleanup() {
        let raw = "<think>the user wants tpv</think>\n```sql\nselect sum(`tpv`) from transaction\n```";
        assert_eq!(extract_sql(raw).unwrap(), "select sum(`tpv`) from transaction");

        assert_eq!(extract_sql("SQL: SELECT 1").unwrap(), "SELECT 1");
        assert_eq!(
            extract_sql("reasoning without opening tag</think>WITH t AS (SELECT 1) SELECT * FROM t").unwrap(),
            "WITH t AS (SELECT 1) SELECT * FROM t"
        );
    }

    #[test]
    fn test_extract_sql_rejects_non_queries() {
        assert!(matches!(extract_sql("   "), Err(ResolveError::UpstreamGeneration(_))));
        assert!(matches!(extract_sql("<think>hmm</think>"), Err(ResolveError::UpstreamGeneration(_))));
        assert!(matches!(
            extract_sql("Sorry, I cannot help with that."),
            Err(ResolveError::UpstreamGeneration(_))
        ));
        assert!(matches!(extract_sql("DROP TABLE transaction"), Err(ResolveError::UpstreamGeneration(_))));
    }

    #[test]
    fn test_syntax_issue_accepts_backticked_aliases() {
        assert!(syntax_issue("select sum(`total tpv`) from transaction where `transaction time` >= '2024-01-01'").is_none());
        assert!(syntax_issue("select sum(`tpv` from transaction").is_some());
    }

    #[tokio::test]
    async fn test_drafter_sends_schema_and_date() {
        let oracle = Recorder::replying(Ok("select sum(`tpv`) from transaction".to_string()));
        let drafter = SqlDrafter::new(oracle.clone(), SchemaSettings::default())
            .with_current_date(NaiveDate::from_ymd_opt(2025, 6, 5).unwrap());

        let sql = drafter
            .draft("show me total tpv", "transaction", &scenario_mapping())
            .await
            .unwrap();
        assert_eq!(sql, "select sum(`tpv`) from transaction");

        let seen = oracle.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].template, PromptKind::Draft);
        assert_eq!(seen[0].current_date, "2025-06-05");
        assert!(seen[0].schema.contains("Metrics=[tpv]"));
        assert_eq!(seen[0].examples, vec![TPV_EXAMPLE.to_string()]);
    }

    #[tokio::test]
    async fn test_corrector_passes_draft_and_maps_failures() {
        let oracle = Recorder::replying(Ok("select sum(`tpv`) from transaction".to_string()));
        let corrector = SqlCorrector::new(oracle.clone(), SchemaSettings::default());
        corrector
            .correct("q", "transaction", &scenario_mapping(), "select `tpv` from transaction")
            .await
            .unwrap();
        assert_eq!(
            oracle.seen.lock().unwrap()[0].prior_sql.as_deref(),
            Some("select `tpv` from transaction")
        );

        let failing = Recorder::replying(Err(ResolveError::Execution("connection refused".to_string())));
        let err = SqlCorrector::new(failing, SchemaSettings::default())
            .correct("q", "transaction", &scenario_mapping(), "select 1")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::UpstreamGeneration(ref msg) if msg.contains("connection refused")));
    }
}
