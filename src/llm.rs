use crate::config::LlmSettings;
use crate::error::{ResolveError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const SYSTEM_PROMPT: &str =
    "You translate analytics questions into a single SQL statement. Reply with SQL only.";

const SHARED_RULES: &str = r#"1.SQL columns and values must be mentioned in the `Schema`, DO NOT hallucinate.
2.Quote every Metric and Dimension name from the `Schema` with backticks.
3.ALWAYS specify time range using `>`,`<`,`>=`,`<=` operator.
4.DO NOT include time range in the where clause if not explicitly expressed in the `Query`.
5.DO NOT calculate date range using functions.
6.ALWAYS use `with` statement if nested aggregation is needed.
7.ALWAYS enclose alias declared by `AS` command in underscores.
8.Alias created by `AS` command must be in the same language as the `Query`."#;

/// Canonical few-shot example for the drafting prompt.
pub const TPV_EXAMPLE: &str = "Query:show me the total tpv in 2024 of transaction time,\
Schema:Table=[transaction],PartitionTimeField=[],Metrics=[total tpv],\
Dimensions=[transaction time Format yyyy-MM-dd 00:00:00],ExtraInfo:CurrentDate=[2025-06-05],\
SQL:select sum(`total tpv`) from transaction where `transaction time` >= '2024-01-01 00:00:00' \
AND `transaction time` <= '2024-12-31 23:59:59'";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptKind {
    /// First SQL draft from the question
    Draft,
    /// Review of an earlier draft
    Correct,
}

/// Everything the oracle sees for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub template: PromptKind,
    pub query: String,
    pub schema: String,
    /// `YYYY-MM-DD`
    pub current_date: String,
    pub examples: Vec<String>,
    pub prior_sql: Option<String>,
}

impl OracleRequest {
    pub fn draft(query: &str, schema: &str, current_date: &str) -> Self {
        Self {
            template: PromptKind::Draft,
            query: query.to_string(),
            schema: schema.to_string(),
            current_date: current_date.to_string(),
            examples: Vec::new(),
            prior_sql: None,
        }
    }

    pub fn correct(query: &str, schema: &str, current_date: &str, prior_sql: &str) -> Self {
        Self {
            template: PromptKind::Correct,
            prior_sql: Some(prior_sql.to_string()),
            ..Self::draft(query, schema, current_date)
        }
    }

    pub fn with_examples(mut self, examples: Vec<String>) -> Self {
        self.examples = examples;
        self
    }

    /// Fill the instruction template for this request.
    pub fn render(&self) -> String {
        match self.template {
            PromptKind::Draft => format!(
                r#"#Role: You are a data engineer experienced in writing SQL languages.
#Task: You will be provided with a natural language query asked by users, please convert it to a SQL query string, don't use markdown format as a response.
#Rules:
{rules}
9.All columns mentioned in Metrics and Dimensions of the Schema must be included.
#Examples:
{examples}
#Query: {query}
Schema: {schema}
ExtraInfo:CurrentDate=[{current_date}]
"#,
                rules = SHARED_RULES,
                examples = self.examples.join("\n"),
                query = self.query,
                schema = self.schema,
                current_date = self.current_date,
            ),
            PromptKind::Correct => format!(
                r#"#Role: You are a senior data engineer experienced in writing SQL languages.
#Task: You will be provided with a natural language query asked by users and the SQL a junior data engineer wrote for it. Review the SQL and modify it if necessary. Return only the SQL, don't use markdown format.
#Rules:
{rules}
9.Fix the SQL if it has a syntax error according to standard MySQL syntax. Double check the syntax.
#Query: {query}
Schema: {schema}
ExtraInfo:CurrentDate=[{current_date}]
SQL: {sql}
"#,
                rules = SHARED_RULES,
                query = self.query,
                schema = self.schema,
                current_date = self.current_date,
                sql = self.prior_sql.as_deref().unwrap_or_default(),
            ),
        }
    }
}

/// Language-model oracle that turns a rendered request into SQL text.
#[async_trait]
pub trait SqlOracle: Send + Sync {
    async fn complete(&self, request: &OracleRequest) -> Result<String>;
}

/// OpenAI-compatible chat-completions client.
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| ResolveError::Config("OPENAI_API_KEY is not set".to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| ResolveError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call_llm(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ResolveError::UpstreamGeneration(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ResolveError::UpstreamGeneration(format!(
                "LLM API returned {}: {}",
                status, text
            )));
        }

        let response_json: serde_json::Value = response.json().await.map_err(|e| {
            ResolveError::UpstreamGeneration(format!("Failed to parse LLM response: {}", e))
        })?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ResolveError::UpstreamGeneration("No content in LLM response".to_string())
            })?;

        Ok(content.to_string())
    }
}

#[async_trait]
impl SqlOracle for LlmClient {
    async fn complete(&self, request: &OracleRequest) -> Result<String> {
        let prompt = request.render();
        debug!(template = ?request.template, prompt_chars = prompt.len(), "calling oracle");

        let started = Instant::now();
        let content = self.call_llm(&prompt).await?;
        info!(
            template = ?request.template,
            model = %self.model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "oracle responded"
        );
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = "Table=[transaction],PartitionTimeField=[],Metrics=[tpv],Dimensions=[]";

    #[test]
    fn test_draft_prompt_carries_inputs_and_examples() {
        let prompt = OracleRequest::draft("total tpv in 2024", SCHEMA, "2025-06-05")
            .with_examples(vec![TPV_EXAMPLE.to_string()])
            .render();

        assert!(prompt.contains("#Query: total tpv in 2024"));
        assert!(prompt.contains(&format!("Schema: {}", SCHEMA)));
        assert!(prompt.contains("CurrentDate=[2025-06-05]"));
        assert!(prompt.contains("select sum(`total tpv`) from transaction"));
        assert!(!prompt.contains("SQL: "));
    }

    #[test]
    fn test_correction_prompt_carries_prior_sql() {
        let request = OracleRequest::correct(
            "total tpv in 2024",
            SCHEMA,
            "2025-06-05",
            "select sum(`tpv`) from transaction",
        );
        assert_eq!(request.template, PromptKind::Correct);

        let prompt = request.render();
        assert!(prompt.contains("senior data engineer"));
        assert!(prompt.contains("SQL: select sum(`tpv`) from transaction"));
        assert!(!prompt.contains("#Examples:"));
    }

    #[test]
    fn test_client_requires_api_key() {
        let settings = LlmSettings::default();
        assert!(matches!(LlmClient::new(&settings), Err(ResolveError::Config(_))));

        let settings = LlmSettings {
            api_key: Some("sk-test".to_string()),
            base_url: "http://localhost:8080/v1/".to_string(),
            ..LlmSettings::default()
        };
        let client = LlmClient::new(&settings).unwrap();
        assert_eq!(client.base_url, "http://localhost:8080/v1");
        assert_eq!(client.model(), "gpt-4");
    }
}
