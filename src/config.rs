//! Runtime settings.
//!
//! Values come from the process environment, with a `.env` file loaded first
//! when one is present. Anything not set falls back to [`Settings::default`].

use crate::error::{ResolveError, Result};
use crate::phrase::SimilarityMetric;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Connection settings for the language-model oracle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmSettings {
    /// Bearer token; the client refuses to start without one
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            temperature: 0.1,
            max_tokens: 1000,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchingSettings {
    /// Minimum similarity (inclusive) for a phrase hit to enter the mapping
    pub threshold: f64,
    pub metric: SimilarityMetric,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            metric: SimilarityMetric::Gestalt,
        }
    }
}

/// Controls how the schema description handed to the oracle is rendered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaSettings {
    /// Dimension aliases ending in one of these get a date-format hint
    pub time_suffixes: Vec<String>,
    pub time_format: String,
}

impl Default for SchemaSettings {
    fn default() -> Self {
        Self {
            time_suffixes: vec!["time".to_string()],
            time_format: "yyyy-MM-dd 00:00:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSettings {
    /// Upper bound for any single blocking call (oracle, catalog, execution)
    pub stage_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 120,
        }
    }
}

impl PipelineSettings {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub llm: LlmSettings,
    pub matching: MatchingSettings,
    pub schema: SchemaSettings,
    pub pipeline: PipelineSettings,
    /// Postgres URL of the catalog store
    pub catalog_url: Option<String>,
}

impl Settings {
    /// Load settings from `.env` and the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(key) = non_empty(lookup("OPENAI_API_KEY")) {
            settings.llm.api_key = Some(key);
        }
        if let Some(url) = non_empty(lookup("OPENAI_BASE_URL")) {
            settings.llm.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = non_empty(lookup("OPENAI_MODEL")) {
            settings.llm.model = model;
        }
        if let Some(v) = parse_var(&lookup, "LLM_TEMPERATURE")? {
            settings.llm.temperature = v;
        }
        if let Some(v) = parse_var(&lookup, "LLM_MAX_TOKENS")? {
            settings.llm.max_tokens = v;
        }
        if let Some(v) = parse_var(&lookup, "LLM_TIMEOUT_SECS")? {
            settings.llm.timeout_secs = v;
        }

        if let Some(v) = parse_var(&lookup, "MATCH_THRESHOLD")? {
            settings.matching.threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "MATCH_SIMILARITY")? {
            settings.matching.metric = v;
        }

        if let Some(raw) = non_empty(lookup("TIME_SUFFIXES")) {
            settings.schema.time_suffixes = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(format) = non_empty(lookup("TIME_FORMAT")) {
            settings.schema.time_format = format;
        }

        if let Some(v) = parse_var(&lookup, "STAGE_TIMEOUT_SECS")? {
            settings.pipeline.stage_timeout_secs = v;
        }

        settings.catalog_url = non_empty(lookup("CATALOG_DATABASE_URL"));

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.matching.threshold) {
            return Err(ResolveError::Config(format!(
                "match threshold must be within [0, 1], got {}",
                self.matching.threshold
            )));
        }
        if self.pipeline.stage_timeout_secs == 0 {
            return Err(ResolveError::Config(
                "stage timeout must be greater than zero".to_string(),
            ));
        }
        if self.llm.timeout_secs == 0 {
            return Err(ResolveError::Config(
                "LLM timeout must be greater than zero".to_string(),
            ));
        }
        if self.schema.time_suffixes.is_empty() {
            return Err(ResolveError::Config(
                "at least one time suffix is required".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match non_empty(lookup(key)) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ResolveError::Config(format!("invalid value for {}: {} ({})", key, raw, e))),
    }
}
