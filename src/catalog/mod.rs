//! Catalog access.
//!
//! The catalog is the relational store holding models, their dimension and
//! metric fields, business-term synonyms, datasets, and the chat assistants
//! that expose them. Resolution only ever reads from it.

pub mod postgres;
pub mod sqlite;

pub use postgres::PgCatalog;
pub use sqlite::SqliteCatalog;

use crate::error::{ResolveError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// `dimension_type` value marking a dimension as a foreign key to another table.
pub const FOREIGN_KEY_TYPE: &str = "foreign key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Dimension,
    Metric,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Dimension => "dimension",
            FieldKind::Metric => "metric",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermKind {
    Dimension,
    Metric,
    Synonym,
}

/// A phrase known to the catalog, tagged with the field it names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SemanticTerm {
    pub surface_alias: String,
    pub kind: TermKind,
    /// Owning model; synonyms from the term table have none
    pub model_id: Option<i64>,
    /// Dimension, metric or term id, depending on `kind`
    pub field_id: i64,
}

impl SemanticTerm {
    pub fn dimension(alias: impl Into<String>, model_id: i64, field_id: i64) -> Self {
        Self {
            surface_alias: alias.into(),
            kind: TermKind::Dimension,
            model_id: Some(model_id),
            field_id,
        }
    }

    pub fn metric(alias: impl Into<String>, model_id: i64, field_id: i64) -> Self {
        Self {
            surface_alias: alias.into(),
            kind: TermKind::Metric,
            model_id: Some(model_id),
            field_id,
        }
    }

    pub fn synonym(synonym: impl Into<String>, term_id: i64) -> Self {
        Self {
            surface_alias: synonym.into(),
            kind: TermKind::Synonym,
            model_id: None,
            field_id: term_id,
        }
    }

    /// The model field this term names, if it names one at all.
    pub fn field_ref(&self) -> Option<FieldRef> {
        let kind = match self.kind {
            TermKind::Dimension => FieldKind::Dimension,
            TermKind::Metric => FieldKind::Metric,
            TermKind::Synonym => return None,
        };
        Some(FieldRef {
            model_id: self.model_id?,
            field_id: self.field_id,
            kind,
        })
    }

    /// Composite identifier: `_<model>_<field>_<kind>` for fields,
    /// `_<term>_term` for synonyms.
    pub fn nature(&self) -> String {
        match self.field_ref() {
            Some(field) => field.to_string(),
            None => format!("_{}_term", self.field_id),
        }
    }
}

/// Reference to one dimension or metric of one model.
///
/// Renders (and serializes) as the nature string
/// `_<model_id>_<field_id>_<kind>`, e.g. `_1_2_metric`, and parses back from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef {
    pub model_id: i64,
    pub field_id: i64,
    pub kind: FieldKind,
}

impl FieldRef {
    pub fn new(model_id: i64, field_id: i64, kind: FieldKind) -> Self {
        Self {
            model_id,
            field_id,
            kind,
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_{}_{}_{}", self.model_id, self.field_id, self.kind)
    }
}

impl FromStr for FieldRef {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || ResolveError::Catalog(format!("malformed field nature: {}", s));

        let parts: Vec<&str> = s.split('_').collect();
        if parts.len() != 4 || !parts[0].is_empty() {
            return Err(malformed());
        }
        let model_id = parts[1].parse().map_err(|_| malformed())?;
        let field_id = parts[2].parse().map_err(|_| malformed())?;
        let kind = match parts[3] {
            "dimension" => FieldKind::Dimension,
            "metric" => FieldKind::Metric,
            _ => return Err(malformed()),
        };
        Ok(Self::new(model_id, field_id, kind))
    }
}

impl Serialize for FieldRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub id: i64,
    pub name: String,
}

/// The `(field_id, kind)` pairs a dataset is allowed to reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetFieldWhitelist {
    fields: HashSet<(i64, FieldKind)>,
}

impl DatasetFieldWhitelist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field_id: i64, kind: FieldKind) {
        self.fields.insert((field_id, kind));
    }

    pub fn contains(&self, field_id: i64, kind: FieldKind) -> bool {
        self.fields.contains(&(field_id, kind))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(i64, FieldKind)> for DatasetFieldWhitelist {
    fn from_iter<I: IntoIterator<Item = (i64, FieldKind)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Physical location of a dimension or metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldColumn {
    pub field_id: i64,
    pub model_id: i64,
    pub kind: FieldKind,
    pub alias: String,
    pub table_name: String,
    pub column_name: String,
}

impl FieldColumn {
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.table_name, self.column_name)
    }
}

/// A foreign-key dimension: `table_name.column_name` references `express`
/// (written as `other_table.other_column`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub model_id: i64,
    pub table_name: String,
    pub column_name: String,
    pub express: String,
}

impl ForeignKey {
    pub fn target_table(&self) -> &str {
        self.express.split('.').next().unwrap_or_default()
    }

    pub fn join_condition(&self) -> String {
        format!("{}.{} = {}", self.table_name, self.column_name, self.express)
    }
}

/// Read-only lookups the resolver needs from the catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Every aliased dimension and metric plus every term synonym.
    async fn load_terms(&self) -> Result<Vec<SemanticTerm>>;

    /// Dataset served by a chat assistant.
    async fn dataset_for_chat(&self, chat_id: i64) -> Result<Option<DatasetRef>>;

    /// Fields a dataset may reference. Fails when the dataset does not exist.
    async fn dataset_whitelist(&self, dataset_id: i64) -> Result<DatasetFieldWhitelist>;

    async fn field_columns(&self, kind: FieldKind, field_ids: &[i64]) -> Result<Vec<FieldColumn>>;

    /// Foreign-key dimensions declared on the given models.
    async fn foreign_keys(&self, model_ids: &[i64]) -> Result<Vec<ForeignKey>>;

    /// Table of the lowest-id model contributing fields to the dataset.
    async fn dataset_base_table(&self, dataset_id: i64) -> Result<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nature_round_trip() {
        let field: FieldRef = "_1_2_metric".parse().unwrap();
        assert_eq!(field, FieldRef::new(1, 2, FieldKind::Metric));
        assert_eq!(field.to_string(), "_1_2_metric");
        assert_eq!(serde_json::to_string(&field).unwrap(), "\"_1_2_metric\"");
    }

    #[test]
    fn test_malformed_natures_rejected() {
        for raw in ["1_2_metric", "_1_metric", "_a_2_dimension", "_1_2_measure", "_5_term"] {
            assert!(raw.parse::<FieldRef>().is_err(), "{} should not parse", raw);
        }
    }

    #[test]
    fn test_synonym_has_no_field_ref() {
        let term = SemanticTerm::synonym("gmv", 5);
        assert!(term.field_ref().is_none());
        assert_eq!(term.nature(), "_5_term");

        let dim = SemanticTerm::dimension("transaction time", 1, 3);
        assert_eq!(dim.nature(), "_1_3_dimension");
    }

    #[test]
    fn test_foreign_key_target_and_condition() {
        let fk = ForeignKey {
            model_id: 1,
            table_name: "orders".to_string(),
            column_name: "merchant_id".to_string(),
            express: "merchants.id".to_string(),
        };
        assert_eq!(fk.target_table(), "merchants");
        assert_eq!(fk.join_condition(), "orders.merchant_id = merchants.id");
    }
}
