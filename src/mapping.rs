//! Phrase hits to dataset fields.

use crate::catalog::{DatasetFieldWhitelist, FieldKind, FieldRef};
use crate::phrase::MatchCandidate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const DEFAULT_THRESHOLD: f64 = 0.9;

/// Surface alias → field it names. Built once per run by the mapping stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMapping {
    entries: BTreeMap<String, FieldRef>,
}

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite; returns the field previously bound to `alias`.
    pub fn insert(&mut self, alias: impl Into<String>, field: FieldRef) -> Option<FieldRef> {
        self.entries.insert(alias.into(), field)
    }

    pub fn get(&self, alias: &str) -> Option<&FieldRef> {
        self.entries.get(alias)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldRef)> {
        self.entries.iter().map(|(alias, field)| (alias.as_str(), field))
    }

    pub fn metrics(&self) -> impl Iterator<Item = (&str, &FieldRef)> {
        self.of_kind(FieldKind::Metric)
    }

    pub fn dimensions(&self) -> impl Iterator<Item = (&str, &FieldRef)> {
        self.of_kind(FieldKind::Dimension)
    }

    fn of_kind(&self, kind: FieldKind) -> impl Iterator<Item = (&str, &FieldRef)> {
        self.iter().filter(move |(_, field)| field.kind == kind)
    }

    /// Distinct owning models, ascending.
    pub fn model_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.entries.values().map(|f| f.model_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, FieldRef)> for FieldMapping {
    fn from_iter<I: IntoIterator<Item = (String, FieldRef)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Keeps the confident, dataset-legal phrase hits.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapper {
    threshold: f64,
}

impl Default for FieldMapper {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl FieldMapper {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Filter `candidates` down to a mapping keyed by the matched phrase.
    ///
    /// A candidate survives when it names a model field, that field is in
    /// `whitelist`, and its similarity is at least the threshold. Synonym
    /// terms name no field and never survive. When two survivors share a
    /// phrase the later one in `candidates` wins.
    pub fn map_fields(
        &self,
        candidates: &[MatchCandidate],
        whitelist: &DatasetFieldWhitelist,
    ) -> FieldMapping {
        let mut mapping = FieldMapping::new();

        for candidate in candidates {
            let Some(field) = candidate.tag.field_ref() else {
                continue;
            };
            if !whitelist.contains(field.field_id, field.kind) {
                continue;
            }
            if candidate.similarity < self.threshold {
                continue;
            }
            if let Some(previous) = mapping.insert(candidate.surface_text.clone(), field) {
                if previous != field {
                    debug!(
                        alias = %candidate.surface_text,
                        %previous,
                        replacement = %field,
                        "alias rebound to a later field"
                    );
                }
            }
        }

        debug!(
            candidates = candidates.len(),
            mapped = mapping.len(),
            threshold = self.threshold,
            "field mapping done"
        );
        mapping
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SemanticTerm;

    fn candidate(text: &str, tag: SemanticTerm, similarity: f64) -> MatchCandidate {
        MatchCandidate {
            surface_text: text.to_string(),
            tag,
            similarity,
        }
    }

    fn whitelist() -> DatasetFieldWhitelist {
        [(2, FieldKind::Metric), (3, FieldKind::Dimension)]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mapper = FieldMapper::default();
        let kept = mapper.map_fields(
            &[candidate("tpv", SemanticTerm::metric("tpv", 1, 2), 0.9)],
            &whitelist(),
        );
        assert_eq!(kept.get("tpv"), Some(&FieldRef::new(1, 2, FieldKind::Metric)));

        let dropped = mapper.map_fields(
            &[candidate("tpv", SemanticTerm::metric("tpv", 1, 2), 0.8999)],
            &whitelist(),
        );
        assert!(dropped.is_empty());
    }

    #[test]
    fn test_fields_outside_whitelist_never_mapped() {
        let mapper = FieldMapper::default();
        let mapping = mapper.map_fields(
            &[
                candidate("fee", SemanticTerm::metric("fee", 1, 40), 1.0),
                // same id, wrong kind
                candidate("tpv", SemanticTerm::dimension("tpv", 1, 2), 1.0),
                candidate("transaction time", SemanticTerm::dimension("transaction time", 1, 3), 1.0),
            ],
            &whitelist(),
        );
        assert_eq!(mapping.len(), 1);
        assert!(mapping.get("transaction time").is_some());
    }

    #[test]
    fn test_synonyms_are_not_fields() {
        let mapping = FieldMapper::default().map_fields(
            &[candidate("gmv", SemanticTerm::synonym("gmv", 2), 1.0)],
            &whitelist(),
        );
        assert!(mapping.is_empty());
    }

    #[test]
    fn test_last_write_wins_per_alias() {
        let whitelist: DatasetFieldWhitelist =
            [(2, FieldKind::Metric), (21, FieldKind::Metric)].into_iter().collect();
        let mapping = FieldMapper::default().map_fields(
            &[
                candidate("tpv", SemanticTerm::metric("tpv", 1, 2), 1.0),
                candidate("tpv", SemanticTerm::metric("tpv", 5, 21), 1.0),
            ],
            &whitelist,
        );
        assert_eq!(mapping.get("tpv"), Some(&FieldRef::new(5, 21, FieldKind::Metric)));
    }

    #[test]
    fn test_partition_and_models() {
        let mapping: FieldMapping = [
            ("tpv".to_string(), FieldRef::new(1, 2, FieldKind::Metric)),
            ("transaction time".to_string(), FieldRef::new(1, 3, FieldKind::Dimension)),
            ("merchant".to_string(), FieldRef::new(4, 9, FieldKind::Dimension)),
        ]
        .into_iter()
        .collect();

        let metrics: Vec<&str> = mapping.metrics().map(|(a, _)| a).collect();
        let dimensions: Vec<&str> = mapping.dimensions().map(|(a, _)| a).collect();
        assert_eq!(metrics, vec!["tpv"]);
        assert_eq!(dimensions, vec!["merchant", "transaction time"]);
        assert_eq!(mapping.model_ids(), vec![1, 4]);

        let json = serde_json::to_value(&mapping).unwrap();
        assert_eq!(json["tpv"], "_1_2_metric");
    }
}
