//! Business-alias SQL to physical SQL.
//!
//! The rewrite is textual. Each `` `alias` `` token is replaced with the
//! field's `table.column`, and the dataset name is replaced with a FROM
//! fragment built from the owning tables and their foreign keys. Alias text
//! outside backticks is left alone. The dataset name is replaced wherever it
//! occurs as a substring outside backtick tokens, unless the SQL already
//! names the physical FROM fragment.

use crate::catalog::{CatalogStore, FieldColumn, FieldKind, ForeignKey};
use crate::error::{ResolveError, Result};
use crate::mapping::FieldMapping;
use crate::resolution::{ResolutionState, ResolutionWarning};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one transition: the physical SQL plus anything that could not
/// be located along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub physical_sql: String,
    pub warnings: Vec<ResolutionWarning>,
}

/// Replace every `` `alias` `` with its column. Returns the rewritten SQL and
/// the aliases that never occurred.
pub fn substitute_aliases<'a>(sql: &str, columns: &[(&'a str, String)]) -> (String, Vec<&'a str>) {
    let mut out = sql.to_string();
    let mut missing = Vec::new();
    for (alias, qualified) in columns {
        let token = format!("`{}`", alias);
        if out.contains(&token) {
            out = out.replace(&token, qualified);
        } else {
            missing.push(*alias);
        }
    }
    (out, missing)
}

/// `base LEFT JOIN t1 ON c1 LEFT JOIN t2 ON c2 ...`, one join per key.
pub fn from_clause(base_table: &str, foreign_keys: &[ForeignKey]) -> String {
    foreign_keys.iter().fold(base_table.to_string(), |mut acc, fk| {
        acc.push_str(&format!(
            " LEFT JOIN {} ON {}",
            fk.target_table(),
            fk.join_condition()
        ));
        acc
    })
}

/// Split `sql` into `(quoted, text)` runs; quoted runs keep their backticks.
fn backtick_runs(sql: &str) -> impl Iterator<Item = (bool, &str)> {
    let mut rest = sql;
    let mut quoted = false;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let run = if quoted {
            match rest[1..].find('`') {
                Some(end) => &rest[..end + 2],
                None => rest,
            }
        } else {
            match rest.find('`') {
                Some(end) => &rest[..end],
                None => rest,
            }
        };
        let was_quoted = quoted;
        rest = &rest[run.len()..];
        quoted = !quoted;
        Some((was_quoted, run))
    })
    .filter(|(_, run)| !run.is_empty())
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

/// Whether `sql` mentions `table` as a table reference rather than as part
/// of a longer identifier or a `table.column` qualifier.
fn references_table(sql: &str, table: &str) -> bool {
    !table.is_empty()
        && backtick_runs(sql)
            .filter(|(quoted, _)| !quoted)
            .any(|(_, text)| {
                text.match_indices(table).any(|(at, _)| {
                    let before = text[..at].chars().next_back();
                    let after = text[at + table.len()..].chars().next();
                    !before.is_some_and(is_ident_char) && !after.is_some_and(is_ident_char)
                })
            })
}

/// Replace every occurrence of `name` outside backtick-quoted tokens with
/// `fragment`. Occurrences inside an existing mention of `base_table` are
/// left alone. Returns the rewritten SQL and the number of replacements.
fn replace_dataset_name(sql: &str, name: &str, base_table: &str, fragment: &str) -> (String, usize) {
    if name.is_empty() {
        return (sql.to_string(), 0);
    }

    let mut out = String::with_capacity(sql.len());
    let mut replaced = 0;
    for (quoted, text) in backtick_runs(sql) {
        if quoted {
            out.push_str(text);
            continue;
        }
        let protected: Vec<(usize, usize)> = if base_table.contains(name) {
            text.match_indices(base_table)
                .map(|(at, m)| (at, at + m.len()))
                .collect()
        } else {
            Vec::new()
        };

        let mut last = 0;
        for (at, m) in text.match_indices(name) {
            let end = at + m.len();
            if protected.iter().any(|&(s, e)| s <= at && end <= e) {
                continue;
            }
            out.push_str(&text[last..at]);
            out.push_str(fragment);
            last = end;
            replaced += 1;
        }
        out.push_str(&text[last..]);
    }
    (out, replaced)
}

pub struct SemanticTransitionResolver {
    catalog: Arc<dyn CatalogStore>,
}

impl SemanticTransitionResolver {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }

    /// Make the state's latest generated SQL physical.
    pub async fn resolve(&self, state: &ResolutionState) -> Result<Transition> {
        let sql = state.generated_sql().ok_or_else(|| {
            ResolveError::UpstreamGeneration("no generated SQL to transition".to_string())
        })?;
        self.resolve_sql(sql, state.dataset_id, &state.dataset_name, &state.mapping)
            .await
    }

    pub async fn resolve_sql(
        &self,
        sql: &str,
        dataset_id: i64,
        dataset_name: &str,
        mapping: &FieldMapping,
    ) -> Result<Transition> {
        let mut warnings = Vec::new();

        let columns = self.columns_for(mapping).await?;
        let mut replacements: Vec<(&str, String)> = Vec::new();
        for (alias, field) in mapping.iter() {
            match columns.get(&(field.kind, field.field_id)) {
                Some(column) => replacements.push((alias, column.qualified())),
                None => {
                    warn!(%alias, %field, "mapped field has no physical column");
                    warnings.push(ResolutionWarning::SubstitutionAmbiguity {
                        token: alias.to_string(),
                    });
                }
            }
        }

        let foreign_keys: Vec<ForeignKey> = self
            .catalog
            .foreign_keys(&mapping.model_ids())
            .await?
            .into_iter()
            .filter(|fk| !fk.express.trim().is_empty())
            .collect();

        let base_table = match foreign_keys.first() {
            Some(fk) => Some(fk.table_name.clone()),
            None => {
                let from_mapping = mapping
                    .metrics()
                    .chain(mapping.dimensions())
                    .find_map(|(_, f)| columns.get(&(f.kind, f.field_id)))
                    .map(|c| c.table_name.clone());
                match from_mapping {
                    Some(table) => Some(table),
                    None => self.catalog.dataset_base_table(dataset_id).await?,
                }
            }
        };

        // The dataset name is swapped on the alias SQL, before aliases turn
        // into `table.column` qualifiers that may contain it.
        let mut unlocated_dataset = false;
        let expanded = match base_table {
            Some(base) => {
                let fragment = from_clause(&base, &foreign_keys);
                if references_table(sql, &fragment) {
                    sql.to_string()
                } else {
                    let (out, replaced) = replace_dataset_name(sql, dataset_name, &base, &fragment);
                    unlocated_dataset = replaced == 0;
                    debug!(joins = foreign_keys.len(), %fragment, replaced, "dataset expanded");
                    out
                }
            }
            None => {
                warn!(dataset_id, "no physical table for dataset");
                unlocated_dataset = true;
                sql.to_string()
            }
        };

        let (physical, missing) = substitute_aliases(&expanded, &replacements);
        for alias in missing {
            debug!(%alias, "alias not present in SQL");
            warnings.push(ResolutionWarning::SubstitutionAmbiguity {
                token: alias.to_string(),
            });
        }
        if unlocated_dataset {
            warnings.push(ResolutionWarning::SubstitutionAmbiguity {
                token: dataset_name.to_string(),
            });
        }

        Ok(Transition {
            physical_sql: physical,
            warnings,
        })
    }

    async fn columns_for(
        &self,
        mapping: &FieldMapping,
    ) -> Result<HashMap<(FieldKind, i64), FieldColumn>> {
        let metric_ids: Vec<i64> = mapping.metrics().map(|(_, f)| f.field_id).collect();
        let dimension_ids: Vec<i64> = mapping.dimensions().map(|(_, f)| f.field_id).collect();

        let mut columns = self
            .catalog
            .field_columns(FieldKind::Metric, &metric_ids)
            .await?;
        columns.extend(
            self.catalog
                .field_columns(FieldKind::Dimension, &dimension_ids)
                .await?,
        );

        Ok(columns
            .into_iter()
            .map(|c| ((c.kind, c.field_id), c))
            .collect())
    }
}
