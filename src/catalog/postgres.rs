//! Catalog repository for PostgreSQL

use crate::catalog::{
    CatalogStore, DatasetFieldWhitelist, DatasetRef, FieldColumn, FieldKind, ForeignKey,
    SemanticTerm, FOREIGN_KEY_TYPE,
};
use crate::error::{ResolveError, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info};

pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a bounded connection pool and check it answers.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| ResolveError::Catalog(format!("Failed to connect to catalog: {}", e)))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| ResolveError::Catalog(format!("Catalog health check failed: {}", e)))?;

        info!("Connected to Postgres catalog");
        Ok(Self { pool })
    }

    async fn fetch_terms(&self, sql: &str, kind: &str) -> Result<Vec<SemanticTerm>> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ResolveError::Catalog(format!("Failed to load {} terms: {}", kind, e)))?;

        rows.iter()
            .map(|row| {
                let alias: String = row.try_get("word").map_err(pg_err)?;
                let id: i64 = row.try_get("id").map_err(pg_err)?;
                let term = match kind {
                    "dimension" => SemanticTerm::dimension(alias, row.try_get("model_id").map_err(pg_err)?, id),
                    "metric" => SemanticTerm::metric(alias, row.try_get("model_id").map_err(pg_err)?, id),
                    _ => SemanticTerm::synonym(alias, id),
                };
                Ok(term)
            })
            .collect()
    }
}

#[async_trait]
impl CatalogStore for PgCatalog {
    async fn load_terms(&self) -> Result<Vec<SemanticTerm>> {
        let mut terms = self
            .fetch_terms(
                r#"
                SELECT alias AS word, model_id, id
                FROM model_dimension_tbl
                WHERE alias IS NOT NULL AND alias <> ''
                ORDER BY id
                "#,
                "dimension",
            )
            .await?;
        terms.extend(
            self.fetch_terms(
                r#"
                SELECT alias AS word, model_id, id
                FROM model_metric_tbl
                WHERE alias IS NOT NULL AND alias <> ''
                ORDER BY id
                "#,
                "metric",
            )
            .await?,
        );
        terms.extend(
            self.fetch_terms(
                r#"
                SELECT synonym AS word, id
                FROM term_tbl
                WHERE synonym IS NOT NULL AND synonym <> ''
                ORDER BY id
                "#,
                "term",
            )
            .await?,
        );

        debug!(count = terms.len(), "loaded catalog terms");
        Ok(terms)
    }

    async fn dataset_for_chat(&self, chat_id: i64) -> Result<Option<DatasetRef>> {
        let row = sqlx::query(
            r#"
            SELECT d.id, d.name
            FROM chat_assistant_tbl a
            JOIN analysis_assistant_dataset_tbl c
              ON a.analysis_assistant_id = c.analysis_assistant_id
            JOIN dataset_tbl d
              ON c.dataset_id = d.id
            WHERE a.id = $1
            ORDER BY d.id
            LIMIT 1
            "#,
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ResolveError::Catalog(format!("Failed to resolve chat {}: {}", chat_id, e)))?;

        row.map(|row| {
            Ok(DatasetRef {
                id: row.try_get("id").map_err(pg_err)?,
                name: row.try_get("name").map_err(pg_err)?,
            })
        })
        .transpose()
    }

    async fn dataset_whitelist(&self, dataset_id: i64) -> Result<DatasetFieldWhitelist> {
        let lookup_err =
            |e: sqlx::Error| ResolveError::WhitelistLookup(format!("dataset {}: {}", dataset_id, e));

        let exists = sqlx::query("SELECT id FROM dataset_tbl WHERE id = $1")
            .bind(dataset_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(lookup_err)?;
        if exists.is_none() {
            return Err(ResolveError::WhitelistLookup(format!(
                "dataset {} not found",
                dataset_id
            )));
        }

        let rows = sqlx::query(
            r#"
            SELECT dimension_id AS field_id, 'dimension' AS kind
            FROM dataset_dimension_tbl WHERE dataset_id = $1
            UNION
            SELECT metric_id AS field_id, 'metric' AS kind
            FROM dataset_metric_tbl WHERE dataset_id = $1
            "#,
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await
        .map_err(lookup_err)?;

        let mut whitelist = DatasetFieldWhitelist::new();
        for row in rows {
            let field_id: i64 = row.try_get("field_id").map_err(lookup_err)?;
            let kind: String = row.try_get("kind").map_err(lookup_err)?;
            let kind = if kind == "metric" {
                FieldKind::Metric
            } else {
                FieldKind::Dimension
            };
            whitelist.insert(field_id, kind);
        }
        Ok(whitelist)
    }

    async fn field_columns(&self, kind: FieldKind, field_ids: &[i64]) -> Result<Vec<FieldColumn>> {
        if field_ids.is_empty() {
            return Ok(Vec::new());
        }
        let table = match kind {
            FieldKind::Dimension => "model_dimension_tbl",
            FieldKind::Metric => "model_metric_tbl",
        };
        let sql = format!(
            r#"
            SELECT t1.id, t1.model_id, COALESCE(t1.alias, '') AS alias,
                   t1.name AS field_name, t2.table_name
            FROM {} t1
            JOIN model_tbl t2 ON t1.model_id = t2.id
            WHERE t1.id = ANY($1)
            ORDER BY t1.id
            "#,
            table
        );

        let rows = sqlx::query(&sql)
            .bind(field_ids.to_vec())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ResolveError::Catalog(format!("Failed to load {} columns: {}", kind, e)))?;

        rows.iter()
            .map(|row| {
                Ok(FieldColumn {
                    field_id: row.try_get("id").map_err(pg_err)?,
                    model_id: row.try_get("model_id").map_err(pg_err)?,
                    kind,
                    alias: row.try_get("alias").map_err(pg_err)?,
                    table_name: row.try_get("table_name").map_err(pg_err)?,
                    column_name: row.try_get("field_name").map_err(pg_err)?,
                })
            })
            .collect()
    }

    async fn foreign_keys(&self, model_ids: &[i64]) -> Result<Vec<ForeignKey>> {
        if model_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT t1.model_id, t2.table_name, t1.name AS field_name,
                   COALESCE(t1.express, '') AS express
            FROM model_dimension_tbl t1
            JOIN model_tbl t2 ON t1.model_id = t2.id
            WHERE t1.dimension_type = $1 AND t1.model_id = ANY($2)
            ORDER BY t1.model_id, t1.id
            "#,
        )
        .bind(FOREIGN_KEY_TYPE)
        .bind(model_ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ResolveError::Catalog(format!("Failed to load foreign keys: {}", e)))?;

        rows.iter().map(foreign_key_from_row).collect()
    }

    async fn dataset_base_table(&self, dataset_id: i64) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT m.table_name FROM model_tbl m
            WHERE m.id IN (
                SELECT d.model_id FROM model_dimension_tbl d
                JOIN dataset_dimension_tbl dd ON dd.dimension_id = d.id
                WHERE dd.dataset_id = $1
                UNION
                SELECT mt.model_id FROM model_metric_tbl mt
                JOIN dataset_metric_tbl dm ON dm.metric_id = mt.id
                WHERE dm.dataset_id = $1
            )
            ORDER BY m.id
            LIMIT 1
            "#,
        )
        .bind(dataset_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ResolveError::Catalog(format!("Failed to load base table: {}", e)))?;

        row.map(|row| row.try_get("table_name").map_err(pg_err))
            .transpose()
    }
}

fn foreign_key_from_row(row: &PgRow) -> Result<ForeignKey> {
    Ok(ForeignKey {
        model_id: row.try_get("model_id").map_err(pg_err)?,
        table_name: row.try_get("table_name").map_err(pg_err)?,
        column_name: row.try_get("field_name").map_err(pg_err)?,
        express: row.try_get("express").map_err(pg_err)?,
    })
}

fn pg_err(e: sqlx::Error) -> ResolveError {
    ResolveError::Catalog(e.to_string())
}
