//! SQLite-backed catalog store.
//!
//! Mirrors the relational layout of the catalog server (`model_tbl`,
//! `model_dimension_tbl`, `model_metric_tbl`, `term_tbl`, `dataset_*` and the
//! assistant link tables). Handy for local runs and for tests, where an
//! in-memory database is seeded through the `insert_*`/`link_*` helpers.

use crate::catalog::{
    CatalogStore, DatasetFieldWhitelist, DatasetRef, FieldColumn, FieldKind, ForeignKey,
    SemanticTerm, FOREIGN_KEY_TYPE,
};
use crate::error::{ResolveError, Result};
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS model_tbl (
    id INTEGER PRIMARY KEY,
    model_name TEXT,
    table_name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS model_dimension_tbl (
    id INTEGER PRIMARY KEY,
    model_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    alias TEXT,
    dimension_type TEXT,
    description TEXT,
    express TEXT
);
CREATE TABLE IF NOT EXISTS model_metric_tbl (
    id INTEGER PRIMARY KEY,
    model_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    alias TEXT,
    metric_type TEXT,
    description TEXT,
    express TEXT
);
CREATE TABLE IF NOT EXISTS term_tbl (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    synonym TEXT,
    description TEXT
);
CREATE TABLE IF NOT EXISTS dataset_tbl (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT
);
CREATE TABLE IF NOT EXISTS dataset_dimension_tbl (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    dataset_id INTEGER NOT NULL,
    dimension_id INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS dataset_metric_tbl (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    dataset_id INTEGER NOT NULL,
    metric_id INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS chat_assistant_tbl (
    id INTEGER PRIMARY KEY,
    analysis_assistant_id INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS analysis_assistant_dataset_tbl (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    analysis_assistant_id INTEGER NOT NULL,
    dataset_id INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_dataset_dimension ON dataset_dimension_tbl(dataset_id);
CREATE INDEX IF NOT EXISTS idx_dataset_metric ON dataset_metric_tbl(dataset_id);
"#;

/// Cloning shares the connection. Async lookups run on the blocking pool.
#[derive(Clone)]
pub struct SqliteCatalog {
    db: Arc<Mutex<Connection>>,
}

impl SqliteCatalog {
    /// Open (or create) a catalog database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Connection::open(path.as_ref())
            .map_err(|e| ResolveError::Catalog(format!("Failed to open catalog: {}", e)))?;
        Self::with_connection(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()
            .map_err(|e| ResolveError::Catalog(format!("Failed to open catalog: {}", e)))?;
        Self::with_connection(db)
    }

    fn with_connection(db: Connection) -> Result<Self> {
        let store = Self {
            db: Arc::new(Mutex::new(db)),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn init_schema(&self) -> Result<()> {
        self.conn()?
            .execute_batch(SCHEMA)
            .map_err(|e| ResolveError::Catalog(format!("Failed to create catalog schema: {}", e)))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| ResolveError::Catalog("catalog connection lock poisoned".to_string()))
    }

    fn write(&self, sql: &str, values: impl rusqlite::Params) -> Result<()> {
        self.conn()?
            .execute(sql, values)
            .map(|_| ())
            .map_err(|e| ResolveError::Catalog(format!("Failed to write catalog row: {}", e)))
    }

    pub fn insert_model(&self, id: i64, model_name: &str, table_name: &str) -> Result<()> {
        self.write(
            "INSERT INTO model_tbl (id, model_name, table_name) VALUES (?1, ?2, ?3)",
            params![id, model_name, table_name],
        )
    }

    /// Insert a dimension. `dimension_type` is e.g. `"time"` or
    /// [`FOREIGN_KEY_TYPE`]; `express` holds the referenced `table.column`
    /// for foreign keys.
    pub fn insert_dimension(
        &self,
        id: i64,
        model_id: i64,
        name: &str,
        alias: &str,
        dimension_type: Option<&str>,
        express: Option<&str>,
    ) -> Result<()> {
        self.write(
            "INSERT INTO model_dimension_tbl (id, model_id, name, alias, dimension_type, express)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, model_id, name, alias, dimension_type, express],
        )
    }

    pub fn insert_metric(&self, id: i64, model_id: i64, name: &str, alias: &str) -> Result<()> {
        self.write(
            "INSERT INTO model_metric_tbl (id, model_id, name, alias) VALUES (?1, ?2, ?3, ?4)",
            params![id, model_id, name, alias],
        )
    }

    pub fn insert_term(&self, id: i64, name: &str, synonym: &str) -> Result<()> {
        self.write(
            "INSERT INTO term_tbl (id, name, synonym) VALUES (?1, ?2, ?3)",
            params![id, name, synonym],
        )
    }

    pub fn insert_dataset(&self, id: i64, name: &str) -> Result<()> {
        self.write(
            "INSERT INTO dataset_tbl (id, name) VALUES (?1, ?2)",
            params![id, name],
        )
    }

    pub fn link_dataset_dimension(&self, dataset_id: i64, dimension_id: i64) -> Result<()> {
        self.write(
            "INSERT INTO dataset_dimension_tbl (dataset_id, dimension_id) VALUES (?1, ?2)",
            params![dataset_id, dimension_id],
        )
    }

    pub fn link_dataset_metric(&self, dataset_id: i64, metric_id: i64) -> Result<()> {
        self.write(
            "INSERT INTO dataset_metric_tbl (dataset_id, metric_id) VALUES (?1, ?2)",
            params![dataset_id, metric_id],
        )
    }

    /// Expose a dataset to a chat assistant through an analysis assistant.
    pub fn link_chat_dataset(
        &self,
        chat_id: i64,
        analysis_assistant_id: i64,
        dataset_id: i64,
    ) -> Result<()> {
        self.write(
            "INSERT OR IGNORE INTO chat_assistant_tbl (id, analysis_assistant_id) VALUES (?1, ?2)",
            params![chat_id, analysis_assistant_id],
        )?;
        self.write(
            "INSERT INTO analysis_assistant_dataset_tbl (analysis_assistant_id, dataset_id) VALUES (?1, ?2)",
            params![analysis_assistant_id, dataset_id],
        )
    }

    fn query_terms(&self) -> Result<Vec<SemanticTerm>> {
        let db = self.conn()?;
        let mut terms = Vec::new();

        let mut stmt = db
            .prepare(
                "SELECT alias, model_id, id FROM model_dimension_tbl
                 WHERE alias IS NOT NULL AND alias <> '' ORDER BY id",
            )
            .map_err(catalog_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SemanticTerm::dimension(
                    row.get::<_, String>(0)?,
                    row.get(1)?,
                    row.get(2)?,
                ))
            })
            .map_err(catalog_err)?;
        for row in rows {
            terms.push(row.map_err(catalog_err)?);
        }

        let mut stmt = db
            .prepare(
                "SELECT alias, model_id, id FROM model_metric_tbl
                 WHERE alias IS NOT NULL AND alias <> '' ORDER BY id",
            )
            .map_err(catalog_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SemanticTerm::metric(
                    row.get::<_, String>(0)?,
                    row.get(1)?,
                    row.get(2)?,
                ))
            })
            .map_err(catalog_err)?;
        for row in rows {
            terms.push(row.map_err(catalog_err)?);
        }

        let mut stmt = db
            .prepare(
                "SELECT synonym, id FROM term_tbl
                 WHERE synonym IS NOT NULL AND synonym <> '' ORDER BY id",
            )
            .map_err(catalog_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SemanticTerm::synonym(row.get::<_, String>(0)?, row.get(1)?))
            })
            .map_err(catalog_err)?;
        for row in rows {
            terms.push(row.map_err(catalog_err)?);
        }

        debug!(count = terms.len(), "loaded catalog terms");
        Ok(terms)
    }

    fn query_dataset_for_chat(&self, chat_id: i64) -> Result<Option<DatasetRef>> {
        self.conn()?
            .query_row(
                "SELECT d.id, d.name
                 FROM chat_assistant_tbl a
                 JOIN analysis_assistant_dataset_tbl c
                   ON a.analysis_assistant_id = c.analysis_assistant_id
                 JOIN dataset_tbl d
                   ON c.dataset_id = d.id
                 WHERE a.id = ?1
                 ORDER BY d.id
                 LIMIT 1",
                params![chat_id],
                |row| {
                    Ok(DatasetRef {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(catalog_err)
    }

    fn query_whitelist(&self, dataset_id: i64) -> Result<DatasetFieldWhitelist> {
        let lookup_err =
            |e: rusqlite::Error| ResolveError::WhitelistLookup(format!("dataset {}: {}", dataset_id, e));

        let db = self.conn()?;
        let exists: Option<i64> = db
            .query_row(
                "SELECT id FROM dataset_tbl WHERE id = ?1",
                params![dataset_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(lookup_err)?;
        if exists.is_none() {
            return Err(ResolveError::WhitelistLookup(format!(
                "dataset {} not found",
                dataset_id
            )));
        }

        let mut whitelist = DatasetFieldWhitelist::new();
        for (sql, kind) in [
            (
                "SELECT dimension_id FROM dataset_dimension_tbl WHERE dataset_id = ?1",
                FieldKind::Dimension,
            ),
            (
                "SELECT metric_id FROM dataset_metric_tbl WHERE dataset_id = ?1",
                FieldKind::Metric,
            ),
        ] {
            let mut stmt = db.prepare(sql).map_err(lookup_err)?;
            let ids = stmt
                .query_map(params![dataset_id], |row| row.get::<_, i64>(0))
                .map_err(lookup_err)?;
            for id in ids {
                whitelist.insert(id.map_err(lookup_err)?, kind);
            }
        }
        Ok(whitelist)
    }

    fn query_field_columns(&self, kind: FieldKind, field_ids: &[i64]) -> Result<Vec<FieldColumn>> {
        if field_ids.is_empty() {
            return Ok(Vec::new());
        }
        let table = match kind {
            FieldKind::Dimension => "model_dimension_tbl",
            FieldKind::Metric => "model_metric_tbl",
        };
        let sql = format!(
            "SELECT t1.id, t1.model_id, COALESCE(t1.alias, ''), t1.name, t2.table_name
             FROM {} t1
             JOIN model_tbl t2 ON t1.model_id = t2.id
             WHERE t1.id IN ({})
             ORDER BY t1.id",
            table,
            placeholders(field_ids.len())
        );

        let db = self.conn()?;
        let mut stmt = db.prepare(&sql).map_err(catalog_err)?;
        let rows = stmt
            .query_map(params_from_iter(field_ids.iter()), |row| {
                Ok(FieldColumn {
                    field_id: row.get(0)?,
                    model_id: row.get(1)?,
                    kind,
                    alias: row.get(2)?,
                    column_name: row.get(3)?,
                    table_name: row.get(4)?,
                })
            })
            .map_err(catalog_err)?;
        let collected = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(catalog_err)?;
        Ok(collected)
    }

    fn query_foreign_keys(&self, model_ids: &[i64]) -> Result<Vec<ForeignKey>> {
        if model_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT t1.model_id, t2.table_name, t1.name, COALESCE(t1.express, '')
             FROM model_dimension_tbl t1
             JOIN model_tbl t2 ON t1.model_id = t2.id
             WHERE t1.dimension_type = '{}' AND t1.model_id IN ({})
             ORDER BY t1.model_id, t1.id",
            FOREIGN_KEY_TYPE,
            placeholders(model_ids.len())
        );

        let db = self.conn()?;
        let mut stmt = db.prepare(&sql).map_err(catalog_err)?;
        let rows = stmt
            .query_map(params_from_iter(model_ids.iter()), |row| {
                Ok(ForeignKey {
                    model_id: row.get(0)?,
                    table_name: row.get(1)?,
                    column_name: row.get(2)?,
                    express: row.get(3)?,
                })
            })
            .map_err(catalog_err)?;
        let collected = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(catalog_err)?;
        Ok(collected)
    }

    fn query_dataset_base_table(&self, dataset_id: i64) -> Result<Option<String>> {
        self.conn()?
            .query_row(
                "SELECT m.table_name FROM model_tbl m
                 WHERE m.id IN (
                     SELECT d.model_id FROM model_dimension_tbl d
                     JOIN dataset_dimension_tbl dd ON dd.dimension_id = d.id
                     WHERE dd.dataset_id = ?1
                     UNION
                     SELECT mt.model_id FROM model_metric_tbl mt
                     JOIN dataset_metric_tbl dm ON dm.metric_id = mt.id
                     WHERE dm.dataset_id = ?1
                 )
                 ORDER BY m.id
                 LIMIT 1",
                params![dataset_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(catalog_err)
    }
}

impl SqliteCatalog {
    /// Run a synchronous lookup on the blocking pool against a shared handle.
    async fn blocking<T, F>(&self, lookup: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteCatalog) -> Result<T> + Send + 'static,
    {
        let catalog = self.clone();
        tokio::task::spawn_blocking(move || lookup(&catalog))
            .await
            .map_err(|e| ResolveError::Catalog(format!("catalog task failed: {}", e)))?
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn load_terms(&self) -> Result<Vec<SemanticTerm>> {
        self.blocking(|c| c.query_terms()).await
    }

    async fn dataset_for_chat(&self, chat_id: i64) -> Result<Option<DatasetRef>> {
        self.blocking(move |c| c.query_dataset_for_chat(chat_id)).await
    }

    async fn dataset_whitelist(&self, dataset_id: i64) -> Result<DatasetFieldWhitelist> {
        self.blocking(move |c| c.query_whitelist(dataset_id)).await
    }

    async fn field_columns(&self, kind: FieldKind, field_ids: &[i64]) -> Result<Vec<FieldColumn>> {
        let ids = field_ids.to_vec();
        self.blocking(move |c| c.query_field_columns(kind, &ids)).await
    }

    async fn foreign_keys(&self, model_ids: &[i64]) -> Result<Vec<ForeignKey>> {
        let ids = model_ids.to_vec();
        self.blocking(move |c| c.query_foreign_keys(&ids)).await
    }

    async fn dataset_base_table(&self, dataset_id: i64) -> Result<Option<String>> {
        self.blocking(move |c| c.query_dataset_base_table(dataset_id)).await
    }
}

fn catalog_err(e: rusqlite::Error) -> ResolveError {
    ResolveError::Catalog(e.to_string())
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}
