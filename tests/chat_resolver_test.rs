mod common;

use chat2sql::catalog::SqliteCatalog;
use chat2sql::execution::SqliteExecutor;
use chat2sql::resolution::Phase;
use common::*;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_unknown_chat_fails_at_mapping() {
    let oracle = ScriptedOracle::echoing(SCENARIO_DRAFT);
    let resolver = resolver(scenario_catalog(), oracle.clone(), scenario_executor()).await;

    let response = resolver.resolve_chat_query(SCENARIO_QUERY, 404).await;

    assert_eq!(response.phase, Phase::Mapping);
    assert!(response
        .error
        .as_deref()
        .unwrap()
        .starts_with("Whitelist lookup error"));
    assert!(response.sql.is_none());
    assert!(response.mapping.is_empty());
    assert!(oracle.calls().is_empty());
}

#[tokio::test]
async fn test_chat_bound_to_missing_dataset_fails_at_mapping() {
    let catalog = scenario_catalog();
    catalog.link_chat_dataset(2, 12, 70).unwrap();
    let resolver = resolver(catalog, ScriptedOracle::echoing(SCENARIO_DRAFT), scenario_executor()).await;

    let response = resolver.resolve_chat_query(SCENARIO_QUERY, 2).await;
    assert_eq!(response.phase, Phase::Mapping);
    assert!(response.error.is_some());
}

fn sales_catalog() -> Arc<SqliteCatalog> {
    let catalog = SqliteCatalog::open_in_memory().unwrap();
    catalog.insert_model(1, "orders", "orders").unwrap();
    catalog.insert_model(2, "merchants", "merchants").unwrap();
    catalog.insert_metric(10, 1, "amount", "order amount").unwrap();
    catalog
        .insert_dimension(11, 1, "merchant_id", "merchant id", Some("foreign key"), Some("merchants.id"))
        .unwrap();
    catalog.insert_dimension(20, 2, "name", "merchant name", None, None).unwrap();
    catalog.insert_dataset(5, "sales").unwrap();
    catalog.link_dataset_metric(5, 10).unwrap();
    catalog.link_dataset_dimension(5, 20).unwrap();
    catalog.link_chat_dataset(3, 13, 5).unwrap();
    Arc::new(catalog)
}

fn sales_executor() -> Arc<SqliteExecutor> {
    let executor = SqliteExecutor::open_in_memory().unwrap();
    executor
        .execute_batch(
            "CREATE TABLE orders (id INTEGER, merchant_id INTEGER, amount REAL);
             CREATE TABLE merchants (id INTEGER, name TEXT);
             INSERT INTO merchants VALUES (1, 'acme'), (2, 'globex');
             INSERT INTO orders VALUES (1, 1, 10.0), (2, 1, 5.0), (3, 2, 7.5);",
        )
        .unwrap();
    Arc::new(executor)
}

#[tokio::test]
async fn test_foreign_keys_join_the_dataset() {
    let draft = "select `merchant name`, sum(`order amount`) AS _total_ from sales \
                 group by `merchant name` order by `merchant name`";
    let resolver = resolver(sales_catalog(), ScriptedOracle::echoing(draft), sales_executor()).await;

    let response = resolver
        .resolve_chat_query("order amount by merchant name", 3)
        .await;

    assert_eq!(response.phase, Phase::Done, "{:?}", response.error);
    assert_eq!(
        response.sql.as_deref(),
        Some(
            "select merchants.name, sum(orders.amount) AS _total_ from orders \
             LEFT JOIN merchants ON orders.merchant_id = merchants.id \
             group by merchants.name order by merchants.name"
        )
    );
    assert_eq!(response.rows.len(), 2);
    assert_eq!(response.rows[0]["name"], json!("acme"));
    assert_eq!(response.rows[0]["_total_"], json!(15.0));
    assert_eq!(response.rows[1]["_total_"], json!(7.5));
}

#[tokio::test]
async fn test_rebuild_picks_up_new_terms() {
    let catalog = scenario_catalog();
    let resolver = resolver(
        catalog.clone(),
        ScriptedOracle::echoing("select count(*) from transaction"),
        scenario_executor(),
    )
    .await;
    let before = resolver.index().snapshot();

    catalog.insert_metric(5, 1, "fee_col", "fee").unwrap();
    catalog.link_dataset_metric(7, 5).unwrap();

    let stale = resolver.resolve_chat_query("total fee", 1).await;
    assert!(stale.mapping.is_empty());

    let phrases = resolver.rebuild_index().await.unwrap();
    assert_eq!(phrases, before.len() + 1);

    let fresh = resolver.resolve_chat_query("total fee", 1).await;
    assert_eq!(fresh.mapping.get("fee").map(|f| f.to_string()).as_deref(), Some("_1_5_metric"));
    // snapshots taken earlier are untouched
    assert_eq!(before.len(), phrases - 1);
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let resolver = Arc::new(
        resolver(
            scenario_catalog(),
            ScriptedOracle::echoing(SCENARIO_DRAFT),
            scenario_executor(),
        )
        .await,
    );

    let mut handles = Vec::new();
    for chat_id in [1, 404, 1, 404] {
        let resolver = Arc::clone(&resolver);
        handles.push(tokio::spawn(async move {
            resolver.resolve_chat_query(SCENARIO_QUERY, chat_id).await
        }));
    }

    let mut phases = Vec::new();
    let mut run_ids = Vec::new();
    for handle in handles {
        let response = handle.await.unwrap();
        phases.push(response.phase);
        run_ids.push(response.run_id);
    }
    assert_eq!(phases, vec![Phase::Done, Phase::Mapping, Phase::Done, Phase::Mapping]);
    run_ids.sort();
    run_ids.dedup();
    assert_eq!(run_ids.len(), 4);
}
