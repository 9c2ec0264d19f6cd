use super::QueryLayer;
use crate::catalog::types::Value;
use crate::catalog::{SchemaCache, SchemaRegistry};
use crate::config::QueryLayerConfig;
use crate::namespace::Namespace;
use crate::query::plan::{
    FieldFilter, FieldProjections, FilterOperator, ProjectedField, SingleStateRequest,
    StateRequest,
};
use crate::store::memory::MemoryStore;
use crate::store::{ChangeEvent, ChangeType};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn world() -> Namespace {
    Namespace::world(1, "0xAA")
}

fn fixture() -> (Arc<MemoryStore>, QueryLayer<MemoryStore>) {
    let cache = SchemaCache::default();
    cache
        .register_solidity(
            &Namespace::chain(1),
            "BlockNumber",
            &[("value", "uint256"), ("world_address", "address")],
        )
        .expect("block number");
    cache
        .register_solidity(&world(), "Position", &[("x", "int32"), ("y", "int32")])
        .expect("position");
    cache
        .register_solidity(&world(), "Health", &[("hp", "uint32")])
        .expect("health");
    let store = Arc::new(MemoryStore::with_config(&QueryLayerConfig::default()));
    store.put_table(
        "1",
        "BlockNumber",
        &["world_address", "value"],
        vec![vec![
            Value::Address("0x00000000000000000000000000000000000000aa".into()),
            Value::u256_from_u128(42),
        ]],
    );
    store.put_table(
        "1::0xaa",
        "Position",
        &["y", "x"],
        vec![
            vec![Value::Integer(2), Value::Integer(1)],
            vec![Value::Integer(5), Value::Integer(4)],
        ],
    );
    store.put_table("1::0xaa", "Health", &["hp"], vec![vec![Value::Integer(10)]]);
    let schemas: Arc<dyn SchemaRegistry> = Arc::new(cache);
    let layer = QueryLayer::new(Arc::clone(&store), schemas, QueryLayerConfig::default())
        .expect("layer");
    (store, layer)
}

#[tokio::test]
async fn get_state_merges_chain_and_world_tables() {
    let (store, layer) = fixture();
    let response = layer
        .get_state(&StateRequest::new(world()), &CancellationToken::new())
        .await
        .expect("state");
    assert_eq!(response.chain_tables.len(), 1);
    assert_eq!(response.world_tables.len(), 2);
    let position = response.world_table("Position").expect("position");
    assert_eq!(position.field_names(), vec!["x", "y"]);
    assert_eq!(
        position.rows[0].values,
        vec![Value::Integer(1), Value::Integer(2)]
    );
    let issued = store.issued_queries();
    assert_eq!(issued.len(), 3);
    assert_eq!(
        issued[0],
        r#"SELECT * FROM "1"."BlockNumber" WHERE "world_address" = '0xaa'"#
    );
}

#[tokio::test]
async fn get_state_honours_table_filters() {
    let (store, layer) = fixture();
    let request = StateRequest::new(world())
        .with_chain_tables(["blocknumber"])
        .with_world_tables(["HEALTH"]);
    let response = layer
        .get_state(&request, &CancellationToken::new())
        .await
        .expect("state");
    assert_eq!(response.chain_tables[0].table_name, "BlockNumber");
    assert_eq!(response.world_tables.len(), 1);
    assert_eq!(response.world_tables[0].table_name, "Health");
    assert_eq!(store.issued_queries().len(), 2);
}

#[tokio::test]
async fn get_state_lists_each_table_once_for_case_variant_filters() {
    let (store, layer) = fixture();
    let request = StateRequest::new(world())
        .with_chain_tables(["BlockNumber"])
        .with_world_tables(["Position", "position", "POSITION"]);
    let response = layer
        .get_state(&request, &CancellationToken::new())
        .await
        .expect("state");
    let names = response
        .world_tables
        .iter()
        .map(|t| t.table_name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Position"]);
    assert_eq!(store.issued_queries().len(), 2);
}

#[tokio::test]
async fn get_state_is_gated_on_sync_status() {
    let (store, layer) = fixture();
    store.set_syncing(1, true);
    let err = layer
        .get_state(&StateRequest::new(world()), &CancellationToken::new())
        .await
        .expect_err("syncing");
    assert_eq!(err.code_str(), "sync_in_progress");
    assert!(err.code().is_retryable());
    assert!(store.issued_queries().is_empty());
}

#[tokio::test]
async fn get_state_rejects_bad_namespaces_and_unknown_tables() {
    let (store, layer) = fixture();
    let cancel = CancellationToken::new();
    let err = layer
        .get_state(&StateRequest::new(Namespace::chain(1)), &cancel)
        .await
        .expect_err("no world");
    assert_eq!(err.code_str(), "invalid_namespace");

    let request = StateRequest::new(world()).with_world_tables(["Inventory"]);
    let err = layer.get_state(&request, &cancel).await.expect_err("unknown");
    assert_eq!(err.code_str(), "unknown_table");
    assert!(store.issued_queries().len() <= 1);
}

#[tokio::test]
async fn get_state_is_all_or_nothing() {
    let (store, layer) = fixture();
    store.fail_queries_for("Position", "relation is locked");
    let err = layer
        .get_state(&StateRequest::new(world()), &CancellationToken::new())
        .await
        .expect_err("store failure");
    assert_eq!(err.code_str(), "execution");
    assert_eq!(store.open_cursors(), 0);
}

#[tokio::test]
async fn single_state_filters_and_projects() {
    let (store, layer) = fixture();
    let request = SingleStateRequest::new(world(), "position")
        .with_filter(FieldFilter::new("X", FilterOperator::Gte, vec![Value::Integer(1)]))
        .with_projection(ProjectedField::renamed("y", "north"));
    let response = layer
        .get_single_state(&request, &CancellationToken::new())
        .await
        .expect("single");
    let table = response.world_table("Position").expect("world table");
    assert_eq!(table.field_names(), vec!["north"]);
    assert_eq!(table.rows.len(), 2);
    assert_eq!(
        store.issued_queries()[0],
        r#"SELECT "y" FROM "1::0xaa"."Position" WHERE "x" >= 1"#
    );
}

#[tokio::test]
async fn single_state_of_chain_table_needs_no_world() {
    let (_store, layer) = fixture();
    let request = SingleStateRequest::new(Namespace::chain(1), "BlockNumber");
    let response = layer
        .get_single_state(&request, &CancellationToken::new())
        .await
        .expect("chain table");
    assert!(response.world_tables.is_empty());
    assert_eq!(response.chain_tables[0].rows.len(), 1);

    let request = SingleStateRequest::new(Namespace::chain(1), "Position");
    let err = layer
        .get_single_state(&request, &CancellationToken::new())
        .await
        .expect_err("world table without world");
    assert_eq!(err.code_str(), "invalid_namespace");
}

#[tokio::test]
async fn single_state_cross_checks_fields_against_schema() {
    let (store, layer) = fixture();
    let request = SingleStateRequest::new(world(), "Position")
        .with_filter(FieldFilter::equals("z", Value::Integer(1)));
    let err = layer
        .get_single_state(&request, &CancellationToken::new())
        .await
        .expect_err("unknown field");
    assert_eq!(err.code_str(), "invalid_filter");

    let request = SingleStateRequest::new(world(), "Missing");
    let err = layer
        .get_single_state(&request, &CancellationToken::new())
        .await
        .expect_err("no schema");
    assert_eq!(err.code_str(), "schema_not_found");
    assert!(store.issued_queries().is_empty());
}

#[tokio::test]
async fn execute_sql_uses_supplied_schema() {
    let (_store, layer) = fixture();
    let schema = layer
        .schemas()
        .table_schema(1, Some("0xaa"), "Health")
        .expect("schema");
    let table = layer
        .execute_sql(
            r#"SELECT * FROM "1::0xaa"."Health""#,
            &schema,
            &FieldProjections::default(),
            &CancellationToken::new(),
        )
        .await
        .expect("sql");
    assert_eq!(table.rows[0].values, vec![Value::Integer(10)]);
}

async fn wait_for_subscribers(store: &MemoryStore, expected: usize) {
    for _ in 0..200 {
        if store.subscriber_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {expected} subscribers, found {}", store.subscriber_count());
}

#[tokio::test]
async fn stream_state_flushes_per_block_and_unsubscribes_on_cancel() {
    let (store, layer) = fixture();
    let layer = Arc::new(layer);
    let (tx, mut rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let task = {
        let layer = Arc::clone(&layer);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            layer
                .stream_state(&StateRequest::new(world()), tx, cancel)
                .await
        })
    };
    wait_for_subscribers(&store, 1).await;

    store
        .publish(ChangeEvent::new(
            Namespace::world(1, "0xaa"),
            "Position",
            ChangeType::Insert,
            serde_json::json!({"x": 1, "y": 2}),
        ))
        .await;
    store
        .publish(ChangeEvent::new(
            Namespace::chain(1),
            "BlockNumber",
            ChangeType::Update,
            serde_json::json!({"value": 43}),
        ))
        .await;
    let batch = rx.recv().await.expect("batch");
    assert_eq!(batch.inserted_world_tables[0].table_name, "Position");
    assert_eq!(batch.updated_chain_tables[0].table_name, "BlockNumber");

    cancel.cancel();
    task.await.expect("join").expect("clean exit");
    assert_eq!(store.subscriber_count(), 0);
}

#[tokio::test]
async fn single_stream_state_applies_row_filter() {
    let (store, layer) = fixture();
    let layer = Arc::new(layer);
    let (tx, mut rx) = mpsc::channel(8);
    let request = SingleStateRequest::new(world(), "Position")
        .with_filter(FieldFilter::new("x", FilterOperator::Gt, vec![Value::Integer(3)]));
    let task = {
        let layer = Arc::clone(&layer);
        tokio::spawn(async move {
            layer
                .single_stream_state(&request, tx, CancellationToken::new())
                .await
        })
    };
    wait_for_subscribers(&store, 1).await;

    for x in [1, 5] {
        store
            .publish(ChangeEvent::new(
                Namespace::world(1, "0xaa"),
                "Position",
                ChangeType::Update,
                serde_json::json!({"x": x, "y": 0}),
            ))
            .await;
    }
    store
        .publish(ChangeEvent::new(
            Namespace::world(1, "0xaa"),
            "Health",
            ChangeType::Update,
            serde_json::json!({"hp": 1}),
        ))
        .await;
    store
        .publish(ChangeEvent::new(
            Namespace::chain(1),
            "BlockNumber",
            ChangeType::Update,
            serde_json::json!({"value": 44}),
        ))
        .await;
    let batch = rx.recv().await.expect("batch");
    assert_eq!(batch.updated_world_tables.len(), 1);
    assert_eq!(
        batch.updated_world_tables[0].rows[0].values,
        vec![Value::Integer(5), Value::Integer(0)]
    );

    drop(rx);
    task.await.expect("join").expect("sink closed");
    assert_eq!(store.subscriber_count(), 0);
}

#[tokio::test]
async fn stream_state_is_gated_on_sync_status() {
    let (store, layer) = fixture();
    store.set_syncing(1, true);
    let (tx, _rx) = mpsc::channel(1);
    let err = layer
        .stream_state(&StateRequest::new(world()), tx, CancellationToken::new())
        .await
        .expect_err("syncing");
    assert_eq!(err.code_str(), "sync_in_progress");
    assert_eq!(store.subscriber_count(), 0);
}
