use modeql::config::QueryLayerConfig;
use modeql::namespace::Namespace;
use modeql::offline;
use modeql::query::plan::StateRequest;
use std::collections::BTreeSet;
use std::fs;
use tempfile::tempdir;

const SCHEMAS: &str = r#"{
  "tables": [
    {"namespace": "1", "table": "BlockNumber", "fields": [{"name": "value", "type": "uint256"}]},
    {"namespace": "1::0xaa", "table": "Position", "fields": [
      {"name": "x", "type": "int32"}, {"name": "y", "type": "int32"}
    ]}
  ]
}"#;

#[test]
fn replay_emits_one_batch_per_checkpoint() {
    let dir = tempdir().expect("dir");
    let schema_path = dir.path().join("schemas.json");
    let feed_path = dir.path().join("feed.ndjson");
    fs::write(&schema_path, SCHEMAS).expect("schemas");
    let feed = [
        r#"{"namespace":{"chain_id":1,"world_address":"0xaa"},"table_name":"Position","change_type":"Insert","row":{"x":1,"y":2}}"#,
        r#"{"namespace":{"chain_id":1,"world_address":"0xaa"},"table_name":"Position","change_type":"Update","row":{"x":3,"y":2}}"#,
        "",
        r#"{"namespace":{"chain_id":1},"table_name":"BlockNumber","change_type":"Insert","row":{"value":42}}"#,
        r#"{"namespace":{"chain_id":1},"table_name":"BlockNumber","change_type":"Insert","row":{"value":43}}"#,
        r#"{"namespace":{"chain_id":1,"world_address":"0xaa"},"table_name":"Position","change_type":"Delete","row":{"x":3}}"#,
    ]
    .join("\n");
    fs::write(&feed_path, feed).expect("feed");

    let report = offline::replay_files(
        &schema_path,
        &feed_path,
        &StateRequest::new(Namespace::world(1, "0xAA")),
        &QueryLayerConfig::default(),
    )
    .expect("replay");
    assert_eq!(report.events, 5);
    assert_eq!(report.flushes.len(), 2);
    assert_eq!(report.flushes[0].inserted_world_tables[0].row_count(), 1);
    assert_eq!(report.flushes[0].updated_world_tables[0].row_count(), 1);
    assert_eq!(report.flushes[1].row_count(), 1);
    assert_eq!(report.pending_rows, 1);
}

#[test]
fn malformed_feed_line_is_reported_with_its_number() {
    let dir = tempdir().expect("dir");
    let feed_path = dir.path().join("feed.ndjson");
    fs::write(&feed_path, "{}\nnot json\n").expect("feed");
    let err = offline::read_feed(&feed_path).expect_err("malformed");
    assert_eq!(err.code_str(), "decode");
    assert!(err.to_string().contains("line 1"));
}

#[test]
fn config_file_is_validated() {
    let dir = tempdir().expect("dir");
    let path = dir.path().join("config.json");
    fs::write(&path, r#"{"max_buffered_rows": 0}"#).expect("config");
    let err = offline::load_config(&path).expect_err("zero rows");
    assert_eq!(err.code_str(), "invalid_config");

    fs::write(&path, r#"{"overflow_policy": "DropEvents", "log_queries": false}"#)
        .expect("config");
    let config = offline::load_config(&path).expect("config");
    assert!(!config.log_queries);
    assert_eq!(config.internal_tables.block_number_table, "BlockNumber");
}

#[test]
fn sql_command_scopes_chain_tables_to_the_world() {
    let queries = offline::build_sql(
        "1",
        Some("1::0xAA"),
        &["BlockNumber".to_string(), "SyncStatus".to_string()],
        &BTreeSet::from(["blocknumber".to_string()]),
        &QueryLayerConfig::default(),
    )
    .expect("sql");
    assert_eq!(
        queries,
        vec![r#"SELECT * FROM "1"."BlockNumber" WHERE "world_address" = '0xaa'"#.to_string()]
    );
}
