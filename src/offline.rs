//! File-based tooling: schema files, recorded feeds and replay through the
//! streaming coordinator without a live store.

use crate::catalog::{SchemaCache, SchemaRegistry};
use crate::config::QueryLayerConfig;
use crate::error::ModeError;
use crate::namespace::{Namespace, RequestKind};
use crate::query::builder::QueryBuilder;
use crate::query::plan::StateRequest;
use crate::store::ChangeEvent;
use crate::stream::{StreamCoordinator, StreamFilter};
use crate::table::response::QueryLayerStateStreamResponse;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaFileField {
    pub name: String,
    /// Solidity type name, e.g. `uint256`, `address`, `bytes32`.
    #[serde(rename = "type")]
    pub field_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaFileTable {
    /// Namespace key, `"<chain>"` or `"<chain>::<world>"`.
    pub namespace: String,
    pub table: String,
    pub fields: Vec<SchemaFileField>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaFile {
    pub tables: Vec<SchemaFileTable>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub events: usize,
    pub flushes: Vec<QueryLayerStateStreamResponse>,
    /// Rows buffered after the last checkpoint of the feed, never flushed.
    pub pending_rows: usize,
}

pub fn load_config(path: &Path) -> Result<QueryLayerConfig, ModeError> {
    let bytes = fs::read(path)?;
    let config: QueryLayerConfig = serde_json::from_slice(&bytes)
        .map_err(|e| ModeError::Decode(format!("{}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

pub fn load_schema_file(path: &Path, config: &QueryLayerConfig) -> Result<SchemaCache, ModeError> {
    let bytes = fs::read(path)?;
    let file: SchemaFile = serde_json::from_slice(&bytes)
        .map_err(|e| ModeError::Decode(format!("{}: {e}", path.display())))?;
    schema_cache_from(&file, config)
}

pub fn schema_cache_from(
    file: &SchemaFile,
    config: &QueryLayerConfig,
) -> Result<SchemaCache, ModeError> {
    let cache = SchemaCache::new(config.internal_tables.clone());
    for table in &file.tables {
        let namespace = Namespace::parse_key(&table.namespace)?;
        let fields = table
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.field_type.as_str()))
            .collect::<Vec<_>>();
        cache.register_solidity(&namespace, &table.table, &fields)?;
    }
    Ok(cache)
}

/// Reads newline-delimited JSON change events. Blank lines are skipped.
pub fn read_feed(path: &Path) -> Result<Vec<ChangeEvent>, ModeError> {
    let text = fs::read_to_string(path)?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|e| {
                ModeError::Decode(format!("{} line {}: {e}", path.display(), idx + 1))
            })
        })
        .collect()
}

/// Runs `events` through one subscription's coordinator and collects every
/// flushed batch.
pub fn replay_feed(
    schemas: Arc<dyn SchemaRegistry>,
    events: &[ChangeEvent],
    request: &StateRequest,
    config: &QueryLayerConfig,
) -> Result<ReplayReport, ModeError> {
    request.namespace.validate(RequestKind::State)?;
    let namespace = request.namespace.normalized()?;
    let filter = StreamFilter::all(&namespace, &request.chain_tables, &request.world_tables)
        .with_world_address_column(&config.world_address_column);
    let mut coordinator = StreamCoordinator::new(schemas, filter, config);
    let mut flushes = Vec::new();
    for event in events {
        if let Some(batch) = coordinator.process(event)? {
            flushes.push(batch);
        }
    }
    Ok(ReplayReport {
        events: events.len(),
        flushes,
        pending_rows: coordinator.buffered_rows(),
    })
}

pub fn replay_files(
    schema_path: &Path,
    feed_path: &Path,
    request: &StateRequest,
    config: &QueryLayerConfig,
) -> Result<ReplayReport, ModeError> {
    let schemas: Arc<dyn SchemaRegistry> = Arc::new(load_schema_file(schema_path, config)?);
    let events = read_feed(feed_path)?;
    replay_feed(schemas, &events, request, config)
}

/// Find-all statements for `tables` in `namespace_key`, scoped to
/// `world_key` when given.
pub fn build_sql(
    namespace_key: &str,
    world_key: Option<&str>,
    tables: &[String],
    filter: &BTreeSet<String>,
    config: &QueryLayerConfig,
) -> Result<Vec<String>, ModeError> {
    let query_namespace = Namespace::parse_key(namespace_key)?;
    let world_namespace = match world_key {
        Some(key) => Namespace::parse_key(key)?,
        None => query_namespace.clone(),
    };
    let builder = QueryBuilder::find_all(&query_namespace.key(), &world_namespace, tables, filter)?
        .with_world_address_column(&config.world_address_column);
    let (queries, _) = builder.to_sql_list()?;
    Ok(queries)
}
