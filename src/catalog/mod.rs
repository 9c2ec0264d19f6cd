pub mod schema;
pub mod types;

use crate::catalog::schema::{FieldDef, TableSchema};
use crate::catalog::types::FieldType;
use crate::config::InternalTables;
use crate::error::ModeError;
use crate::namespace::Namespace;
use im::HashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Read access to table schemas, shared by snapshot requests and every
/// streaming subscription.
pub trait SchemaRegistry: Send + Sync {
    /// Resolves a table in the namespace it lives in: chain-level tables in
    /// the chain namespace, all others in the world namespace.
    fn table_schema(
        &self,
        chain_id: u64,
        world_address: Option<&str>,
        table_name: &str,
    ) -> Result<Arc<TableSchema>, ModeError>;

    /// Canonical names of every table registered under `namespace_key`.
    fn all_tables(&self, namespace_key: &str) -> Result<Vec<String>, ModeError>;

    fn is_internal_table(&self, table_name: &str) -> bool;

    fn is_block_number_table(&self, chain_id: u64, table_name: &str) -> bool;
}

type TableKey = (String, String);

fn table_key(namespace_key: &str, table_name: &str) -> TableKey {
    (namespace_key.to_string(), table_name.to_ascii_lowercase())
}

/// Process-wide schema cache. Entries are whole `Arc<TableSchema>` values in
/// a persistent map, so a reader racing a re-registration sees either the
/// old or the new schema.
#[derive(Debug)]
pub struct SchemaCache {
    tables: RwLock<HashMap<TableKey, Arc<TableSchema>>>,
    internal: InternalTables,
    generation: AtomicU64,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(InternalTables::default())
    }
}

impl SchemaCache {
    pub fn new(internal: InternalTables) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            internal,
            generation: AtomicU64::new(0),
        }
    }

    /// Incremented on every registration or drop.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn register(&self, schema: TableSchema) -> Result<Arc<TableSchema>, ModeError> {
        schema.validate()?;
        let namespace = Namespace::parse_key(&schema.namespace)?;
        let namespace_key = namespace.key();
        if namespace.is_world() == self.internal.is_internal(&schema.table_name) {
            return Err(ModeError::InvalidNamespace(format!(
                "table '{}' cannot be registered in namespace '{namespace_key}'",
                schema.table_name
            )));
        }
        let key = table_key(&namespace_key, &schema.table_name);
        let schema = Arc::new(TableSchema {
            namespace: namespace_key,
            ..schema
        });
        self.tables.write().insert(key, Arc::clone(&schema));
        self.generation.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(
            namespace = %schema.namespace,
            table = %schema.table_name,
            fields = schema.fields.len(),
            "schema registered"
        );
        Ok(schema)
    }

    /// Registers a table whose fields are declared with Solidity type names.
    pub fn register_solidity(
        &self,
        namespace: &Namespace,
        table_name: &str,
        fields: &[(&str, &str)],
    ) -> Result<Arc<TableSchema>, ModeError> {
        let fields = fields
            .iter()
            .map(|(name, raw)| {
                FieldType::parse(raw)
                    .map(|ty| FieldDef::new(*name, ty))
                    .ok_or_else(|| {
                        ModeError::InvalidQuery(format!(
                            "unsupported type '{raw}' for field '{name}' of '{table_name}'"
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.register(TableSchema::new(namespace.key(), table_name, fields)?)
    }

    pub fn drop_table(&self, namespace_key: &str, table_name: &str) -> bool {
        let removed = self
            .tables
            .write()
            .remove(&table_key(namespace_key, table_name))
            .is_some();
        if removed {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        removed
    }

    pub fn drop_namespace(&self, namespace_key: &str) -> usize {
        let mut tables = self.tables.write();
        let before = tables.len();
        tables.retain(|key, _| key.0 != namespace_key);
        let removed = before - tables.len();
        if removed > 0 {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }

    fn lookup(&self, namespace_key: &str, table_name: &str) -> Option<Arc<TableSchema>> {
        self.tables
            .read()
            .get(&table_key(namespace_key, table_name))
            .cloned()
    }
}

impl SchemaRegistry for SchemaCache {
    fn table_schema(
        &self,
        chain_id: u64,
        world_address: Option<&str>,
        table_name: &str,
    ) -> Result<Arc<TableSchema>, ModeError> {
        let namespace = if self.is_internal_table(table_name) {
            Namespace::chain(chain_id)
        } else {
            Namespace {
                chain_id,
                world_address: world_address.map(str::to_string),
            }
        };
        let namespace_key = namespace.key();
        self.lookup(&namespace_key, table_name)
            .ok_or_else(|| ModeError::SchemaNotFound {
                namespace: namespace_key,
                table: table_name.to_string(),
            })
    }

    fn all_tables(&self, namespace_key: &str) -> Result<Vec<String>, ModeError> {
        let tables = self.tables.read();
        let mut names = tables
            .iter()
            .filter(|(key, _)| key.0 == namespace_key)
            .map(|(_, schema)| schema.table_name.clone())
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    fn is_internal_table(&self, table_name: &str) -> bool {
        self.internal.is_internal(table_name)
    }

    fn is_block_number_table(&self, chain_id: u64, table_name: &str) -> bool {
        self.internal.is_block_number(chain_id, table_name)
    }
}

#[cfg(test)]
mod tests {
    use super::{SchemaCache, SchemaRegistry};
    use crate::catalog::schema::{FieldDef, TableSchema};
    use crate::catalog::types::FieldType;
    use crate::namespace::Namespace;
    use std::sync::Arc;

    fn seeded() -> SchemaCache {
        let cache = SchemaCache::default();
        let world = Namespace::world(1, "0xAA");
        cache
            .register_solidity(&world, "Position", &[("x", "int32"), ("y", "int32")])
            .expect("position");
        cache
            .register_solidity(&Namespace::chain(1), "BlockNumber", &[("value", "uint256")])
            .expect("block number");
        cache
    }

    #[test]
    fn lookup_routes_internal_tables_to_chain_namespace() {
        let cache = seeded();
        let block = cache
            .table_schema(1, Some("0xaa"), "blocknumber")
            .expect("block number");
        assert_eq!(block.table_name, "BlockNumber");
        assert_eq!(block.namespace, "1");

        let position = cache
            .table_schema(1, Some("0xAA"), "POSITION")
            .expect("position");
        assert_eq!(position.table_name, "Position");
        assert_eq!(position.namespace, "1::0xaa");
    }

    #[test]
    fn unknown_table_is_schema_not_found() {
        let cache = seeded();
        let err = cache
            .table_schema(1, Some("0xaa"), "Inventory")
            .expect_err("unknown");
        assert_eq!(err.code_str(), "schema_not_found");
        let err = cache
            .table_schema(2, Some("0xaa"), "Position")
            .expect_err("other chain");
        assert_eq!(err.code_str(), "schema_not_found");
    }

    #[test]
    fn all_tables_is_scoped_to_namespace() {
        let cache = seeded();
        assert_eq!(cache.all_tables("1::0xaa").expect("world"), vec!["Position"]);
        assert_eq!(cache.all_tables("1").expect("chain"), vec!["BlockNumber"]);
        assert!(cache.all_tables("2").expect("empty").is_empty());
    }

    #[test]
    fn chain_tables_cannot_live_in_world_namespace() {
        let cache = SchemaCache::default();
        let err = cache
            .register_solidity(&Namespace::world(1, "0xaa"), "BlockNumber", &[("value", "uint256")])
            .expect_err("misplaced");
        assert_eq!(err.code_str(), "invalid_namespace");
        let err = cache
            .register_solidity(&Namespace::chain(1), "Position", &[("x", "int32")])
            .expect_err("misplaced");
        assert_eq!(err.code_str(), "invalid_namespace");
    }

    #[test]
    fn reregistration_replaces_whole_schema_and_bumps_generation() {
        let cache = seeded();
        let before = cache.generation();
        let old = cache
            .table_schema(1, Some("0xaa"), "Position")
            .expect("old");
        cache
            .register(
                TableSchema::new(
                    "1::0xaa",
                    "Position",
                    vec![
                        FieldDef::new("x", FieldType::Integer),
                        FieldDef::new("y", FieldType::Integer),
                        FieldDef::new("z", FieldType::Integer),
                    ],
                )
                .expect("schema"),
            )
            .expect("register");
        let new = cache
            .table_schema(1, Some("0xaa"), "Position")
            .expect("new");
        assert_eq!(old.fields.len(), 2);
        assert_eq!(new.fields.len(), 3);
        assert!(cache.generation() > before);
    }

    #[test]
    fn drop_table_and_namespace() {
        let cache = seeded();
        assert!(cache.drop_table("1::0xaa", "position"));
        assert!(!cache.drop_table("1::0xaa", "position"));
        assert_eq!(cache.drop_namespace("1"), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_readers_never_observe_partial_schema() {
        let cache = Arc::new(seeded());
        let writer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..200 {
                    let width = 2 + (i % 3);
                    let fields = (0..width)
                        .map(|f| FieldDef::new(format!("f{f}"), FieldType::Integer))
                        .collect();
                    cache
                        .register(TableSchema::new("1::0xaa", "Position", fields).expect("schema"))
                        .expect("register");
                }
            })
        };
        let readers = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let schema = cache
                            .table_schema(1, Some("0xaa"), "Position")
                            .expect("present");
                        schema.validate().expect("whole schema");
                        assert!(schema.fields.len() >= 2);
                    }
                })
            })
            .collect::<Vec<_>>();
        writer.join().expect("writer");
        for reader in readers {
            reader.join().expect("reader");
        }
    }
}
