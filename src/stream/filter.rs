use crate::catalog::SchemaRegistry;
use crate::catalog::schema::TableSchema;
use crate::config::DEFAULT_WORLD_ADDRESS_COLUMN;
use crate::namespace::Namespace;
use crate::query::plan::{FieldFilter, FieldProjections};
use crate::store::{ChangeEvent, ChangeType};
use crate::table::GenericTable;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
enum TableScope {
    All,
    Only(BTreeSet<String>),
    Nothing,
}

impl TableScope {
    /// An empty request filter means every table.
    fn from_filter(filter: &BTreeSet<String>) -> Self {
        if filter.is_empty() {
            TableScope::All
        } else {
            TableScope::Only(filter.iter().map(|t| t.to_ascii_lowercase()).collect())
        }
    }

    fn contains(&self, table_name: &str) -> bool {
        match self {
            TableScope::All => true,
            TableScope::Only(tables) => tables.contains(&table_name.to_ascii_lowercase()),
            TableScope::Nothing => false,
        }
    }
}

/// Decides, once per subscription, which feed events belong to it.
#[derive(Debug, Clone)]
pub struct StreamFilter {
    namespace: Namespace,
    chain_scope: TableScope,
    world_scope: TableScope,
    world_address_column: String,
    predicates: Vec<FieldFilter>,
    projections: FieldProjections,
}

impl StreamFilter {
    /// Multi-table filter. Empty table sets admit every table of that scope.
    pub fn all(
        namespace: &Namespace,
        chain_tables: &BTreeSet<String>,
        world_tables: &BTreeSet<String>,
    ) -> Self {
        Self {
            namespace: namespace.clone(),
            chain_scope: TableScope::from_filter(chain_tables),
            world_scope: TableScope::from_filter(world_tables),
            world_address_column: DEFAULT_WORLD_ADDRESS_COLUMN.to_string(),
            predicates: Vec::new(),
            projections: FieldProjections::default(),
        }
    }

    /// One-table filter. `predicates` and `projections` must already be
    /// resolved against `schema`.
    pub fn single(
        namespace: &Namespace,
        schema: &TableSchema,
        is_internal: bool,
        predicates: Vec<FieldFilter>,
        projections: FieldProjections,
    ) -> Self {
        let only = TableScope::Only(BTreeSet::from([schema.table_name.to_ascii_lowercase()]));
        let (chain_scope, world_scope) = if is_internal {
            (only, TableScope::Nothing)
        } else {
            (TableScope::Nothing, only)
        };
        Self {
            namespace: namespace.clone(),
            chain_scope,
            world_scope,
            world_address_column: DEFAULT_WORLD_ADDRESS_COLUMN.to_string(),
            predicates,
            projections,
        }
    }

    pub fn with_world_address_column(mut self, column: &str) -> Self {
        self.world_address_column = column.to_string();
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn projections(&self) -> &FieldProjections {
        &self.projections
    }

    pub fn admits(&self, event: &ChangeEvent, schemas: &dyn SchemaRegistry) -> bool {
        if event.namespace.chain_id != self.namespace.chain_id {
            return false;
        }
        let table = event.table_name.as_str();
        if schemas.is_block_number_table(self.namespace.chain_id, table) {
            return true;
        }
        if schemas.is_internal_table(table) {
            return self.chain_scope.contains(table) && self.owned_by_world(event);
        }
        match (self.namespace.address(), event.namespace.address()) {
            (Some(ours), Some(theirs)) if ours.eq_ignore_ascii_case(theirs) => {
                self.world_scope.contains(table)
            }
            _ => false,
        }
    }

    /// Chain-level rows tagged with another world's address are skipped.
    fn owned_by_world(&self, event: &ChangeEvent) -> bool {
        let Some(ours) = self.namespace.address() else {
            return true;
        };
        let tagged = event
            .row
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&self.world_address_column))
            .and_then(|(_, v)| v.as_str());
        match tagged {
            Some(theirs) => ours.eq_ignore_ascii_case(theirs.trim()),
            None => true,
        }
    }

    /// Evaluates row predicates on a table serialized without projection.
    /// Delete events often carry only key fields, so predicates on fields the
    /// event does not carry are skipped for deletes.
    pub fn row_matches(&self, event: &ChangeEvent, table: &GenericTable) -> bool {
        if self.predicates.is_empty() {
            return true;
        }
        let Some(row) = table.rows.first() else {
            return false;
        };
        self.predicates.iter().all(|predicate| {
            let Some(idx) = table
                .fields
                .iter()
                .position(|f| f.name.eq_ignore_ascii_case(&predicate.field))
            else {
                return false;
            };
            if event.change_type == ChangeType::Delete
                && !event
                    .row
                    .keys()
                    .any(|k| k.eq_ignore_ascii_case(&predicate.field))
            {
                return true;
            }
            row.values
                .get(idx)
                .is_some_and(|value| predicate.matches(value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::StreamFilter;
    use crate::catalog::SchemaCache;
    use crate::catalog::schema::{FieldDef, TableSchema};
    use crate::catalog::types::{FieldType, Value};
    use crate::namespace::Namespace;
    use crate::query::plan::{FieldFilter, FieldProjections, FilterOperator};
    use crate::store::{ChangeEvent, ChangeType};
    use crate::table::serializer::serialize_change_event;
    use std::collections::BTreeSet;

    fn event(ns: Namespace, table: &str, row: serde_json::Value) -> ChangeEvent {
        ChangeEvent::new(ns, table, ChangeType::Insert, row)
    }

    #[test]
    fn world_events_need_matching_chain_and_address() {
        let cache = SchemaCache::default();
        let filter = StreamFilter::all(&Namespace::world(1, "0xAA"), &BTreeSet::new(), &BTreeSet::new());
        let json = serde_json::json!({});
        assert!(filter.admits(&event(Namespace::world(1, "0xaa"), "Position", json.clone()), &cache));
        assert!(!filter.admits(&event(Namespace::world(1, "0xbb"), "Position", json.clone()), &cache));
        assert!(!filter.admits(&event(Namespace::world(2, "0xaa"), "Position", json.clone()), &cache));
        assert!(!filter.admits(&event(Namespace::chain(1), "Position", json), &cache));
    }

    #[test]
    fn table_filters_apply_per_scope_but_checkpoint_always_passes() {
        let cache = SchemaCache::default();
        let filter = StreamFilter::all(
            &Namespace::world(1, "0xaa"),
            &BTreeSet::from(["SyncStatus".to_string()]),
            &BTreeSet::from(["position".to_string()]),
        );
        let json = serde_json::json!({});
        assert!(filter.admits(&event(Namespace::world(1, "0xaa"), "Position", json.clone()), &cache));
        assert!(!filter.admits(&event(Namespace::world(1, "0xaa"), "Health", json.clone()), &cache));
        assert!(filter.admits(&event(Namespace::chain(1), "SyncStatus", json.clone()), &cache));
        assert!(filter.admits(&event(Namespace::chain(1), "BlockNumber", json.clone()), &cache));
        assert!(!filter.admits(&event(Namespace::chain(2), "BlockNumber", json), &cache));
    }

    #[test]
    fn chain_rows_of_other_worlds_are_skipped() {
        let cache = SchemaCache::default();
        let filter = StreamFilter::all(&Namespace::world(1, "0xaa"), &BTreeSet::new(), &BTreeSet::new());
        let ours = event(Namespace::chain(1), "SyncStatus", serde_json::json!({"world_address": "0xAA"}));
        let theirs = event(Namespace::chain(1), "SyncStatus", serde_json::json!({"world_address": "0xbb"}));
        assert!(filter.admits(&ours, &cache));
        assert!(!filter.admits(&theirs, &cache));
    }

    #[test]
    fn single_filter_evaluates_predicates() {
        let cache = SchemaCache::default();
        let schema = TableSchema::new(
            "1::0xaa",
            "Position",
            vec![
                FieldDef::new("id", FieldType::Integer),
                FieldDef::new("x", FieldType::Integer),
            ],
        )
        .expect("schema");
        let predicate = FieldFilter::new("x", FilterOperator::Gt, vec![Value::Integer(3)]);
        let ns = Namespace::world(1, "0xaa");
        let filter = StreamFilter::single(&ns, &schema, false, vec![predicate], FieldProjections::default());
        assert!(!filter.admits(&event(ns.clone(), "Health", serde_json::json!({})), &cache));

        let hit = event(ns.clone(), "Position", serde_json::json!({"id": 1, "x": 5}));
        let miss = event(ns.clone(), "Position", serde_json::json!({"id": 1, "x": 2}));
        let keyed_delete = ChangeEvent::new(ns, "Position", ChangeType::Delete, serde_json::json!({"id": 1}));
        for (ev, expected) in [(hit, true), (miss, false), (keyed_delete, true)] {
            assert!(filter.admits(&ev, &cache));
            let table = serialize_change_event(&ev, &schema, &FieldProjections::default())
                .expect("serialize");
            assert_eq!(filter.row_matches(&ev, &table), expected);
        }
    }
}
