use crate::catalog::schema::TableSchema;
use crate::table::GenericTable;
use std::collections::HashMap;

/// Per-table accumulators for one change type, split into chain-level and
/// world tables. Tables keep first-seen order; rows keep delivery order.
#[derive(Debug, Clone, Default)]
pub struct EventBuffer {
    chain_tables: Vec<GenericTable>,
    world_tables: Vec<GenericTable>,
    chain_index: HashMap<String, usize>,
    world_index: HashMap<String, usize>,
    rows: usize,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chain_table(&mut self, table: GenericTable, schema: &TableSchema) {
        self.rows += table.row_count();
        append(&mut self.chain_tables, &mut self.chain_index, table, schema);
    }

    pub fn add_world_table(&mut self, table: GenericTable, schema: &TableSchema) {
        self.rows += table.row_count();
        append(&mut self.world_tables, &mut self.world_index, table, schema);
    }

    pub fn chain_tables(&self) -> &[GenericTable] {
        &self.chain_tables
    }

    pub fn world_tables(&self) -> &[GenericTable] {
        &self.world_tables
    }

    pub fn is_empty(&self) -> bool {
        self.chain_tables.is_empty() && self.world_tables.is_empty()
    }

    /// Rows held across both scopes.
    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn clear(&mut self) {
        self.chain_tables.clear();
        self.world_tables.clear();
        self.chain_index.clear();
        self.world_index.clear();
        self.rows = 0;
    }
}

fn append(
    tables: &mut Vec<GenericTable>,
    index: &mut HashMap<String, usize>,
    table: GenericTable,
    schema: &TableSchema,
) {
    let key = schema.table_name.to_ascii_lowercase();
    match index.get(&key) {
        Some(&slot) => tables[slot].rows.extend(table.rows),
        None => {
            index.insert(key, tables.len());
            tables.push(GenericTable {
                table_name: schema.table_name.clone(),
                ..table
            });
        }
    }
}
