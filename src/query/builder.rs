//! Compiles state requests into SQL.
//!
//! Builders are pure: they read the request and the set of known table names
//! handed to them and never touch the store or the schema cache.

use crate::config::DEFAULT_WORLD_ADDRESS_COLUMN;
use crate::error::ModeError;
use crate::namespace::Namespace;
use crate::query::plan::{FieldFilter, FieldProjections, SingleStateRequest};
use crate::query::sql::{qualified_table, quote_ident, quote_literal, render_filter};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderKind {
    /// Every (or every filtered) table of a namespace, one statement each.
    FindAll,
    /// One table with optional filter and projection.
    FindOne,
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
    kind: BuilderKind,
    namespace_key: String,
    tables: Vec<String>,
    /// World address that rows of chain-level tables are scoped to.
    world_scope: Option<String>,
    world_address_column: String,
    filter: Vec<FieldFilter>,
    projections: FieldProjections,
}

impl QueryBuilder {
    /// Targets every known table when `table_filter` is empty, otherwise the
    /// filtered tables, each of which must be known. Matching is
    /// case-insensitive; targets carry the known set's casing and appear once.
    pub fn find_all(
        query_namespace_key: &str,
        world_namespace: &Namespace,
        known_tables: &[String],
        table_filter: &BTreeSet<String>,
    ) -> Result<Self, ModeError> {
        let tables = if table_filter.is_empty() {
            let mut all = known_tables.to_vec();
            all.sort();
            all.dedup();
            all
        } else {
            table_filter
                .iter()
                .map(|requested| {
                    known_tables
                        .iter()
                        .find(|known| known.eq_ignore_ascii_case(requested))
                        .cloned()
                        .ok_or_else(|| ModeError::UnknownTable {
                            namespace: query_namespace_key.to_string(),
                            table: requested.clone(),
                        })
                })
                .collect::<Result<BTreeSet<_>, _>>()?
                .into_iter()
                .collect()
        };
        let world_scope = if world_namespace.key() != query_namespace_key {
            world_namespace.address().map(str::to_ascii_lowercase)
        } else {
            None
        };
        Ok(Self {
            kind: BuilderKind::FindAll,
            namespace_key: query_namespace_key.to_string(),
            tables,
            world_scope,
            world_address_column: DEFAULT_WORLD_ADDRESS_COLUMN.to_string(),
            filter: Vec::new(),
            projections: FieldProjections::default(),
        })
    }

    pub fn find_one(request: &SingleStateRequest, namespace_key: &str) -> Result<Self, ModeError> {
        if request.table.trim().is_empty() {
            return Err(ModeError::InvalidQuery("table name must not be empty".into()));
        }
        for filter in &request.filter {
            filter.validate()?;
        }
        let mut outputs = BTreeSet::new();
        let mut sources = BTreeSet::new();
        for field in &request.projection {
            if field.field.trim().is_empty() || field.output_name().trim().is_empty() {
                return Err(ModeError::InvalidQuery(
                    "projected field names must not be empty".into(),
                ));
            }
            if !sources.insert(field.field.to_ascii_lowercase()) {
                return Err(ModeError::InvalidQuery(format!(
                    "field '{}' is projected more than once",
                    field.field
                )));
            }
            if !outputs.insert(field.output_name().to_ascii_lowercase()) {
                return Err(ModeError::InvalidQuery(format!(
                    "output name '{}' is used more than once",
                    field.output_name()
                )));
            }
        }
        Ok(Self {
            kind: BuilderKind::FindOne,
            namespace_key: namespace_key.to_string(),
            tables: vec![request.table.clone()],
            world_scope: None,
            world_address_column: DEFAULT_WORLD_ADDRESS_COLUMN.to_string(),
            filter: request.filter.clone(),
            projections: FieldProjections::from_projected(&request.projection),
        })
    }

    /// Restricts rows to one world. Used for chain-level tables queried on
    /// behalf of a world.
    pub fn scoped_to_world(mut self, world_address: Option<&str>) -> Self {
        self.world_scope = world_address.map(str::to_ascii_lowercase);
        self
    }

    pub fn with_world_address_column(mut self, column: &str) -> Self {
        self.world_address_column = column.to_string();
        self
    }

    /// Replaces filter and projection with schema-resolved versions.
    pub fn with_resolved(mut self, filter: Vec<FieldFilter>, projections: FieldProjections) -> Self {
        self.filter = filter;
        self.projections = projections;
        self
    }

    pub fn kind(&self) -> BuilderKind {
        self.kind
    }

    pub fn namespace_key(&self) -> &str {
        &self.namespace_key
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn field_projections(&self) -> &FieldProjections {
        &self.projections
    }

    pub fn filter(&self) -> &[FieldFilter] {
        &self.filter
    }

    fn statement_for(&self, table: &str) -> Result<String, ModeError> {
        let select = if self.projections.is_empty() {
            "*".to_string()
        } else {
            self.projections
                .fields()
                .map(quote_ident)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut predicates = Vec::new();
        if let Some(address) = &self.world_scope {
            predicates.push(format!(
                "{} = {}",
                quote_ident(&self.world_address_column),
                quote_literal(address)
            ));
        }
        for filter in &self.filter {
            predicates.push(render_filter(filter)?);
        }
        let mut sql = format!(
            "SELECT {select} FROM {}",
            qualified_table(&self.namespace_key, table)
        );
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
        Ok(sql)
    }

    /// One statement per target table, index-aligned with the table list.
    pub fn to_sql_list(&self) -> Result<(Vec<String>, Vec<String>), ModeError> {
        let queries = self
            .tables
            .iter()
            .map(|t| self.statement_for(t))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((queries, self.tables.clone()))
    }

    pub fn to_sql(&self) -> Result<String, ModeError> {
        match self.tables.as_slice() {
            [table] => self.statement_for(table),
            tables => Err(ModeError::InvalidQuery(format!(
                "expected exactly one target table, builder has {}",
                tables.len()
            ))),
        }
    }
}
