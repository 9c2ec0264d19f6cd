pub mod response;
pub mod serializer;

use crate::catalog::types::{FieldType, Row, Value};
use crate::query::plan::FieldProjections;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
}

/// Uniform tabular output for snapshots and streamed changes. Field order
/// and casing always come from the table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericTable {
    pub table_name: String,
    pub fields: Vec<FieldDescriptor>,
    pub rows: Vec<Row>,
}

impl GenericTable {
    pub fn empty(table_name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            table_name: table_name.into(),
            fields,
            rows: Vec::new(),
        }
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Narrows and renames columns of a table serialized without projection.
    /// Column order is unchanged.
    pub fn project(self, projections: &FieldProjections) -> GenericTable {
        if projections.is_empty() {
            return self;
        }
        let keep = self
            .fields
            .iter()
            .enumerate()
            .filter_map(|(idx, f)| {
                projections.output_name(&f.name).map(|out| {
                    (
                        idx,
                        FieldDescriptor {
                            name: out.to_string(),
                            field_type: f.field_type,
                        },
                    )
                })
            })
            .collect::<Vec<_>>();
        let rows = self
            .rows
            .into_iter()
            .map(|row| {
                Row::from_values(
                    keep.iter()
                        .map(|(idx, _)| row.values.get(*idx).cloned().unwrap_or(Value::Null))
                        .collect(),
                )
            })
            .collect();
        GenericTable {
            table_name: self.table_name,
            fields: keep.into_iter().map(|(_, f)| f).collect(),
            rows,
        }
    }

    /// Renders the table as `{"table": .., "fields": [..], "rows": [[..]]}`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "table": self.table_name,
            "fields": self.fields.iter().map(|f| serde_json::json!({
                "name": f.name,
                "type": f.field_type.as_str(),
            })).collect::<Vec<_>>(),
            "rows": self.rows.iter().map(|row| {
                row.values.iter().map(|v| v.to_json()).collect::<Vec<_>>()
            }).collect::<Vec<_>>(),
        })
    }
}
