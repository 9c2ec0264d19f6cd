use crate::catalog::types::FieldType;
use crate::error::ModeError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Column layout of one table in one namespace. The field order and casing
/// here are authoritative for every serialized row of the table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub table_name: String,
    pub namespace: String,
    pub fields: Vec<FieldDef>,
}

impl TableSchema {
    pub fn new(
        namespace: impl Into<String>,
        table_name: impl Into<String>,
        fields: Vec<FieldDef>,
    ) -> Result<Self, ModeError> {
        let schema = Self {
            table_name: table_name.into(),
            namespace: namespace.into(),
            fields,
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<(), ModeError> {
        if self.table_name.trim().is_empty() {
            return Err(ModeError::InvalidQuery("table name must not be empty".into()));
        }
        for (idx, field) in self.fields.iter().enumerate() {
            if field.name.trim().is_empty() {
                return Err(ModeError::InvalidQuery(format!(
                    "field {idx} of table '{}' has an empty name",
                    self.table_name
                )));
            }
            if self.fields[..idx]
                .iter()
                .any(|f| f.name.eq_ignore_ascii_case(&field.name))
            {
                return Err(ModeError::InvalidQuery(format!(
                    "duplicate field '{}' in table '{}'",
                    field.name, self.table_name
                )));
            }
        }
        Ok(())
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .or_else(|| {
                self.fields
                    .iter()
                    .position(|f| f.name.eq_ignore_ascii_case(name))
            })
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.field_index(name).map(|idx| &self.fields[idx])
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}
