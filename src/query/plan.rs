use crate::catalog::schema::TableSchema;
use crate::catalog::types::{FieldType, Value};
use crate::error::ModeError;
use crate::namespace::Namespace;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Multi-table state request. An empty table set means every table currently
/// known in that namespace.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateRequest {
    pub namespace: Namespace,
    #[serde(default)]
    pub chain_tables: BTreeSet<String>,
    #[serde(default)]
    pub world_tables: BTreeSet<String>,
}

impl StateRequest {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            ..Self::default()
        }
    }

    pub fn with_chain_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chain_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_world_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.world_tables = tables.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    IsNull,
    IsNotNull,
}

impl FilterOperator {
    pub fn sql(self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Ne => "<>",
            FilterOperator::Lt => "<",
            FilterOperator::Lte => "<=",
            FilterOperator::Gt => ">",
            FilterOperator::Gte => ">=",
            FilterOperator::In => "IN",
            FilterOperator::IsNull => "IS NULL",
            FilterOperator::IsNotNull => "IS NOT NULL",
        }
    }

    /// Number of operand values the operator takes; `None` means one or more.
    fn arity(self) -> Option<usize> {
        match self {
            FilterOperator::IsNull | FilterOperator::IsNotNull => Some(0),
            FilterOperator::In => None,
            _ => Some(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub values: Vec<Value>,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>, operator: FilterOperator, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            values,
        }
    }

    pub fn equals(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOperator::Eq, vec![value])
    }

    /// Structural checks that need no schema.
    pub fn validate(&self) -> Result<(), ModeError> {
        if self.field.trim().is_empty() {
            return Err(ModeError::InvalidFilter("filter field must not be empty".into()));
        }
        match self.operator.arity() {
            Some(n) if self.values.len() != n => {
                return Err(ModeError::InvalidFilter(format!(
                    "operator {} on '{}' takes {n} value(s), got {}",
                    self.operator.sql(),
                    self.field,
                    self.values.len()
                )));
            }
            None if self.values.is_empty() => {
                return Err(ModeError::InvalidFilter(format!(
                    "IN filter on '{}' needs at least one value",
                    self.field
                )));
            }
            _ => {}
        }
        if self.values.iter().any(|v| matches!(v, Value::Null)) {
            return Err(ModeError::InvalidFilter(format!(
                "filter on '{}' compares with NULL; use IsNull",
                self.field
            )));
        }
        Ok(())
    }

    /// Binds the filter to `schema`: canonical field casing and operand
    /// values converted to the field's type.
    pub fn resolve(&self, schema: &TableSchema) -> Result<FieldFilter, ModeError> {
        let field = schema.field(&self.field).ok_or_else(|| {
            ModeError::InvalidFilter(format!(
                "field '{}' does not exist in table '{}'",
                self.field, schema.table_name
            ))
        })?;
        let values = self
            .values
            .iter()
            .map(|v| {
                convert_operand(v, field.field_type).ok_or_else(|| {
                    ModeError::InvalidFilter(format!(
                        "value of kind {} cannot be compared with {} field '{}'",
                        v.kind_name(),
                        field.field_type,
                        field.name
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FieldFilter {
            field: field.name.clone(),
            operator: self.operator,
            values,
        })
    }

    /// Evaluates the filter against one value of the filtered field.
    pub fn matches(&self, value: &Value) -> bool {
        let is_null = matches!(value, Value::Null);
        match self.operator {
            FilterOperator::IsNull => is_null,
            FilterOperator::IsNotNull => !is_null,
            _ if is_null => false,
            FilterOperator::In => self.values.iter().any(|v| v == value),
            op => {
                let Some(operand) = self.values.first() else {
                    return false;
                };
                let ord = value.cmp(operand);
                match op {
                    FilterOperator::Eq => ord.is_eq(),
                    FilterOperator::Ne => ord.is_ne(),
                    FilterOperator::Lt => ord.is_lt(),
                    FilterOperator::Lte => ord.is_le(),
                    FilterOperator::Gt => ord.is_gt(),
                    FilterOperator::Gte => ord.is_ge(),
                    _ => false,
                }
            }
        }
    }
}

fn convert_operand(value: &Value, field_type: FieldType) -> Option<Value> {
    if value.conforms_to(field_type) {
        return Some(value.clone());
    }
    match (value, field_type) {
        (Value::Integer(i), FieldType::U256) if *i >= 0 => Value::parse_u256(&i.to_string()),
        (Value::Integer(i), FieldType::I256) => Value::parse_i256(&i.to_string()),
        (Value::Text(s), FieldType::U256) => Value::parse_u256(s),
        (Value::Text(s), FieldType::I256) => Value::parse_i256(s),
        (Value::Text(s), FieldType::Integer) => s.trim().parse().ok().map(Value::Integer),
        (Value::Text(s), FieldType::Address) => {
            let trimmed = s.trim();
            trimmed
                .strip_prefix("0x")
                .or_else(|| trimmed.strip_prefix("0X"))
                .and_then(|digits| hex::decode(digits).ok())
                .filter(|b| b.len() == 20)
                .map(|_| Value::Address(trimmed.to_ascii_lowercase().into()))
        }
        (Value::Text(s), FieldType::Boolean) => s.parse().ok().map(Value::Boolean),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectedField {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,
}

impl ProjectedField {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            rename: None,
        }
    }

    pub fn renamed(field: impl Into<String>, rename: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            rename: Some(rename.into()),
        }
    }

    pub fn output_name(&self) -> &str {
        self.rename.as_deref().unwrap_or(&self.field)
    }
}

/// Single-table request with optional row filter and field projection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SingleStateRequest {
    pub namespace: Namespace,
    pub table: String,
    #[serde(default)]
    pub filter: Vec<FieldFilter>,
    #[serde(default)]
    pub projection: Vec<ProjectedField>,
}

impl SingleStateRequest {
    pub fn new(namespace: Namespace, table: impl Into<String>) -> Self {
        Self {
            namespace,
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: FieldFilter) -> Self {
        self.filter.push(filter);
        self
    }

    pub fn with_projection(mut self, field: ProjectedField) -> Self {
        self.projection.push(field);
        self
    }
}

/// Requested field → output name, in request order. Empty means every field
/// under its own name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldProjections {
    entries: Vec<(String, String)>,
}

impl FieldProjections {
    pub fn from_pairs<I, A, B>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(a, b)| (a.into(), b.into()))
                .collect(),
        }
    }

    pub fn from_projected(fields: &[ProjectedField]) -> Self {
        Self::from_pairs(
            fields
                .iter()
                .map(|f| (f.field.clone(), f.output_name().to_string())),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Requested source fields.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(f, _)| f.as_str())
    }

    pub fn output_name(&self, field: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(f, _)| f.eq_ignore_ascii_case(field))
            .map(|(_, out)| out.as_str())
    }

    /// Rewrites source fields to the schema's canonical casing.
    pub fn resolve(&self, schema: &TableSchema) -> Result<FieldProjections, ModeError> {
        let entries = self
            .entries
            .iter()
            .map(|(field, out)| {
                schema
                    .field(field)
                    .map(|def| (def.name.clone(), out.clone()))
                    .ok_or_else(|| {
                        ModeError::InvalidFilter(format!(
                            "projected field '{field}' does not exist in table '{}'",
                            schema.table_name
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FieldProjections { entries })
    }
}
