use crate::catalog::schema::TableSchema;
use crate::catalog::types::{FieldType, Row, Value};
use crate::error::ModeError;
use crate::query::plan::FieldProjections;
use crate::store::{ChangeEvent, RowCursor};
use crate::table::{FieldDescriptor, GenericTable};

const ADDRESS_BYTES: usize = 20;

/// Output layout for one table: schema fields in schema order, narrowed and
/// renamed by the projection map.
fn output_fields(
    schema: &TableSchema,
    projections: &FieldProjections,
) -> Result<Vec<(usize, FieldDescriptor)>, ModeError> {
    if projections.is_empty() {
        return Ok(schema
            .fields
            .iter()
            .enumerate()
            .map(|(idx, f)| {
                (
                    idx,
                    FieldDescriptor {
                        name: f.name.clone(),
                        field_type: f.field_type,
                    },
                )
            })
            .collect());
    }
    if let Some(unknown) = projections
        .fields()
        .find(|field| schema.field_index(field).is_none())
    {
        return Err(ModeError::serialization(
            &schema.table_name,
            format!("projected field '{unknown}' is not in the schema"),
        ));
    }
    Ok(schema
        .fields
        .iter()
        .enumerate()
        .filter_map(|(idx, f)| {
            projections.output_name(&f.name).map(|name| {
                (
                    idx,
                    FieldDescriptor {
                        name: name.to_string(),
                        field_type: f.field_type,
                    },
                )
            })
        })
        .collect())
}

/// Incremental serializer for one result set. Result-set column metadata is
/// used only to locate values; names, order and types come from the schema.
#[derive(Debug)]
pub struct RowSerializer {
    table: GenericTable,
    /// Result-set column index for each output field.
    positions: Vec<usize>,
    column_count: usize,
}

impl RowSerializer {
    pub fn new(
        schema: &TableSchema,
        projections: &FieldProjections,
        columns: &[String],
    ) -> Result<Self, ModeError> {
        let outputs = output_fields(schema, projections)?;
        let mut positions = Vec::with_capacity(outputs.len());
        let mut fields = Vec::with_capacity(outputs.len());
        for (schema_idx, descriptor) in outputs {
            let name = &schema.fields[schema_idx].name;
            let position = columns
                .iter()
                .position(|c| c == name)
                .or_else(|| columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
                .ok_or_else(|| {
                    ModeError::serialization(
                        &schema.table_name,
                        format!("column '{name}' missing from result set"),
                    )
                })?;
            positions.push(position);
            fields.push(descriptor);
        }
        Ok(Self {
            table: GenericTable::empty(schema.table_name.clone(), fields),
            positions,
            column_count: columns.len(),
        })
    }

    pub fn push(&mut self, mut values: Vec<Value>) -> Result<(), ModeError> {
        if values.len() != self.column_count {
            return Err(ModeError::serialization(
                &self.table.table_name,
                format!(
                    "row has {} values, result set declares {} columns",
                    values.len(),
                    self.column_count
                ),
            ));
        }
        let mut out = Vec::with_capacity(self.positions.len());
        for (field, &position) in self.table.fields.iter().zip(&self.positions) {
            let value = std::mem::replace(&mut values[position], Value::Null);
            if !value.conforms_to(field.field_type) {
                return Err(ModeError::serialization(
                    &self.table.table_name,
                    format!(
                        "field '{}' expected {}, got {}",
                        field.name,
                        field.field_type,
                        value.kind_name()
                    ),
                ));
            }
            out.push(value);
        }
        self.table.rows.push(Row::from_values(out));
        Ok(())
    }

    pub fn finish(self) -> GenericTable {
        self.table
    }
}

/// Serializes every remaining row of `cursor`. The cursor is not closed.
pub fn serialize_rows<C: RowCursor + ?Sized>(
    cursor: &mut C,
    schema: &TableSchema,
    projections: &FieldProjections,
) -> Result<GenericTable, ModeError> {
    let mut serializer = RowSerializer::new(schema, projections, cursor.columns())?;
    while let Some(values) = cursor.next_row()? {
        serializer.push(values)?;
    }
    Ok(serializer.finish())
}

/// Serializes a change event into a single-row table. Fields absent from the
/// event (as in partial delete rows) become `Null`.
pub fn serialize_change_event(
    event: &ChangeEvent,
    schema: &TableSchema,
    projections: &FieldProjections,
) -> Result<GenericTable, ModeError> {
    let outputs = output_fields(schema, projections)?;
    let mut values = Vec::with_capacity(outputs.len());
    let mut fields = Vec::with_capacity(outputs.len());
    for (schema_idx, descriptor) in outputs {
        let name = &schema.fields[schema_idx].name;
        let raw = event.row.get(name).or_else(|| {
            event
                .row
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        });
        let value = match raw {
            Some(raw) => coerce_json(raw, descriptor.field_type).ok_or_else(|| {
                ModeError::serialization(
                    &schema.table_name,
                    format!(
                        "field '{name}' expected {}, got {raw}",
                        descriptor.field_type
                    ),
                )
            })?,
            None => Value::Null,
        };
        values.push(value);
        fields.push(descriptor);
    }
    Ok(GenericTable {
        table_name: schema.table_name.clone(),
        fields,
        rows: vec![Row::from_values(values)],
    })
}

fn decode_prefixed_hex(raw: &str) -> Option<Vec<u8>> {
    let raw = raw.trim();
    let digits = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))?;
    hex::decode(digits).ok()
}

fn coerce_json(raw: &serde_json::Value, field_type: FieldType) -> Option<Value> {
    use serde_json::Value as Json;
    if raw.is_null() {
        return Some(Value::Null);
    }
    match field_type {
        FieldType::Boolean => match raw {
            Json::Bool(b) => Some(Value::Boolean(*b)),
            Json::String(s) => s.parse::<bool>().ok().map(Value::Boolean),
            _ => None,
        },
        FieldType::Integer => match raw {
            Json::Number(n) => n.as_i64().map(Value::Integer),
            Json::String(s) => s.trim().parse::<i64>().ok().map(Value::Integer),
            _ => None,
        },
        FieldType::U256 => match raw {
            Json::Number(n) => n.as_u64().map(|v| Value::u256_from_u128(v.into())),
            Json::String(s) => Value::parse_u256(s),
            _ => None,
        },
        FieldType::I256 => match raw {
            Json::Number(n) => n.as_i64().and_then(|v| Value::parse_i256(&v.to_string())),
            Json::String(s) => Value::parse_i256(s),
            _ => None,
        },
        FieldType::Address => match raw {
            Json::String(s) => decode_prefixed_hex(s)
                .filter(|bytes| bytes.len() == ADDRESS_BYTES)
                .map(|_| Value::Address(s.trim().to_ascii_lowercase().into())),
            _ => None,
        },
        FieldType::Text => match raw {
            Json::String(s) => Some(Value::Text(s.as_str().into())),
            _ => None,
        },
        FieldType::Blob => match raw {
            Json::String(s) => decode_prefixed_hex(s).map(Value::Blob),
            Json::Array(items) => items
                .iter()
                .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .map(Value::Blob),
            _ => None,
        },
        FieldType::Json => serde_json::to_string(raw)
            .ok()
            .map(|s| Value::Json(s.into())),
    }
}
