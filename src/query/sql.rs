//! SQL text helpers shared by the query builders.

use crate::catalog::types::Value;
use crate::error::ModeError;
use crate::query::plan::{FieldFilter, FilterOperator};

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// `"<namespace>"."<table>"`
pub fn qualified_table(namespace_key: &str, table_name: &str) -> String {
    format!("{}.{}", quote_ident(namespace_key), quote_ident(table_name))
}

pub fn render_value(value: &Value) -> Result<String, ModeError> {
    Ok(match value {
        Value::Null => {
            return Err(ModeError::InvalidFilter(
                "NULL cannot be used as a comparison operand".into(),
            ));
        }
        Value::Boolean(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Value::Integer(i) => i.to_string(),
        Value::U256(_) | Value::I256(_) => match value.to_json() {
            serde_json::Value::String(digits) => digits,
            other => other.to_string(),
        },
        Value::Address(s) | Value::Text(s) | Value::Json(s) => quote_literal(s),
        Value::Blob(bytes) => format!("'\\x{}'", hex::encode(bytes)),
    })
}

pub fn render_filter(filter: &FieldFilter) -> Result<String, ModeError> {
    let column = quote_ident(&filter.field);
    match filter.operator {
        FilterOperator::IsNull | FilterOperator::IsNotNull => {
            Ok(format!("{column} {}", filter.operator.sql()))
        }
        FilterOperator::In => {
            let values = filter
                .values
                .iter()
                .map(render_value)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!("{column} IN ({})", values.join(", ")))
        }
        op => {
            let operand = filter.values.first().ok_or_else(|| {
                ModeError::InvalidFilter(format!("filter on '{}' has no operand", filter.field))
            })?;
            Ok(format!("{column} {} {}", op.sql(), render_value(operand)?))
        }
    }
}
