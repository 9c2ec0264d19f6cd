use crate::catalog::schema::TableSchema;
use crate::error::ModeError;
use crate::query::plan::FieldProjections;
use crate::store::{RowCursor, StateStore};
use crate::table::GenericTable;
use crate::table::serializer::RowSerializer;
use tokio_util::sync::CancellationToken;

/// Closes the wrapped cursor when dropped, whatever path the caller takes.
struct CursorGuard<C: RowCursor> {
    cursor: C,
}

impl<C: RowCursor> CursorGuard<C> {
    fn new(cursor: C) -> Self {
        Self { cursor }
    }
}

impl<C: RowCursor> Drop for CursorGuard<C> {
    fn drop(&mut self) {
        self.cursor.close();
    }
}

/// Runs one statement and serializes its result set with `schema`.
///
/// Store failures surface as `Execution` without retry. Cancellation is
/// observed before and during the round-trip, and between rows.
pub async fn execute<S: StateStore>(
    store: &S,
    sql: &str,
    schema: &TableSchema,
    projections: &FieldProjections,
    cancel: &CancellationToken,
) -> Result<GenericTable, ModeError> {
    if cancel.is_cancelled() {
        return Err(ModeError::Cancelled);
    }
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(table = %schema.table_name, "query cancelled in flight");
            return Err(ModeError::Cancelled);
        }
        outcome = store.query(sql) => outcome,
    };
    let cursor = outcome.map_err(|e| {
        tracing::warn!(table = %schema.table_name, sql, error = %e, "query failed");
        match e {
            ModeError::Execution(message) => ModeError::Execution(message),
            other => ModeError::Execution(other.to_string()),
        }
    })?;
    let mut guard = CursorGuard::new(cursor);
    let mut serializer = RowSerializer::new(schema, projections, guard.cursor.columns())?;
    loop {
        if cancel.is_cancelled() {
            return Err(ModeError::Cancelled);
        }
        match guard.cursor.next_row()? {
            Some(values) => serializer.push(values)?,
            None => break,
        }
    }
    let table = serializer.finish();
    tracing::debug!(
        table = %table.table_name,
        rows = table.row_count(),
        "query executed"
    );
    Ok(table)
}
