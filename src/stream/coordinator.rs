//! Per-subscription streaming state machine.
//!
//! Data events are buffered by scope and change type until the checkpoint
//! table's row arrives; the checkpoint closes the batch, which is flushed as
//! one response and the buffers start over. A flushed batch therefore holds
//! exactly the changes of one block.

use crate::catalog::SchemaRegistry;
use crate::config::{OverflowPolicy, QueryLayerConfig};
use crate::error::ModeError;
use crate::query::plan::FieldProjections;
use crate::store::{ChangeEvent, ChangeType};
use crate::stream::buffer::EventBuffer;
use crate::stream::filter::StreamFilter;
use crate::table::response::QueryLayerStateStreamResponse;
use crate::table::serializer::serialize_change_event;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Active,
    Terminated,
}

pub struct StreamCoordinator {
    schemas: Arc<dyn SchemaRegistry>,
    filter: StreamFilter,
    inserted: EventBuffer,
    updated: EventBuffer,
    deleted: EventBuffer,
    state: CoordinatorState,
    max_buffered_rows: usize,
    overflow_policy: OverflowPolicy,
    /// Data events discarded since the last checkpoint under `DropEvents`.
    dropped: usize,
    flushes: u64,
}

impl StreamCoordinator {
    pub fn new(
        schemas: Arc<dyn SchemaRegistry>,
        filter: StreamFilter,
        config: &QueryLayerConfig,
    ) -> Self {
        Self {
            schemas,
            filter,
            inserted: EventBuffer::new(),
            updated: EventBuffer::new(),
            deleted: EventBuffer::new(),
            state: CoordinatorState::Active,
            max_buffered_rows: config.max_buffered_rows,
            overflow_policy: config.overflow_policy,
            dropped: 0,
            flushes: 0,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    pub fn buffered_rows(&self) -> usize {
        self.inserted.row_count() + self.updated.row_count() + self.deleted.row_count()
    }

    /// Stops the state machine. Buffered rows of the open block are discarded.
    pub fn terminate(&mut self) {
        if self.state == CoordinatorState::Active {
            debug!(
                namespace = %self.filter.namespace(),
                discarded = self.buffered_rows(),
                "stream coordinator terminated"
            );
        }
        self.state = CoordinatorState::Terminated;
        self.clear();
    }

    /// Feeds one raw event through the state machine. Returns the flushed
    /// batch when the event is a checkpoint. Events with no schema or that
    /// fail to serialize are logged and skipped. A terminated coordinator
    /// ignores every event.
    pub fn process(
        &mut self,
        event: &ChangeEvent,
    ) -> Result<Option<QueryLayerStateStreamResponse>, ModeError> {
        if self.state == CoordinatorState::Terminated {
            return Ok(None);
        }
        if !self.filter.admits(event, self.schemas.as_ref()) {
            return Ok(None);
        }
        let namespace = self.filter.namespace();
        let chain_id = namespace.chain_id;
        let schema =
            match self
                .schemas
                .table_schema(chain_id, namespace.address(), &event.table_name)
            {
                Ok(schema) => schema,
                Err(e) => {
                    warn!(
                        namespace = %namespace,
                        table = %event.table_name,
                        error = %e,
                        "no schema for stream event; skipping"
                    );
                    return Ok(None);
                }
            };
        let table = match serialize_change_event(event, &schema, &FieldProjections::default()) {
            Ok(table) => table,
            Err(e) => {
                warn!(
                    namespace = %namespace,
                    table = %event.table_name,
                    error = %e,
                    "failed to serialize stream event; skipping"
                );
                return Ok(None);
            }
        };

        if self.schemas.is_block_number_table(chain_id, &event.table_name) {
            self.updated.add_chain_table(table, &schema);
            return Ok(Some(self.flush()));
        }

        if !self.filter.row_matches(event, &table) {
            return Ok(None);
        }
        let table = table.project(self.filter.projections());

        let buffered = self.buffered_rows();
        if buffered + table.row_count() > self.max_buffered_rows {
            match self.overflow_policy {
                OverflowPolicy::Terminate => {
                    warn!(
                        namespace = %self.filter.namespace(),
                        buffered,
                        limit = self.max_buffered_rows,
                        "stream buffer limit reached; terminating subscription"
                    );
                    self.terminate();
                    return Err(ModeError::BufferOverflow {
                        buffered,
                        limit: self.max_buffered_rows,
                    });
                }
                OverflowPolicy::DropEvents => {
                    if self.dropped == 0 {
                        warn!(
                            namespace = %self.filter.namespace(),
                            limit = self.max_buffered_rows,
                            "stream buffer limit reached; dropping events until next checkpoint"
                        );
                    }
                    self.dropped += 1;
                    return Ok(None);
                }
            }
        }

        let buffer = match event.change_type {
            ChangeType::Insert => &mut self.inserted,
            ChangeType::Update => &mut self.updated,
            ChangeType::Delete => &mut self.deleted,
        };
        if self.schemas.is_internal_table(&event.table_name) {
            buffer.add_chain_table(table, &schema);
        } else {
            buffer.add_world_table(table, &schema);
        }
        Ok(None)
    }

    fn flush(&mut self) -> QueryLayerStateStreamResponse {
        let response =
            QueryLayerStateStreamResponse::from_buffers(&self.inserted, &self.updated, &self.deleted);
        self.clear();
        self.flushes += 1;
        if self.dropped > 0 {
            warn!(
                namespace = %self.filter.namespace(),
                dropped = self.dropped,
                "flushed an incomplete block"
            );
            self.dropped = 0;
        }
        debug!(
            namespace = %self.filter.namespace(),
            rows = response.row_count(),
            flush = self.flushes,
            "stream batch flushed"
        );
        response
    }

    fn clear(&mut self) {
        self.inserted.clear();
        self.updated.clear();
        self.deleted.clear();
    }
}
