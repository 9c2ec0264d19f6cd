pub mod catalog;
pub mod config;
pub mod error;
pub mod namespace;
pub mod offline;
pub mod query;
pub mod store;
pub mod stream;
pub mod table;

#[cfg(test)]
mod lib_tests;

use crate::catalog::SchemaRegistry;
use crate::catalog::schema::TableSchema;
use crate::config::QueryLayerConfig;
use crate::error::ModeError;
use crate::namespace::{Namespace, RequestKind};
use crate::query::builder::QueryBuilder;
use crate::query::executor::execute;
use crate::query::plan::{FieldFilter, FieldProjections, SingleStateRequest, StateRequest};
use crate::store::{FeedId, StateStore};
use crate::stream::{StreamCoordinator, StreamFilter};
use crate::table::GenericTable;
use crate::table::response::{QueryLayerStateResponse, QueryLayerStateStreamResponse};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use crate::error::ModeErrorCode;

/// Removes a feed subscription from the store's fan-out when dropped.
struct FeedGuard<'a, S: StateStore> {
    store: &'a S,
    id: FeedId,
}

impl<S: StateStore> Drop for FeedGuard<'_, S> {
    fn drop(&mut self) {
        self.store.unsubscribe(self.id);
    }
}

/// Resolved single-table request: where the table lives and the validated
/// statement that reads it.
struct SingleTablePlan {
    namespace: Namespace,
    schema: Arc<TableSchema>,
    is_internal: bool,
    filter: Vec<FieldFilter>,
    projections: FieldProjections,
    builder: QueryBuilder,
}

/// Snapshot and streaming entry points over a shared store and schema
/// registry.
pub struct QueryLayer<S: StateStore> {
    store: Arc<S>,
    schemas: Arc<dyn SchemaRegistry>,
    config: QueryLayerConfig,
}

impl<S: StateStore> QueryLayer<S> {
    pub fn new(
        store: Arc<S>,
        schemas: Arc<dyn SchemaRegistry>,
        config: QueryLayerConfig,
    ) -> Result<Self, ModeError> {
        config.validate()?;
        Ok(Self {
            store,
            schemas,
            config,
        })
    }

    pub fn config(&self) -> &QueryLayerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn schemas(&self) -> &Arc<dyn SchemaRegistry> {
        &self.schemas
    }

    async fn ensure_synced(&self, chain_id: u64) -> Result<(), ModeError> {
        if self.store.sync_status(chain_id).await? {
            info!(chain_id, "request rejected while chain is syncing");
            return Err(ModeError::SyncInProgress { chain_id });
        }
        Ok(())
    }

    /// Point-in-time state of a world and its chain. Either every requested
    /// table is returned or the request fails.
    pub async fn get_state(
        &self,
        request: &StateRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryLayerStateResponse, ModeError> {
        request.namespace.validate(RequestKind::State)?;
        let namespace = request.namespace.normalized()?;
        self.ensure_synced(namespace.chain_id).await?;

        let (chain_namespace, world_namespace) = namespace.to_sub_namespaces();
        let chain_tables = self
            .snapshot_namespace(
                &chain_namespace,
                &world_namespace,
                &request.chain_tables,
                cancel,
            )
            .await?;
        let world_tables = self
            .snapshot_namespace(
                &world_namespace,
                &world_namespace,
                &request.world_tables,
                cancel,
            )
            .await?;
        info!(
            namespace = %namespace,
            chain_tables = chain_tables.len(),
            world_tables = world_tables.len(),
            "state snapshot served"
        );
        Ok(QueryLayerStateResponse::from_tables(
            chain_tables,
            world_tables,
        ))
    }

    async fn snapshot_namespace(
        &self,
        query_namespace: &Namespace,
        world_namespace: &Namespace,
        table_filter: &BTreeSet<String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<GenericTable>, ModeError> {
        let namespace_key = query_namespace.key();
        let known = self.schemas.all_tables(&namespace_key)?;
        let builder = QueryBuilder::find_all(&namespace_key, world_namespace, &known, table_filter)?
            .with_world_address_column(&self.config.world_address_column);
        let (queries, tables) = builder.to_sql_list()?;
        let mut out = Vec::with_capacity(tables.len());
        for (sql, table_name) in queries.iter().zip(&tables) {
            let schema = self.schemas.table_schema(
                query_namespace.chain_id,
                query_namespace.address(),
                table_name,
            )?;
            if self.config.log_queries {
                debug!(namespace = %namespace_key, table = %table_name, sql = %sql, "snapshot query");
            }
            out.push(execute(self.store.as_ref(), sql, &schema, builder.field_projections(), cancel).await?);
        }
        Ok(out)
    }

    fn plan_single_table(&self, request: &SingleStateRequest) -> Result<SingleTablePlan, ModeError> {
        let namespace = request.namespace.normalized()?;
        let is_internal = self.schemas.is_internal_table(&request.table);
        let query_namespace = if is_internal {
            Namespace::chain(namespace.chain_id)
        } else if namespace.is_world() {
            namespace.clone()
        } else {
            return Err(ModeError::InvalidNamespace(format!(
                "world address is required for world table '{}'",
                request.table
            )));
        };
        let builder = QueryBuilder::find_one(request, &query_namespace.key())?;
        let schema = self.schemas.table_schema(
            namespace.chain_id,
            namespace.address(),
            &request.table,
        )?;
        let filter = builder
            .filter()
            .iter()
            .map(|f| f.resolve(&schema))
            .collect::<Result<Vec<_>, _>>()?;
        let projections = builder.field_projections().resolve(&schema)?;

        let canonical = SingleStateRequest {
            table: schema.table_name.clone(),
            ..request.clone()
        };
        let mut builder = QueryBuilder::find_one(&canonical, &query_namespace.key())?
            .with_resolved(filter.clone(), projections.clone())
            .with_world_address_column(&self.config.world_address_column);
        if is_internal {
            builder = builder.scoped_to_world(namespace.address());
        }
        Ok(SingleTablePlan {
            namespace,
            schema,
            is_internal,
            filter,
            projections,
            builder,
        })
    }

    /// State of one table, optionally filtered and projected. Chain-level
    /// tables need only a chain id; world tables also need a world address.
    pub async fn get_single_state(
        &self,
        request: &SingleStateRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryLayerStateResponse, ModeError> {
        request.namespace.validate(RequestKind::SingleState)?;
        self.ensure_synced(request.namespace.chain_id).await?;
        let plan = self.plan_single_table(request)?;
        let sql = plan.builder.to_sql()?;
        if self.config.log_queries {
            debug!(namespace = %plan.namespace, table = %plan.schema.table_name, sql = %sql, "single table query");
        }
        let table = execute(
            self.store.as_ref(),
            &sql,
            &plan.schema,
            plan.builder.field_projections(),
            cancel,
        )
        .await?;
        Ok(QueryLayerStateResponse::from_table(table, plan.is_internal))
    }

    /// Runs caller-supplied SQL and serializes the result with `schema`.
    pub async fn execute_sql(
        &self,
        sql: &str,
        schema: &TableSchema,
        projections: &FieldProjections,
        cancel: &CancellationToken,
    ) -> Result<GenericTable, ModeError> {
        execute(self.store.as_ref(), sql, schema, projections, cancel).await
    }

    /// Streams block-aligned change batches of a world and its chain into
    /// `sink` until `cancel` fires, the sink closes or the feed ends.
    pub async fn stream_state(
        &self,
        request: &StateRequest,
        sink: mpsc::Sender<QueryLayerStateStreamResponse>,
        cancel: CancellationToken,
    ) -> Result<(), ModeError> {
        request.namespace.validate(RequestKind::State)?;
        let namespace = request.namespace.normalized()?;
        self.ensure_synced(namespace.chain_id).await?;
        let filter = StreamFilter::all(&namespace, &request.chain_tables, &request.world_tables)
            .with_world_address_column(&self.config.world_address_column);
        self.run_stream(filter, sink, cancel).await
    }

    /// Streams changes of one table. Row filters and projection apply to
    /// data rows; checkpoint rows are always delivered.
    pub async fn single_stream_state(
        &self,
        request: &SingleStateRequest,
        sink: mpsc::Sender<QueryLayerStateStreamResponse>,
        cancel: CancellationToken,
    ) -> Result<(), ModeError> {
        request.namespace.validate(RequestKind::SingleState)?;
        self.ensure_synced(request.namespace.chain_id).await?;
        let plan = self.plan_single_table(request)?;
        let filter = StreamFilter::single(
            &plan.namespace,
            &plan.schema,
            plan.is_internal,
            plan.filter,
            plan.projections,
        )
        .with_world_address_column(&self.config.world_address_column);
        self.run_stream(filter, sink, cancel).await
    }

    async fn run_stream(
        &self,
        filter: StreamFilter,
        sink: mpsc::Sender<QueryLayerStateStreamResponse>,
        cancel: CancellationToken,
    ) -> Result<(), ModeError> {
        let subscription = self.store.subscribe()?;
        let guard = FeedGuard {
            store: self.store.as_ref(),
            id: subscription.id,
        };
        let mut events = subscription.events;
        let namespace = filter.namespace().clone();
        let mut coordinator = StreamCoordinator::new(Arc::clone(&self.schemas), filter, &self.config);
        info!(namespace = %namespace, feed = guard.id, "stream subscription started");

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                _ = sink.closed() => break Ok(()),
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!(namespace = %namespace, "feed closed");
                        break Ok(());
                    };
                    match coordinator.process(&event) {
                        Ok(Some(batch)) => {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => break Ok(()),
                                sent = sink.send(batch) => {
                                    if sent.is_err() {
                                        break Ok(());
                                    }
                                }
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(namespace = %namespace, error = %e, "stream subscription failed");
                            break Err(e);
                        }
                    }
                }
            }
        };

        coordinator.terminate();
        drop(events);
        drop(guard);
        info!(
            namespace = %namespace,
            flushes = coordinator.flush_count(),
            "stream subscription ended"
        );
        outcome
    }
}
