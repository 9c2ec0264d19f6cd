//! Interfaces of the store that mirrors chain state.
//!
//! The store runs SQL, reports per-chain sync status and fans a raw feed of
//! row-level change events out to subscribers. It guarantees that the
//! checkpoint row of a block is delivered after every data row of that block.

pub mod memory;

use crate::catalog::types::Value;
use crate::error::ModeError;
use crate::namespace::Namespace;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// One row-level change on the raw feed. `namespace` is the namespace the row
/// was written to: the chain namespace for chain-level tables, the world
/// namespace otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub namespace: Namespace,
    pub table_name: String,
    pub change_type: ChangeType,
    #[serde(default)]
    pub row: serde_json::Map<String, serde_json::Value>,
}

impl ChangeEvent {
    pub fn new(
        namespace: Namespace,
        table_name: impl Into<String>,
        change_type: ChangeType,
        row: serde_json::Value,
    ) -> Self {
        let row = match row {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            namespace,
            table_name: table_name.into(),
            change_type,
            row,
        }
    }
}

/// A result set positioned before its first row.
pub trait RowCursor: Send {
    /// Column names as reported by the store. Order and casing are not
    /// guaranteed to match the table schema.
    fn columns(&self) -> &[String];

    fn next_row(&mut self) -> Result<Option<Vec<Value>>, ModeError>;

    /// Releases the cursor. Must be idempotent.
    fn close(&mut self);
}

pub type FeedId = u64;

/// A live registration in the store's feed fan-out.
#[derive(Debug)]
pub struct FeedSubscription {
    pub id: FeedId,
    pub events: mpsc::Receiver<ChangeEvent>,
}

pub trait StateStore: Send + Sync {
    type Cursor: RowCursor;

    fn query(&self, sql: &str) -> impl Future<Output = Result<Self::Cursor, ModeError>> + Send;

    fn sync_status(&self, chain_id: u64) -> impl Future<Output = Result<bool, ModeError>> + Send;

    fn subscribe(&self) -> Result<FeedSubscription, ModeError>;

    /// Removes a subscription from the fan-out set. Unknown ids are ignored.
    fn unsubscribe(&self, id: FeedId);
}
