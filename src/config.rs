use crate::error::ModeError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_BLOCK_NUMBER_TABLE: &str = "BlockNumber";
pub const DEFAULT_SYNC_STATUS_TABLE: &str = "SyncStatus";
pub const DEFAULT_WORLD_ADDRESS_COLUMN: &str = "world_address";

/// What a subscription does once its buffers reach `max_buffered_rows`
/// before a checkpoint arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// End the subscription with `ModeError::BufferOverflow`. No partial
    /// block is ever emitted.
    #[default]
    Terminate,
    /// Keep the subscription alive and discard further data events until the
    /// next checkpoint. The flush for that block is incomplete.
    DropEvents,
}

/// Names of chain-level bookkeeping tables. Lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InternalTables {
    pub block_number_table: String,
    /// Per-chain override of the checkpoint table name.
    pub block_number_overrides: BTreeMap<u64, String>,
    pub tables: BTreeSet<String>,
}

impl Default for InternalTables {
    fn default() -> Self {
        Self {
            block_number_table: DEFAULT_BLOCK_NUMBER_TABLE.to_string(),
            block_number_overrides: BTreeMap::new(),
            tables: BTreeSet::from([DEFAULT_SYNC_STATUS_TABLE.to_string()]),
        }
    }
}

impl InternalTables {
    pub fn block_number_table_for(&self, chain_id: u64) -> &str {
        self.block_number_overrides
            .get(&chain_id)
            .map(String::as_str)
            .unwrap_or(&self.block_number_table)
    }

    pub fn is_internal(&self, table_name: &str) -> bool {
        table_name.eq_ignore_ascii_case(&self.block_number_table)
            || self
                .block_number_overrides
                .values()
                .any(|t| t.eq_ignore_ascii_case(table_name))
            || self.tables.iter().any(|t| t.eq_ignore_ascii_case(table_name))
    }

    pub fn is_block_number(&self, chain_id: u64, table_name: &str) -> bool {
        table_name.eq_ignore_ascii_case(self.block_number_table_for(chain_id))
    }
}

/// Runtime configuration for a query layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryLayerConfig {
    pub internal_tables: InternalTables,
    /// Column that scopes rows of chain-level tables to one world.
    pub world_address_column: String,
    /// Upper bound on rows held across all buffers of one subscription
    /// between two checkpoints.
    pub max_buffered_rows: usize,
    pub overflow_policy: OverflowPolicy,
    /// Capacity of each subscriber's raw feed channel in the memory store.
    pub feed_channel_capacity: usize,
    pub log_queries: bool,
}

impl Default for QueryLayerConfig {
    fn default() -> Self {
        Self {
            internal_tables: InternalTables::default(),
            world_address_column: DEFAULT_WORLD_ADDRESS_COLUMN.to_string(),
            max_buffered_rows: 100_000,
            overflow_policy: OverflowPolicy::Terminate,
            feed_channel_capacity: 4_096,
            log_queries: true,
        }
    }
}

impl QueryLayerConfig {
    pub fn production() -> Self {
        Self {
            log_queries: false,
            ..Self::default()
        }
    }

    /// Small buffers and permissive overflow, for local replay and tests.
    pub fn development() -> Self {
        Self {
            max_buffered_rows: 10_000,
            overflow_policy: OverflowPolicy::DropEvents,
            feed_channel_capacity: 256,
            ..Self::default()
        }
    }

    pub fn with_block_number_table(mut self, table_name: impl Into<String>) -> Self {
        self.internal_tables.block_number_table = table_name.into();
        self
    }

    pub fn with_max_buffered_rows(mut self, rows: usize, policy: OverflowPolicy) -> Self {
        self.max_buffered_rows = rows;
        self.overflow_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), ModeError> {
        if self.internal_tables.block_number_table.trim().is_empty() {
            return Err(ModeError::InvalidConfig {
                message: "block_number_table must not be empty".into(),
            });
        }
        if self
            .internal_tables
            .block_number_overrides
            .values()
            .any(|t| t.trim().is_empty())
        {
            return Err(ModeError::InvalidConfig {
                message: "block_number_overrides must not contain empty table names".into(),
            });
        }
        if self.world_address_column.trim().is_empty() {
            return Err(ModeError::InvalidConfig {
                message: "world_address_column must not be empty".into(),
            });
        }
        if self.max_buffered_rows == 0 {
            return Err(ModeError::InvalidConfig {
                message: "max_buffered_rows must be > 0".into(),
            });
        }
        if self.feed_channel_capacity == 0 {
            return Err(ModeError::InvalidConfig {
                message: "feed_channel_capacity must be > 0".into(),
            });
        }
        Ok(())
    }
}
