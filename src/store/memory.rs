//! In-process store used by tests and the offline replay tool.
//!
//! Statements are routed by their `FROM "<namespace>"."<table>"` clause and
//! return every stored row of that table; predicates are not evaluated.

use crate::catalog::types::Value;
use crate::config::QueryLayerConfig;
use crate::error::ModeError;
use crate::store::{ChangeEvent, FeedId, FeedSubscription, RowCursor, StateStore};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<(String, String), MemoryTable>,
    syncing: HashSet<u64>,
    failing_tables: HashMap<String, String>,
    issued: Vec<String>,
    subscribers: HashMap<FeedId, mpsc::Sender<ChangeEvent>>,
}

#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    feed_capacity: usize,
    next_feed_id: AtomicU64,
    open_cursors: Arc<AtomicUsize>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1_024)
    }
}

impl MemoryStore {
    pub fn new(feed_capacity: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            feed_capacity: feed_capacity.max(1),
            next_feed_id: AtomicU64::new(1),
            open_cursors: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Uses the configured per-subscriber feed capacity.
    pub fn with_config(config: &QueryLayerConfig) -> Self {
        Self::new(config.feed_channel_capacity)
    }

    /// Replaces the contents of a table. `columns` is the store's own column
    /// metadata and may differ in order and casing from the table schema.
    pub fn put_table(
        &self,
        namespace_key: &str,
        table_name: &str,
        columns: &[&str],
        rows: Vec<Vec<Value>>,
    ) {
        let table = MemoryTable {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        };
        self.state
            .lock()
            .tables
            .insert(route_key(namespace_key, table_name), table);
    }

    pub fn set_syncing(&self, chain_id: u64, syncing: bool) {
        let mut state = self.state.lock();
        if syncing {
            state.syncing.insert(chain_id);
        } else {
            state.syncing.remove(&chain_id);
        }
    }

    /// Makes every statement against `table_name` fail with `message`.
    pub fn fail_queries_for(&self, table_name: &str, message: &str) {
        self.state
            .lock()
            .failing_tables
            .insert(table_name.to_ascii_lowercase(), message.to_string());
    }

    pub fn issued_queries(&self) -> Vec<String> {
        self.state.lock().issued.clone()
    }

    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Delivers an event to every live subscriber, pruning subscribers whose
    /// receiver is gone. Sends run concurrently, so a subscriber with a full
    /// channel delays only its own delivery. Returns once every send has
    /// settled, which keeps per-subscriber order across calls. Returns the
    /// number of subscribers reached.
    pub async fn publish(&self, event: ChangeEvent) -> usize {
        let senders = {
            let state = self.state.lock();
            let mut senders = state
                .subscribers
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect::<Vec<_>>();
            senders.sort_by_key(|(id, _)| *id);
            senders
        };
        let mut sends = JoinSet::new();
        for (id, tx) in senders {
            let event = event.clone();
            sends.spawn(async move { (id, tx.send(event).await.is_ok()) });
        }
        let mut delivered = 0;
        let mut closed = Vec::new();
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((_, true)) => delivered += 1,
                Ok((id, false)) => closed.push(id),
                Err(e) => tracing::warn!(error = %e, "feed delivery task failed"),
            }
        }
        if !closed.is_empty() {
            let mut state = self.state.lock();
            for id in closed {
                state.subscribers.remove(&id);
            }
        }
        delivered
    }
}

fn route_key(namespace_key: &str, table_name: &str) -> (String, String) {
    (namespace_key.to_string(), table_name.to_ascii_lowercase())
}

/// Extracts `(namespace, table)` from the first `FROM "a"."b"` clause.
fn parse_from_clause(sql: &str) -> Option<(String, String)> {
    let upper = sql.to_ascii_uppercase();
    let start = upper.find("FROM ")? + "FROM ".len();
    let rest = sql.get(start..)?.trim_start();
    let (namespace, rest) = read_quoted(rest)?;
    let rest = rest.strip_prefix('.')?;
    let (table, _) = read_quoted(rest)?;
    Some((namespace, table))
}

fn read_quoted(input: &str) -> Option<(String, &str)> {
    let mut chars = input.strip_prefix('"')?.char_indices().peekable();
    let mut out = String::new();
    while let Some((idx, c)) = chars.next() {
        if c == '"' {
            if matches!(chars.peek(), Some((_, '"'))) {
                chars.next();
                out.push('"');
                continue;
            }
            return Some((out, &input[idx + 2..]));
        }
        out.push(c);
    }
    None
}

#[derive(Debug)]
pub struct MemoryCursor {
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
    open_cursors: Arc<AtomicUsize>,
    closed: bool,
}

impl RowCursor for MemoryCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>, ModeError> {
        if self.closed {
            return Err(ModeError::Execution("cursor is closed".into()));
        }
        Ok(self.rows.pop_front())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open_cursors.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.close();
    }
}

impl StateStore for MemoryStore {
    type Cursor = MemoryCursor;

    async fn query(&self, sql: &str) -> Result<MemoryCursor, ModeError> {
        let mut state = self.state.lock();
        state.issued.push(sql.to_string());
        let (namespace, table) = parse_from_clause(sql)
            .ok_or_else(|| ModeError::Execution(format!("unsupported statement: {sql}")))?;
        if let Some(message) = state.failing_tables.get(&table.to_ascii_lowercase()) {
            return Err(ModeError::Execution(message.clone()));
        }
        let stored = state
            .tables
            .get(&route_key(&namespace, &table))
            .cloned()
            .ok_or_else(|| {
                ModeError::Execution(format!("relation \"{namespace}\".\"{table}\" does not exist"))
            })?;
        self.open_cursors.fetch_add(1, Ordering::AcqRel);
        Ok(MemoryCursor {
            columns: stored.columns,
            rows: stored.rows.into(),
            open_cursors: Arc::clone(&self.open_cursors),
            closed: false,
        })
    }

    async fn sync_status(&self, chain_id: u64) -> Result<bool, ModeError> {
        Ok(self.state.lock().syncing.contains(&chain_id))
    }

    fn subscribe(&self) -> Result<FeedSubscription, ModeError> {
        let (tx, rx) = mpsc::channel(self.feed_capacity);
        let id = self.next_feed_id.fetch_add(1, Ordering::AcqRel);
        self.state.lock().subscribers.insert(id, tx);
        Ok(FeedSubscription { id, events: rx })
    }

    fn unsubscribe(&self, id: FeedId) {
        self.state.lock().subscribers.remove(&id);
    }
}
