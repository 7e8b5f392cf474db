//! In-memory backend for testing and single-process embedding.
//!
//! Mirrors the transactional behavior of the Postgres backend inside one
//! process: locks are held until the session ends, counter writes are staged
//! per session and only published on commit.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{NumberingError, Result};
use crate::traits::session::{CounterStore, LockCoordinator, Probe, UniquenessProber};
use crate::types::{
    entity::{ChangeKind, EntityChange},
    scope::ScopeKey,
    value::FieldValue,
};

/// Row identity used when committing updates and deletes.
const ID_FIELD: &str = "id";

type Row = IndexMap<String, FieldValue>;

#[derive(Default)]
struct Shared {
    counters: Mutex<HashMap<String, i64>>,
    tables: Mutex<HashMap<String, Vec<Row>>>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Shared {
    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(guard(&self.locks).entry(key.to_string()).or_default())
    }

    /// Forget the lock for `key` once no session holds or awaits it.
    fn prune_lock(&self, key: &str) {
        let mut locks = guard(&self.locks);
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared in-memory counters, tables and locks.
///
/// Cloning is cheap; clones see the same data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session, the in-memory analogue of a database transaction.
    pub fn begin(&self) -> MemorySession {
        MemorySession {
            shared: Arc::clone(&self.shared),
            held: HashMap::new(),
            staged: HashMap::new(),
        }
    }

    /// Committed next value for a scope key.
    pub fn next_value(&self, key: &ScopeKey) -> Option<i64> {
        guard(&self.shared.counters).get(key.as_str()).copied()
    }

    /// Number of committed counters.
    pub fn counter_count(&self) -> usize {
        guard(&self.shared.counters).len()
    }

    /// Number of scope locks currently held or awaited.
    pub fn lock_count(&self) -> usize {
        guard(&self.shared.locks).len()
    }

    /// Insert a row directly, bypassing numbering.
    pub fn seed_row(&self, table: &str, row: impl IntoIterator<Item = (String, FieldValue)>) {
        guard(&self.shared.tables)
            .entry(table.to_string())
            .or_default()
            .push(row.into_iter().collect());
    }

    /// Committed rows of a table.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        guard(&self.shared.tables)
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

/// One in-flight transaction against a [`MemoryBackend`].
///
/// Dropping the session without [`commit`](Self::commit) rolls it back.
pub struct MemorySession {
    shared: Arc<Shared>,
    held: HashMap<String, OwnedMutexGuard<()>>,
    staged: HashMap<String, i64>,
}

impl MemorySession {
    /// Publish staged counters and persist the changes, then release locks.
    pub fn commit(self, changes: &[EntityChange]) {
        guard(&self.shared.counters).extend(self.staged.iter().map(|(k, v)| (k.clone(), *v)));

        let mut tables = guard(&self.shared.tables);
        for change in changes {
            let rows = tables.entry(change.table.clone()).or_default();
            let existing = change
                .field(ID_FIELD)
                .and_then(|id| rows.iter().position(|row| row.get(ID_FIELD) == Some(id)));

            match (change.kind, existing) {
                (ChangeKind::Delete, Some(pos)) => {
                    rows.remove(pos);
                }
                (ChangeKind::Delete, None) => {}
                (ChangeKind::Update, Some(pos)) => rows[pos] = change.fields.clone(),
                (ChangeKind::Insert | ChangeKind::Update, _) => rows.push(change.fields.clone()),
            }
        }
        drop(tables);

        debug!(counters = self.staged.len(), locks = self.held.len(), "memory session committed");
    }

    /// Discard staged counters and release locks.
    pub fn rollback(self) {
        debug!(counters = self.staged.len(), "memory session rolled back");
    }

    /// Whether this session holds the lock for `key`.
    pub fn holds(&self, key: &ScopeKey) -> bool {
        self.held.contains_key(key.as_str())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let keys: Vec<String> = self.held.drain().map(|(key, _)| key).collect();
        for key in keys {
            self.shared.prune_lock(&key);
        }
    }
}

#[async_trait]
impl LockCoordinator for MemorySession {
    async fn acquire_exclusive(&mut self, key: &ScopeKey, timeout: Duration) -> Result<()> {
        if self.holds(key) {
            return Ok(());
        }

        let lock = self.shared.lock_for(key.as_str());

        let Ok(held) = tokio::time::timeout(timeout, lock.lock_owned()).await else {
            self.shared.prune_lock(key.as_str());
            return Err(NumberingError::LockTimeout {
                scope_key: key.to_string(),
                timeout,
            });
        };
        self.held.insert(key.to_string(), held);
        Ok(())
    }
}

#[async_trait]
impl CounterStore for MemorySession {
    async fn allocate(&mut self, key: &ScopeKey, start: i64, increment_by: i64) -> Result<i64> {
        let current = match self.staged.get(key.as_str()) {
            Some(v) => Some(*v),
            None => guard(&self.shared.counters).get(key.as_str()).copied(),
        };

        let issued = current.unwrap_or(start);
        let next = issued
            .checked_add(increment_by)
            .ok_or_else(|| NumberingError::DataAccess(format!("counter overflow for {key}").into()))?;

        self.staged.insert(key.to_string(), next);
        Ok(issued)
    }
}

#[async_trait]
impl UniquenessProber for MemorySession {
    async fn exists(&mut self, probe: &Probe<'_>) -> Result<bool> {
        let tables = guard(&self.shared.tables);
        let Some(rows) = tables.get(probe.table) else {
            return Ok(false);
        };

        Ok(rows.iter().any(|row| {
            row.get(probe.number_field).and_then(FieldValue::as_text) == Some(probe.number)
                && probe.scope.iter().all(|sv| {
                    let stored = row.get(&sv.field).unwrap_or(&FieldValue::Null);
                    stored == &sv.value
                })
        }))
    }
}
