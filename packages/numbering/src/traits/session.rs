//! Transaction-bound traits for locking, counting and probing.
//!
//! Every implementation operates inside ONE open transaction:
//! - `LockCoordinator`: exclusive, transaction-scoped locks per scope key
//! - `CounterStore`: read-and-advance of a scope key's counter
//! - `UniquenessProber`: duplicate check against persisted rows
//! - `NumberingSession`: composite trait the engine runs against
//!
//! Nothing here commits or rolls back. Ending the transaction releases the
//! locks and publishes (or discards) the counter writes.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::scope::{ScopeKey, ScopeValue};

/// Exclusive locks named by scope key, released when the transaction ends.
#[async_trait]
pub trait LockCoordinator: Send {
    /// Block until the lock for `key` is held by this transaction.
    ///
    /// Fails with `NumberingError::LockTimeout` once `timeout` elapses. Another
    /// transaction holding the same key blocks the caller; a second call from
    /// the same transaction must not deadlock.
    async fn acquire_exclusive(&mut self, key: &ScopeKey, timeout: Duration) -> Result<()>;
}

/// Persistent counters, one per scope key.
#[async_trait]
pub trait CounterStore: Send {
    /// Return the value to issue and advance the counter by `increment_by`.
    ///
    /// A missing counter is created on the fly and yields `start`. Callers
    /// must hold the key's lock.
    async fn allocate(&mut self, key: &ScopeKey, start: i64, increment_by: i64) -> Result<i64>;
}

/// A candidate number and the scope it must be unique in.
#[derive(Debug, Clone, Copy)]
pub struct Probe<'a> {
    pub table: &'a str,
    pub number_field: &'a str,
    pub number: &'a str,
    pub scope: &'a [ScopeValue],
}

/// Duplicate detection against rows visible to the transaction.
#[async_trait]
pub trait UniquenessProber: Send {
    /// Whether a row already has `probe.number` and matches every scope value.
    ///
    /// A null scope value matches rows where that column is null.
    async fn exists(&mut self, probe: &Probe<'_>) -> Result<bool>;
}

/// Everything the engine needs from one transaction.
pub trait NumberingSession: LockCoordinator + CounterStore + UniquenessProber {}

// Blanket implementation: anything implementing all three traits is a NumberingSession
impl<T: LockCoordinator + CounterStore + UniquenessProber> NumberingSession for T {}
