//! PostgreSQL backend.
//!
//! Runs on the connection of an open sqlx transaction (`&mut *tx`):
//! - Locks are `pg_advisory_xact_lock` on a 64-bit hash of the scope key, so
//!   they serialize writers across processes and machines and disappear when
//!   the transaction commits or rolls back.
//! - Counters live in `numbering_counters` and advance with a single upsert.
//! - Probes read the entity's own table with bound parameters.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPool, Postgres};
use sqlx::QueryBuilder;
use tracing::{debug, instrument, warn};

use crate::engine::{AssignedNumber, NumberingEngine};
use crate::error::{NumberingError, Result};
use crate::traits::session::{CounterStore, LockCoordinator, Probe, UniquenessProber};
use crate::types::{entity::EntityChange, scope::ScopeKey, value::FieldValue};

/// Table holding one row per scope key.
pub const COUNTERS_TABLE: &str = "numbering_counters";

/// SQLSTATE raised when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// SQLSTATE raised when the deadlock detector aborts a waiting lock.
///
/// Saves that number several scope keys lock them in processing order, so two
/// saves can wait on each other; the aborted one is safe to retry.
const DEADLOCK_DETECTED: &str = "40P01";

/// Create the counter table if it does not exist.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS numbering_counters (
            id BIGSERIAL PRIMARY KEY,
            scope_key VARCHAR(256) NOT NULL,
            next_value BIGINT NOT NULL,
            CONSTRAINT uix_numbering_counters_scope_key UNIQUE (scope_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Committed next value for a scope key, outside any numbering transaction.
pub async fn next_value(pool: &PgPool, key: &ScopeKey) -> Result<Option<i64>> {
    let value = sqlx::query_scalar::<_, i64>(
        "SELECT next_value FROM numbering_counters WHERE scope_key = $1",
    )
    .bind(key.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(value)
}

/// Numbering session bound to one transaction's connection.
pub struct PgNumberingSession<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgNumberingSession<'c> {
    /// Wrap the connection of an open transaction.
    ///
    /// Passing a connection outside a transaction still works, but every
    /// statement then commits on its own and the advisory lock is released
    /// immediately.
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

fn is_lock_not_granted(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.code().is_some_and(|code| lock_not_granted_code(&code)),
        _ => false,
    }
}

fn lock_not_granted_code(code: &str) -> bool {
    matches!(code, LOCK_NOT_AVAILABLE | DEADLOCK_DETECTED)
}

/// Quote a validated identifier, keeping an optional schema qualifier.
fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join(".")
}

fn push_value(qb: &mut QueryBuilder<'_, Postgres>, value: &FieldValue) {
    match value {
        FieldValue::Null => {
            qb.push(" IS NULL");
        }
        FieldValue::Text(s) => {
            qb.push(" = ").push_bind(s.clone());
        }
        FieldValue::Integer(i) => {
            qb.push(" = ").push_bind(*i);
        }
        FieldValue::Boolean(b) => {
            qb.push(" = ").push_bind(*b);
        }
        FieldValue::Uuid(u) => {
            qb.push(" = ").push_bind(*u);
        }
        FieldValue::Date(d) => {
            qb.push(" = ").push_bind(*d);
        }
        FieldValue::Timestamp(ts) => {
            qb.push(" = ").push_bind(*ts);
        }
        FieldValue::TimestampTz(ts) => {
            qb.push(" = ").push_bind(*ts);
        }
    }
}

#[async_trait]
impl<'c> LockCoordinator for PgNumberingSession<'c> {
    #[instrument(skip(self, key), fields(scope_key = %key))]
    async fn acquire_exclusive(&mut self, key: &ScopeKey, timeout: Duration) -> Result<()> {
        let previous: String = sqlx::query_scalar("SELECT current_setting('lock_timeout')")
            .fetch_one(&mut *self.conn)
            .await?;

        // lock_timeout = 0 disables the timeout, so never go below 1ms
        let millis = timeout.as_millis().max(1);
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{millis}ms"))
            .execute(&mut *self.conn)
            .await?;

        let locked = sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(key.as_str())
            .execute(&mut *self.conn)
            .await;

        match locked {
            Ok(_) => {}
            Err(e) if is_lock_not_granted(&e) => {
                warn!(?timeout, error = %e, "numbering lock not granted");
                return Err(NumberingError::LockTimeout {
                    scope_key: key.to_string(),
                    timeout,
                });
            }
            Err(e) => return Err(e.into()),
        }

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(previous)
            .execute(&mut *self.conn)
            .await?;

        debug!("numbering lock acquired");
        Ok(())
    }
}

#[async_trait]
impl<'c> CounterStore for PgNumberingSession<'c> {
    #[instrument(skip(self, key), fields(scope_key = %key))]
    async fn allocate(&mut self, key: &ScopeKey, start: i64, increment_by: i64) -> Result<i64> {
        // Insert yields start, update yields the previous next_value
        let issued = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO numbering_counters (scope_key, next_value)
            VALUES ($1, $2 + $3)
            ON CONFLICT (scope_key)
            DO UPDATE SET next_value = numbering_counters.next_value + $3
            RETURNING next_value - $3
            "#,
        )
        .bind(key.as_str())
        .bind(start)
        .bind(increment_by)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(issued)
    }
}

#[async_trait]
impl<'c> UniquenessProber for PgNumberingSession<'c> {
    #[instrument(skip(self, probe), fields(table = probe.table, number = probe.number))]
    async fn exists(&mut self, probe: &Probe<'_>) -> Result<bool> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT EXISTS (SELECT 1 FROM ");
        qb.push(quote_ident(probe.table))
            .push(" WHERE ")
            .push(quote_ident(probe.number_field))
            .push(" = ")
            .push_bind(probe.number.to_string());

        for sv in probe.scope {
            qb.push(" AND ").push(quote_ident(&sv.field));
            push_value(&mut qb, &sv.value);
        }
        qb.push(")");

        let exists: bool = qb.build_query_scalar().fetch_one(&mut *self.conn).await?;
        Ok(exists)
    }
}

impl NumberingEngine {
    /// Number pending changes on the connection of an open transaction.
    ///
    /// ```rust,ignore
    /// let mut tx = pool.begin().await?;
    /// engine.process_pg(&mut tx, &mut changes).await?;
    /// // insert the rows from `changes`, then
    /// tx.commit().await?;
    /// ```
    pub async fn process_pg(
        &self,
        conn: &mut PgConnection,
        changes: &mut [EntityChange],
    ) -> Result<Vec<AssignedNumber>> {
        let mut session = PgNumberingSession::new(conn);
        self.process(&mut session, changes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quotes_plain_and_qualified_names() {
        assert_eq!(quote_ident("products"), "\"products\"");
        assert_eq!(quote_ident("billing.invoices"), "\"billing\".\"invoices\"");
    }

    #[test]
    fn test_timeout_and_deadlock_mean_lock_not_granted() {
        assert!(lock_not_granted_code("55P03"));
        assert!(lock_not_granted_code("40P01"));
        assert!(!lock_not_granted_code("23505"));
        assert!(!lock_not_granted_code("57014"));
    }

    #[test]
    fn test_builds_probe_with_null_scope() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 WHERE ");
        qb.push(quote_ident("branch"));
        push_value(&mut qb, &FieldValue::Null);
        qb.push(" AND ").push(quote_ident("region"));
        push_value(&mut qb, &FieldValue::from("north"));

        assert_eq!(
            qb.sql(),
            "SELECT 1 WHERE \"branch\" IS NULL AND \"region\" = $1"
        );
    }
}
