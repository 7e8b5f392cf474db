//! Transactional Entity Numbering
//!
//! Assigns formatted, collision-free numbers (invoice numbers, order numbers)
//! to entities while they are being saved, before the owning transaction
//! commits.
//!
//! # Guarantees
//!
//! - **Uniqueness**: concurrent writers never receive the same number for the
//!   same scope, even across processes (Postgres advisory locks)
//! - **Monotonic**: a scope's counter never goes backwards
//! - **Idempotent**: a field that already holds a number is left alone
//!
//! Numbering is gap-tolerant: rolled back transactions and skipped duplicates
//! leave holes in the sequence.
//!
//! # Usage
//!
//! ```rust,ignore
//! use numbering::{EntityChange, FieldValue, NumberingConfig, NumberingEngine, NumberingRule};
//!
//! let config = NumberingConfig::builder()
//!     .rule(
//!         "Invoice",
//!         NumberingRule::builder()
//!             .field_name("number")
//!             .scope_fields(vec!["branch".into(), "issued_at".into()])
//!             .prefix("INV-")
//!             .start(100)
//!             .increment_by(5)
//!             .build(),
//!     )
//!     .build()?;
//! let engine = NumberingEngine::new(config.into_shared());
//!
//! let mut tx = pool.begin().await?;
//! let mut changes = vec![EntityChange::insert("Invoice", "invoices")
//!     .with_field("branch", "north")
//!     .with_field("issued_at", chrono::Utc::now())
//!     .with_field("number", FieldValue::Null)];
//! engine.process_pg(&mut tx, &mut changes).await?;
//! // persist `changes` on `tx`, then
//! tx.commit().await?;
//! ```
//!
//! # Modules
//!
//! - [`engine`] - Retry loop tying locks, counters and probes together
//! - [`traits`] - Session traits (LockCoordinator, CounterStore, UniquenessProber)
//! - [`stores`] - Backends (MemoryBackend, PgNumberingSession)
//! - [`types`] - Rules, configuration, entity changes and scope keys

pub mod engine;
pub mod error;
pub mod stores;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use engine::{AssignedNumber, NumberingEngine, NumberingStage};
pub use error::{NumberingError, Result};
pub use traits::{CounterStore, LockCoordinator, NumberingSession, Probe, UniquenessProber};
pub use types::{
    config::{DEFAULT_LOCK_TIMEOUT, DEFAULT_MAX_ATTEMPTS},
    ChangeKind, EntityChange, FieldValue, NumberingConfig, NumberingConfigBuilder, NumberingRule,
    ScopeKey, ScopeValue,
};

// Re-export stores
pub use stores::{MemoryBackend, MemorySession};

#[cfg(feature = "postgres")]
pub use stores::PgNumberingSession;
