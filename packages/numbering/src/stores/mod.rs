//! Backends for the numbering session traits.
//!
//! Available backends:
//! - `MemoryBackend` - In-process locks and counters (always available)
//! - `PgNumberingSession` - PostgreSQL advisory locks and counter table (requires `postgres` feature)

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{MemoryBackend, MemorySession};

#[cfg(feature = "postgres")]
pub use postgres::PgNumberingSession;
