//! Capabilities the engine needs from a transaction.

pub mod session;

pub use session::{CounterStore, LockCoordinator, NumberingSession, Probe, UniquenessProber};
