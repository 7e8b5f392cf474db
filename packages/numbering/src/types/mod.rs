//! Data types shared by the engine and the backends.

pub mod config;
pub mod entity;
pub mod scope;
pub mod value;

pub use config::{NumberingConfig, NumberingConfigBuilder, NumberingRule};
pub use entity::{ChangeKind, EntityChange};
pub use scope::{ScopeKey, ScopeValue};
pub use value::FieldValue;
