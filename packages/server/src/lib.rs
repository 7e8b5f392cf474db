// Entity Numbering - API Core
//
// Thin HTTP surface over the numbering library: products are numbered inside
// the transaction that inserts them.

pub mod config;
pub mod domains;
pub mod server;

pub use config::*;
