//! Database module for PostgreSQL persistence.

mod cursors;
mod entities;
mod movements;
mod pool;
mod results;
mod store;

pub use pool::*;
pub use store::PgStore;
