//! Config Data SQL Library
//!
//! SQL access layer for a client management configuration database on
//! PostgreSQL: pooled connections behind a single lock with reconnect
//! retries, serializable transactions with contention retries, and
//! translation of object filters into SQL predicates.

pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod schema;
pub mod sql;

pub use backend::Backend;
pub use config::{BackendConfig, Config};
pub use error::{DbError, DbResult, ErrorKind};
pub use sql::{Filter, SqlValue, ValueMap};
