//! Database access layer.
//!
//! - Driver seam and the sqlx PostgreSQL adapter
//! - Pool creation and the lock-and-retry connection manager
//! - Statement execution with a single reconnect retry
//! - Transaction scopes with contention retry
//! - Atomic replacement of enumerated child rows

pub mod driver;
pub mod executor;
pub mod manager;
pub mod pool;
pub mod postgres;
pub mod replace;
pub mod transaction;
pub mod types;

#[cfg(test)]
pub(crate) mod scripted;

pub use driver::{PoolFactory, PoolStatus, Row, SqlConnection, SqlPool};
pub use executor::SqlExecutor;
pub use manager::{ConnectionManager, Lease, RetryPolicy};
pub use pool::{PgConnectionPool, PgPoolFactory};
pub use replace::{ReplaceSummary, ReplaceValues};
pub use transaction::{Finish, Isolation, Transaction, TransactionBody, run_serializable};
