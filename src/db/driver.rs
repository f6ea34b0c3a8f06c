//! Driver seam between the connection manager and a concrete database client.
//!
//! The manager only talks to these traits, so the PostgreSQL adapter can be
//! swapped for a scripted driver in tests.

use crate::error::DbResult;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// One result row: column name → decoded value, in column order.
pub type Row = serde_json::Map<String, JsonValue>;

/// A connection leased from a [`SqlPool`].
#[async_trait]
pub trait SqlConnection: Send {
    /// Run one or more statements and return the number of affected rows.
    async fn execute(&mut self, sql: &str) -> DbResult<u64>;

    async fn fetch_optional(&mut self, sql: &str) -> DbResult<Option<Row>>;

    async fn fetch_all(&mut self, sql: &str) -> DbResult<Vec<Row>>;

    /// Close the physical connection on release instead of returning it to
    /// the pool. Used when the session state is unknown.
    fn discard(&mut self);
}

/// Snapshot of a pool's occupancy, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatus {
    pub size: u32,
    pub idle: usize,
    pub max_connections: u32,
}

#[async_trait]
pub trait SqlPool: Send + Sync {
    /// Wait for a free connection, bounded by the pool timeout.
    async fn acquire(&self) -> DbResult<Box<dyn SqlConnection>>;

    /// Close every connection. The pool is unusable afterwards.
    async fn close(&self);

    fn status(&self) -> PoolStatus;
}

/// Builds pools. The connection manager keeps the factory so it can throw a
/// broken pool away and start over.
#[async_trait]
pub trait PoolFactory: Send + Sync {
    /// Create a pool, verifying the database is reachable.
    async fn create(&self) -> DbResult<Arc<dyn SqlPool>>;

    /// Human readable target, e.g. `opsi@localhost`.
    fn describe(&self) -> String;
}
