//! Statement execution.
//!
//! [`SqlExecutor`] runs auto-managed statements: it leases a connection,
//! runs one statement in autocommit mode and closes the lease again. If the
//! server went away in between, the pool is rebuilt and the statement is
//! retried exactly once.
//!
//! The same conveniences exist on [`Lease`] (and through it on
//! [`Transaction`](crate::db::transaction::Transaction)) for callers that
//! manage their own connection. Those never retry.

use crate::db::driver::Row;
use crate::db::manager::{ConnectionManager, Lease};
use crate::db::transaction::{TransactionBody, run_serializable};
use crate::error::{DbResult, ErrorKind};
use crate::sql::statement;
use crate::sql::value::ValueMap;
use futures_util::future::BoxFuture;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::warn;

/// Runs statements on auto-managed connections.
#[derive(Debug, Clone)]
pub struct SqlExecutor {
    manager: Arc<ConnectionManager>,
}

impl SqlExecutor {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Lease a connection for several statements. Close it with
    /// [`close`](Self::close).
    pub async fn connect(&self) -> DbResult<Lease> {
        self.manager.connect().await
    }

    pub async fn close(&self, lease: Lease) {
        self.manager.close(lease).await;
    }

    /// Execute a statement, returning the number of affected rows.
    pub async fn execute(&self, sql: &str) -> DbResult<u64> {
        self.auto(sql, Affected).await
    }

    /// First row of a query, if any.
    pub async fn get_row(&self, query: &str) -> DbResult<Option<Row>> {
        self.auto(query, One).await
    }

    /// All rows of a query.
    pub async fn get_set(&self, query: &str) -> DbResult<Vec<Row>> {
        self.auto(query, All).await
    }

    /// Insert a row and return its generated id, when the first column of
    /// the table is an integer key.
    pub async fn insert(&self, table: &str, values: &ValueMap) -> DbResult<Option<i64>> {
        let sql = statement::insert(table, values);
        Ok(inserted_id(self.auto(&sql, One).await?))
    }

    /// Update rows matching `where_clause`.
    ///
    /// Null entries are skipped unless `update_where_none` is set, in which
    /// case they are written as NULL.
    pub async fn update(
        &self,
        table: &str,
        where_clause: &str,
        values: &ValueMap,
        update_where_none: bool,
    ) -> DbResult<u64> {
        let sql = statement::update(table, where_clause, values, update_where_none)?;
        self.auto(&sql, Affected).await
    }

    pub async fn delete(&self, table: &str, where_clause: &str) -> DbResult<u64> {
        let sql = statement::delete(table, where_clause);
        self.auto(&sql, Affected).await
    }

    /// Run `body` in a serializable transaction on a dedicated connection,
    /// retrying on lock contention.
    pub async fn run_serializable<B: TransactionBody>(&self, body: &mut B) -> DbResult<B::Output> {
        let mut lease = self.manager.connect().await?;
        let result = run_serializable(&mut lease, self.manager.retry_policy(), body).await;
        self.manager.close(lease).await;
        result
    }

    async fn auto<F: Fetch>(&self, sql: &str, fetch: F) -> DbResult<F::Output> {
        let mut lease = self.manager.connect().await?;
        match fetch.run(&mut lease, sql).await {
            Err(err) if err.kind() == ErrorKind::Connectivity => {
                warn!(error = %err, "Connection lost during statement, retrying once");
                lease.discard();
                drop(lease);
                let mut lease = self.manager.reconnect().await?;
                let result = fetch.run(&mut lease, sql).await;
                self.manager.close(lease).await;
                result
            }
            result => {
                self.manager.close(lease).await;
                result
            }
        }
    }
}

impl Lease {
    pub async fn get_row(&mut self, query: &str) -> DbResult<Option<Row>> {
        self.fetch_optional(query).await
    }

    pub async fn get_set(&mut self, query: &str) -> DbResult<Vec<Row>> {
        self.fetch_all(query).await
    }

    pub async fn insert(&mut self, table: &str, values: &ValueMap) -> DbResult<Option<i64>> {
        let sql = statement::insert(table, values);
        Ok(inserted_id(self.fetch_optional(&sql).await?))
    }

    pub async fn update(
        &mut self,
        table: &str,
        where_clause: &str,
        values: &ValueMap,
        update_where_none: bool,
    ) -> DbResult<u64> {
        let sql = statement::update(table, where_clause, values, update_where_none)?;
        self.execute(&sql).await
    }

    pub async fn delete(&mut self, table: &str, where_clause: &str) -> DbResult<u64> {
        self.execute(&statement::delete(table, where_clause)).await
    }
}

fn inserted_id(row: Option<Row>) -> Option<i64> {
    row.as_ref()
        .and_then(|r| r.values().next())
        .and_then(JsonValue::as_i64)
}

/// How the result of a statement is collected.
trait Fetch: Copy + Send + Sync {
    type Output: Send;

    fn run<'a>(self, lease: &'a mut Lease, sql: &'a str) -> BoxFuture<'a, DbResult<Self::Output>>;
}

#[derive(Clone, Copy)]
struct Affected;

#[derive(Clone, Copy)]
struct One;

#[derive(Clone, Copy)]
struct All;

impl Fetch for Affected {
    type Output = u64;

    fn run<'a>(self, lease: &'a mut Lease, sql: &'a str) -> BoxFuture<'a, DbResult<u64>> {
        Box::pin(lease.execute(sql))
    }
}

impl Fetch for One {
    type Output = Option<Row>;

    fn run<'a>(self, lease: &'a mut Lease, sql: &'a str) -> BoxFuture<'a, DbResult<Option<Row>>> {
        Box::pin(lease.fetch_optional(sql))
    }
}

impl Fetch for All {
    type Output = Vec<Row>;

    fn run<'a>(self, lease: &'a mut Lease, sql: &'a str) -> BoxFuture<'a, DbResult<Vec<Row>>> {
        Box::pin(lease.fetch_all(sql))
    }
}
