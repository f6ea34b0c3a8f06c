//! sqlx-backed implementation of [`SqlConnection`].
//!
//! Statements are sent as plain text without bind arguments, which makes
//! sqlx use the simple-query protocol: several statements may be sent at once
//! and results come back in text format.

use crate::db::driver::{Row, SqlConnection};
use crate::db::types::row_to_map;
use crate::error::DbResult;
use async_trait::async_trait;
use sqlx::Executor;
use sqlx::Postgres;
use sqlx::pool::PoolConnection;

/// A pooled PostgreSQL connection.
pub struct PgSession {
    conn: PoolConnection<Postgres>,
}

impl PgSession {
    pub fn new(conn: PoolConnection<Postgres>) -> Self {
        Self { conn }
    }
}

impl std::fmt::Debug for PgSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgSession").finish_non_exhaustive()
    }
}

#[async_trait]
impl SqlConnection for PgSession {
    async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        let result = (&mut *self.conn).execute(sql).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_optional(&mut self, sql: &str) -> DbResult<Option<Row>> {
        let row = (&mut *self.conn).fetch_optional(sql).await?;
        Ok(row.as_ref().map(row_to_map))
    }

    async fn fetch_all(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        let rows = (&mut *self.conn).fetch_all(sql).await?;
        Ok(rows.iter().map(row_to_map).collect())
    }

    fn discard(&mut self) {
        self.conn.close_on_drop();
    }
}
