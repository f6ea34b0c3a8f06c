//! Connection manager: the global lock, connect/close and pool rebuilds.
//!
//! Every connection handed out by [`ConnectionManager::connect`] comes with
//! the manager's single lock; at most one [`Lease`] exists at any time. The
//! lock is released when the lease is closed or dropped, after the connection
//! went back to the pool.
//!
//! When acquiring fails because the server went away, the manager releases
//! the lock, waits, replaces the whole pool with a new one from its
//! [`PoolFactory`] and tries again, up to [`RetryPolicy::max_attempts`].

use crate::config::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY_MS};
use crate::db::driver::{PoolFactory, PoolStatus, Row, SqlConnection, SqlPool};
use crate::error::{DbError, DbResult, ErrorKind};
use crate::sql::statement::quote_group_keyword;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

/// Bounds for the retry loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// Hands out connections one at a time.
pub struct ConnectionManager {
    factory: Arc<dyn PoolFactory>,
    pool: RwLock<Option<Arc<dyn SqlPool>>>,
    lock: Arc<Mutex<()>>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("target", &self.factory.describe())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager. No pool is created until the first connect.
    pub fn new(factory: Arc<dyn PoolFactory>) -> Self {
        Self::with_retry_policy(factory, RetryPolicy::default())
    }

    pub fn with_retry_policy(factory: Arc<dyn PoolFactory>, retry: RetryPolicy) -> Self {
        Self {
            factory,
            pool: RwLock::new(None),
            lock: Arc::new(Mutex::new(())),
            retry,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Create the pool now if it does not exist yet.
    pub async fn ensure_pool(&self) -> DbResult<()> {
        self.current_pool().await.map(|_| ())
    }

    /// Lease a connection, holding the global lock until it is closed.
    pub async fn connect(&self) -> DbResult<Lease> {
        self.connect_with(false).await
    }

    /// Like [`connect`](Self::connect), but replaces the pool first. Used after
    /// a statement failed because the server went away.
    pub async fn reconnect(&self) -> DbResult<Lease> {
        self.connect_with(true).await
    }

    async fn connect_with(&self, mut rebuild: bool) -> DbResult<Lease> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let guard = Arc::clone(&self.lock).lock_owned().await;
            if rebuild {
                self.drop_pool().await;
            }

            let acquired = match self.current_pool().await {
                Ok(pool) => pool.acquire().await,
                Err(e) => Err(e),
            };

            match acquired {
                Ok(conn) => {
                    debug!(attempt, "Connection acquired");
                    return Ok(Lease::new(conn, guard));
                }
                Err(err) if err.kind() == ErrorKind::Connectivity => {
                    drop(guard);
                    if attempt >= self.retry.max_attempts {
                        error!(
                            target_db = %self.factory.describe(),
                            attempts = attempt,
                            error = %err,
                            "Giving up on connecting"
                        );
                        return Err(DbError::retries_exhausted("connect", attempt, err));
                    }
                    warn!(
                        attempt,
                        error = %err,
                        "Lost connection to database, rebuilding pool"
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    rebuild = true;
                }
                Err(err) => {
                    drop(guard);
                    debug!(error = %err, "Connect failed");
                    return Err(err);
                }
            }
        }
    }

    /// Return a leased connection and release the global lock.
    pub async fn close(&self, lease: Lease) {
        lease.close().await;
    }

    /// Close the pool. The next connect creates a new one.
    pub async fn shutdown(&self) {
        let _guard = self.lock.lock().await;
        self.drop_pool().await;
    }

    pub async fn status(&self) -> Option<PoolStatus> {
        self.pool.read().await.as_ref().map(|pool| pool.status())
    }

    async fn current_pool(&self) -> DbResult<Arc<dyn SqlPool>> {
        if let Some(pool) = self.pool.read().await.as_ref() {
            return Ok(Arc::clone(pool));
        }

        let mut slot = self.pool.write().await;
        if let Some(pool) = slot.as_ref() {
            return Ok(Arc::clone(pool));
        }
        let pool = self.factory.create().await?;
        info!(target_db = %self.factory.describe(), "Connection pool created");
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }

    async fn drop_pool(&self) {
        let old = self.pool.write().await.take();
        if let Some(pool) = old {
            info!(target_db = %self.factory.describe(), "Destroying connection pool");
            pool.close().await;
        }
    }
}

/// A connection together with the global lock.
///
/// Dropping a lease returns the connection and then releases the lock. A
/// lease dropped inside an open transaction discards its connection instead,
/// because the session state is unknown.
pub struct Lease {
    // Field order matters: the connection is dropped before the guard.
    conn: Box<dyn SqlConnection>,
    in_transaction: bool,
    _guard: OwnedMutexGuard<()>,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

impl Lease {
    fn new(conn: Box<dyn SqlConnection>, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            conn,
            in_transaction: false,
            _guard: guard,
        }
    }

    /// Run a statement and return the number of affected rows.
    pub async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        let sql = quote_group_keyword(sql);
        debug!(sql = %sql, "Executing statement");
        self.conn.execute(&sql).await
    }

    pub async fn fetch_optional(&mut self, sql: &str) -> DbResult<Option<Row>> {
        let sql = quote_group_keyword(sql);
        debug!(sql = %sql, "Fetching row");
        self.conn.fetch_optional(&sql).await
    }

    pub async fn fetch_all(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        let sql = quote_group_keyword(sql);
        debug!(sql = %sql, "Fetching rows");
        self.conn.fetch_all(&sql).await
    }

    /// Close the physical connection on release.
    pub fn discard(&mut self) {
        self.conn.discard();
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub(crate) fn set_in_transaction(&mut self, open: bool) {
        self.in_transaction = open;
    }

    /// Release the connection, rolling back a transaction left open.
    pub async fn close(mut self) {
        if self.in_transaction {
            warn!("Closing connection with an open transaction, rolling back");
            match self.conn.execute("ROLLBACK").await {
                Ok(_) => self.in_transaction = false,
                Err(e) => warn!(error = %e, "Rollback on close failed"),
            }
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.in_transaction {
            self.conn.discard();
        }
    }
}
