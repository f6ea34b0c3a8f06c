//! Transaction scopes and the contention retry loop.
//!
//! A [`Transaction`] borrows a [`Lease`] between `BEGIN` and `COMMIT` or
//! `ROLLBACK`. Statements run through it (it derefs to the lease) are not
//! committed individually. A transaction dropped without finishing leaves the
//! lease marked, so the connection is rolled back on close or discarded.

use crate::db::manager::{Lease, RetryPolicy};
use crate::error::{DbError, DbResult, ErrorKind};
use async_trait::async_trait;
use std::ops::{Deref, DerefMut};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Isolation {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// An open transaction on a leased connection.
#[derive(Debug)]
pub struct Transaction<'l> {
    lease: &'l mut Lease,
}

impl<'l> Transaction<'l> {
    /// Start a transaction. A transaction still open on `lease` is rolled
    /// back first.
    pub async fn begin(lease: &'l mut Lease, isolation: Isolation) -> DbResult<Self> {
        if lease.in_transaction() {
            warn!("Rolling back unfinished transaction before BEGIN");
            lease.execute("ROLLBACK").await?;
            lease.set_in_transaction(false);
        }
        lease
            .execute(&format!("BEGIN ISOLATION LEVEL {}", isolation.as_sql()))
            .await?;
        lease.set_in_transaction(true);
        Ok(Self { lease })
    }

    pub async fn commit(self) -> DbResult<()> {
        match self.lease.execute("COMMIT").await {
            Ok(_) => {
                self.lease.set_in_transaction(false);
                Ok(())
            }
            // The server ends the transaction when COMMIT fails. If the
            // connection died, its state is unknown and the lease stays marked.
            Err(err) => {
                if err.kind() != ErrorKind::Connectivity {
                    self.lease.set_in_transaction(false);
                }
                Err(err)
            }
        }
    }

    pub async fn rollback(self) -> DbResult<()> {
        self.lease.execute("ROLLBACK").await?;
        self.lease.set_in_transaction(false);
        Ok(())
    }
}

impl Deref for Transaction<'_> {
    type Target = Lease;

    fn deref(&self) -> &Lease {
        self.lease
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Lease {
        self.lease
    }
}

/// How a transaction body wants its transaction to end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finish<T> {
    Commit(T),
    Rollback(T),
}

/// Work that must run atomically and may be repeated on contention.
///
/// `run` can be called several times; it must not assume anything it did in
/// a rolled back attempt is still there.
#[async_trait]
pub trait TransactionBody: Send {
    type Output: Send;

    /// Name used in logs and in the error when retries run out.
    fn name(&self) -> &str {
        "transaction"
    }

    async fn run(&mut self, tx: &mut Transaction<'_>) -> DbResult<Finish<Self::Output>>;
}

/// Run `body` in a serializable transaction on `lease`.
///
/// Lock contention (deadlock, serialization failure, lock timeout), also when
/// raised by `COMMIT`, rolls back and retries after `retry.delay`, up to
/// `retry.max_attempts`. Any other error rolls back and is returned at once.
/// The lease is never left inside a transaction.
pub async fn run_serializable<B: TransactionBody>(
    lease: &mut Lease,
    retry: RetryPolicy,
    body: &mut B,
) -> DbResult<B::Output> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match attempt_once(lease, body).await {
            Ok(output) => {
                debug!(operation = body.name(), attempt, "Transaction finished");
                return Ok(output);
            }
            Err(err) if err.kind() == ErrorKind::Contention => {
                if attempt >= retry.max_attempts {
                    error!(
                        operation = body.name(),
                        attempts = attempt,
                        error = %err,
                        "Giving up on transaction"
                    );
                    return Err(DbError::retries_exhausted(body.name(), attempt, err));
                }
                warn!(
                    operation = body.name(),
                    attempt,
                    error = %err,
                    "Lock contention, retrying transaction"
                );
                tokio::time::sleep(retry.delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn attempt_once<B: TransactionBody>(lease: &mut Lease, body: &mut B) -> DbResult<B::Output> {
    let mut tx = Transaction::begin(lease, Isolation::Serializable).await?;
    match body.run(&mut tx).await {
        Ok(Finish::Commit(output)) => {
            tx.commit().await?;
            Ok(output)
        }
        Ok(Finish::Rollback(output)) => {
            tx.rollback().await?;
            Ok(output)
        }
        Err(err) => {
            if let Err(e) = tx.rollback().await {
                warn!(error = %e, "Rollback after failed transaction body failed");
            }
            Err(err)
        }
    }
}
