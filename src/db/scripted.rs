//! In-memory driver for unit tests.
//!
//! Records every statement, simulates transactions with a pending buffer and
//! fails acquires, pool creation or statements on request.

use crate::db::driver::{PoolFactory, PoolStatus, Row, SqlConnection, SqlPool};
use crate::error::{DbError, DbResult, ErrorKind};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct State {
    pools_created: u32,
    pools_closed: u32,
    create_attempts: u32,
    acquire_attempts: u32,
    fail_create: u32,
    fail_acquire: u32,
    fail_acquire_kind: Option<ErrorKind>,
    statement_failures: Vec<(String, u32, ErrorKind)>,
    affected: Vec<(String, u64)>,
    responses: Vec<(String, Vec<Row>)>,
    open: u32,
    max_open: u32,
    discarded: u32,
    statements: Vec<String>,
    committed: Vec<String>,
}

impl State {
    fn take_failure(&mut self, sql: &str) -> Option<ErrorKind> {
        let entry = self
            .statement_failures
            .iter_mut()
            .find(|(prefix, left, _)| *left > 0 && sql.trim_start().starts_with(prefix.as_str()))?;
        entry.1 -= 1;
        Some(entry.2)
    }

    fn response(&self, sql: &str) -> Vec<Row> {
        self.responses
            .iter()
            .find(|(prefix, _)| sql.trim_start().starts_with(prefix.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default()
    }

    fn affected(&self, sql: &str) -> u64 {
        self.affected
            .iter()
            .find(|(prefix, _)| sql.trim_start().starts_with(prefix.as_str()))
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

fn error_of(kind: ErrorKind, what: &str) -> DbError {
    match kind {
        ErrorKind::Connectivity => DbError::connection(
            format!("server closed the connection during {}", what),
            "retry",
        ),
        ErrorKind::Contention => {
            DbError::contention("could not serialize access", Some("40001".into()))
        }
        ErrorKind::Exhausted => DbError::PoolExhausted { timeout_secs: 30 },
        ErrorKind::BadValue => DbError::bad_value(format!("bad value in {}", what)),
        ErrorKind::Integrity => DbError::integrity(
            "violates foreign key constraint",
            Some("23503".into()),
        ),
        ErrorKind::Unknown => DbError::database(
            format!("relation in {} does not exist", what),
            Some("42P01".into()),
            "Check the table name",
        ),
    }
}

/// Shared handle to the scripted state. Tests keep one and pass a clone to
/// the connection manager.
#[derive(Default)]
pub struct ScriptedFactory {
    state: Arc<Mutex<State>>,
}

impl ScriptedFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Fail the next `times` acquires with an error of `kind`. Zero resets.
    pub fn fail_acquire(&self, times: u32, kind: ErrorKind) {
        let mut state = self.state();
        state.fail_acquire = times;
        state.fail_acquire_kind = Some(kind);
    }

    /// Fail the next `times` pool creations as if the server was unreachable.
    pub fn fail_create(&self, times: u32) {
        self.state().fail_create = times;
    }

    /// Fail the next `times` statements starting with `prefix`.
    pub fn fail_statement(&self, prefix: &str, times: u32, kind: ErrorKind) {
        self.state()
            .statement_failures
            .push((prefix.to_string(), times, kind));
    }

    pub fn set_affected(&self, prefix: &str, rows: u64) {
        let mut state = self.state();
        state.affected.retain(|(p, _)| p != prefix);
        state.affected.push((prefix.to_string(), rows));
    }

    /// Rows returned for queries starting with `prefix`, replacing earlier
    /// responses for the same prefix.
    pub fn respond(&self, prefix: &str, rows: Vec<Row>) {
        let mut state = self.state();
        state.responses.retain(|(p, _)| p != prefix);
        state.responses.push((prefix.to_string(), rows));
    }

    pub fn pools_created(&self) -> u32 {
        self.state().pools_created
    }

    pub fn pools_closed(&self) -> u32 {
        self.state().pools_closed
    }

    pub fn create_attempts(&self) -> u32 {
        self.state().create_attempts
    }

    pub fn acquire_attempts(&self) -> u32 {
        self.state().acquire_attempts
    }

    /// Highest number of connections open at the same time.
    pub fn max_open(&self) -> u32 {
        self.state().max_open
    }

    pub fn discarded(&self) -> u32 {
        self.state().discarded
    }

    /// Every statement sent, failed ones included.
    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    /// Statements that took effect: run outside a transaction or in one that
    /// committed. Transaction control statements are left out.
    pub fn committed(&self) -> Vec<String> {
        self.state().committed.clone()
    }
}

#[async_trait]
impl PoolFactory for ScriptedFactory {
    async fn create(&self) -> DbResult<Arc<dyn SqlPool>> {
        let mut state = self.state();
        state.create_attempts += 1;
        if state.fail_create > 0 {
            state.fail_create -= 1;
            return Err(DbError::backend_io("opsi", "scripted", "connection refused"));
        }
        state.pools_created += 1;
        Ok(Arc::new(ScriptedPool {
            state: Arc::clone(&self.state),
        }))
    }

    fn describe(&self) -> String {
        "opsi@scripted".to_string()
    }
}

struct ScriptedPool {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl SqlPool for ScriptedPool {
    async fn acquire(&self) -> DbResult<Box<dyn SqlConnection>> {
        let mut state = self.state.lock().unwrap();
        state.acquire_attempts += 1;
        if state.fail_acquire > 0 {
            state.fail_acquire -= 1;
            let kind = state.fail_acquire_kind.unwrap_or(ErrorKind::Connectivity);
            return Err(error_of(kind, "acquire"));
        }
        state.open += 1;
        state.max_open = state.max_open.max(state.open);
        Ok(Box::new(ScriptedConnection {
            state: Arc::clone(&self.state),
            pending: None,
            discard: false,
        }))
    }

    async fn close(&self) {
        self.state.lock().unwrap().pools_closed += 1;
    }

    fn status(&self) -> PoolStatus {
        let state = self.state.lock().unwrap();
        PoolStatus {
            size: state.open,
            idle: 0,
            max_connections: 30,
        }
    }
}

struct ScriptedConnection {
    state: Arc<Mutex<State>>,
    pending: Option<Vec<String>>,
    discard: bool,
}

impl ScriptedConnection {
    fn run(&mut self, sql: &str) -> DbResult<(u64, Vec<Row>)> {
        let mut state = self.state.lock().unwrap();
        state.statements.push(sql.to_string());
        let upper = sql.trim_start().to_ascii_uppercase();

        if let Some(kind) = state.take_failure(sql) {
            // A failed statement aborts the open transaction; a failed COMMIT
            // ends it.
            if upper.starts_with("COMMIT") {
                self.pending = None;
            }
            return Err(error_of(kind, sql));
        }

        if upper.starts_with("BEGIN") {
            self.pending = Some(Vec::new());
        } else if upper.starts_with("COMMIT") {
            if let Some(pending) = self.pending.take() {
                state.committed.extend(pending);
            }
        } else if upper.starts_with("ROLLBACK") {
            self.pending = None;
        } else if let Some(pending) = self.pending.as_mut() {
            pending.push(sql.to_string());
        } else {
            state.committed.push(sql.to_string());
        }
        Ok((state.affected(sql), state.response(sql)))
    }
}

#[async_trait]
impl SqlConnection for ScriptedConnection {
    async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        self.run(sql).map(|(affected, _)| affected)
    }

    async fn fetch_optional(&mut self, sql: &str) -> DbResult<Option<Row>> {
        self.run(sql).map(|(_, rows)| rows.into_iter().next())
    }

    async fn fetch_all(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        self.run(sql).map(|(_, rows)| rows)
    }

    fn discard(&mut self) {
        self.discard = true;
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.open -= 1;
        if self.discard {
            state.discarded += 1;
        }
    }
}
