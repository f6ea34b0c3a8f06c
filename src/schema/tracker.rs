//! Object modification tracker.
//!
//! Records inserts, updates and deletes of domain objects in
//! `OBJECT_MODIFICATION_TRACKER` so that replicas can catch up with what
//! changed since a point in time.

use crate::db::driver::Row;
use crate::db::executor::SqlExecutor;
use crate::db::types::TIMESTAMP_FORMAT;
use crate::error::{DbError, DbResult};
use crate::schema::introspect::{get_table_creation_options, get_tables};
use crate::sql::escape::quote_text;
use crate::sql::filter::unique_condition;
use crate::sql::value::{SqlValue, ValueMap};
use chrono::{Local, NaiveDate, NaiveDateTime};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, info};

pub const TRACKER_TABLE: &str = "OBJECT_MODIFICATION_TRACKER";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Insert,
    Update,
    Delete,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(DbError::bad_value(format!("Unhandled command '{other}'"))),
        }
    }
}

/// Parse `YYYY-MM-DD HH:MM:SS` or a bare date (midnight).
pub fn parse_timestamp(text: &str) -> DbResult<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| DbError::bad_value(format!("Bad timestamp '{text}'")))
}

fn since_condition(since: Option<NaiveDateTime>) -> Option<String> {
    since.map(|ts| format!("\"date\" > {}", quote_text(&ts.format(TIMESTAMP_FORMAT).to_string())))
}

#[derive(Debug, Clone)]
pub struct ModificationTracker {
    executor: SqlExecutor,
    last_modification_only: bool,
}

impl ModificationTracker {
    pub fn new(executor: SqlExecutor) -> Self {
        Self {
            executor,
            last_modification_only: false,
        }
    }

    /// Keep only the latest modification per object.
    pub fn last_modification_only(mut self, enabled: bool) -> Self {
        self.last_modification_only = enabled;
        self
    }

    /// Create the tracker table and its indexes unless they exist. Returns
    /// whether the table was created.
    pub async fn create_tables(&self) -> DbResult<bool> {
        let tables = get_tables(&self.executor).await?;
        if tables.contains_key(TRACKER_TABLE) {
            return Ok(false);
        }
        debug!(table = TRACKER_TABLE, "Creating table");
        let create = format!(
            "CREATE TABLE \"{TRACKER_TABLE}\" (\n\
             \"id\" SERIAL,\n\
             \"command\" varchar(6) NOT NULL,\n\
             \"objectClass\" varchar(128) NOT NULL,\n\
             \"ident\" varchar(1024) NOT NULL,\n\
             \"date\" TIMESTAMP,\n\
             PRIMARY KEY (\"id\")\n) {}",
            get_table_creation_options(TRACKER_TABLE)
        );
        self.executor.execute(create.trim_end()).await?;
        for column in ["objectClass", "ident", "date"] {
            self.executor
                .execute(&format!(
                    "CREATE INDEX \"index_modification_tracker_{column}\" ON \"{TRACKER_TABLE}\" (\"{column}\")"
                ))
                .await?;
        }
        info!(table = TRACKER_TABLE, "Created modification tracker table");
        Ok(true)
    }

    /// Record a modification of the object identified by `ident`.
    pub async fn track(&self, command: &str, object_class: &str, ident: &str) -> DbResult<()> {
        let command: Command = command.parse()?;
        let start = Instant::now();

        let mut key = ValueMap::new();
        key.insert("objectClass".into(), SqlValue::from(object_class));
        key.insert("ident".into(), SqlValue::from(ident));
        let mut data = key.clone();
        data.insert("command".into(), SqlValue::from(command.as_str()));
        data.insert(
            "date".into(),
            SqlValue::from(Local::now().naive_local().format(TIMESTAMP_FORMAT).to_string()),
        );

        if self.last_modification_only {
            // One lease, so no other modification of the object slips in
            // between. A lost connection is not retried here.
            let mut lease = self.executor.connect().await?;
            let result = async {
                lease.delete(TRACKER_TABLE, &unique_condition(&key)).await?;
                lease.insert(TRACKER_TABLE, &data).await
            }
            .await;
            self.executor.close(lease).await;
            result?;
        } else {
            self.executor.insert(TRACKER_TABLE, &data).await?;
        }

        debug!(
            command = %command,
            object_class,
            ident,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Tracked modification"
        );
        Ok(())
    }

    /// Modifications recorded after `since`, or all of them.
    pub async fn modifications(&self, since: Option<NaiveDateTime>) -> DbResult<Vec<Row>> {
        let mut query = format!("SELECT * FROM \"{TRACKER_TABLE}\"");
        if let Some(condition) = since_condition(since) {
            query = format!("{query} WHERE {condition}");
        }
        self.executor.get_set(&format!("{query} ORDER BY \"id\"")).await
    }

    /// Delete recorded modifications, optionally only of one object class
    /// and only those after `since`.
    pub async fn clear(
        &self,
        object_class: Option<&str>,
        since: Option<NaiveDateTime>,
    ) -> DbResult<u64> {
        let mut conditions = Vec::new();
        conditions.extend(since_condition(since));
        if let Some(class) = object_class {
            conditions.push(format!("\"objectClass\" = {}", quote_text(class)));
        }
        self.executor
            .delete(TRACKER_TABLE, &conditions.join(" AND "))
            .await
    }
}
