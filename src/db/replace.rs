//! Atomic replacement of a parent's enumerated child rows.
//!
//! Used for sets such as the possible values of a product property: every
//! child row of the parent is deleted in one serializable transaction, then
//! each new row is inserted in its own. The insert transaction first checks
//! whether an identical row already exists, so a retried or repeated
//! replacement never creates duplicates.

use crate::db::executor::SqlExecutor;
use crate::db::transaction::{Finish, Transaction, TransactionBody, run_serializable};
use crate::error::{DbError, DbResult};
use crate::sql::escape::quote_identifier;
use crate::sql::filter::unique_condition;
use crate::sql::statement;
use crate::sql::value::ValueMap;
use async_trait::async_trait;
use tracing::{debug, info};

/// Child rows of `table` that belong to `parent`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaceValues {
    pub table: String,
    /// Columns identifying the parent, e.g. `productId` and `propertyId`.
    pub parent: ValueMap,
    /// New child rows. Parent columns are added to each row.
    pub rows: Vec<ValueMap>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceSummary {
    pub deleted: u64,
    pub inserted: usize,
    pub skipped: usize,
}

impl ReplaceValues {
    pub fn new(table: impl Into<String>, parent: ValueMap) -> Self {
        Self {
            table: table.into(),
            parent,
            rows: Vec::new(),
        }
    }

    pub fn with_row(mut self, row: ValueMap) -> Self {
        self.rows.push(row);
        self
    }

    /// The delete is scoped by the parent columns, so there must be some and
    /// no row may set them to something else.
    fn validate(&self) -> DbResult<()> {
        if self.parent.is_empty() {
            return Err(DbError::bad_value(format!(
                "Replacing values of {} needs at least one parent column",
                self.table
            )));
        }
        for row in &self.rows {
            if let Some(column) = row.keys().find(|c| self.parent.contains_key(*c)) {
                return Err(DbError::bad_value(format!(
                    "Row for {} sets parent column '{column}'",
                    self.table
                )));
            }
        }
        Ok(())
    }

    fn full_row(&self, row: &ValueMap) -> ValueMap {
        let mut full = self.parent.clone();
        full.extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
        full
    }

    /// Replace the parent's rows with `self.rows`.
    ///
    /// The whole replacement runs on one leased connection, so no other
    /// statement of this process interleaves with it.
    pub async fn apply(&self, executor: &SqlExecutor) -> DbResult<ReplaceSummary> {
        self.validate()?;
        let retry = executor.manager().retry_policy();
        let mut lease = executor.connect().await?;
        let result = async {
            let mut delete = DeleteRows {
                table: &self.table,
                where_clause: unique_condition(&self.parent),
            };
            let mut summary = ReplaceSummary {
                deleted: run_serializable(&mut lease, retry, &mut delete).await?,
                ..Default::default()
            };

            for row in &self.rows {
                let row = self.full_row(row);
                let mut insert = InsertRow {
                    table: &self.table,
                    condition: unique_condition(&row),
                    row: &row,
                };
                if run_serializable(&mut lease, retry, &mut insert).await? {
                    summary.inserted += 1;
                } else {
                    summary.skipped += 1;
                }
            }
            Ok::<_, DbError>(summary)
        }
        .await;
        executor.close(lease).await;

        if let Ok(summary) = &result {
            info!(
                table = %self.table,
                deleted = summary.deleted,
                inserted = summary.inserted,
                skipped = summary.skipped,
                "Replaced values"
            );
        }
        result
    }
}

struct DeleteRows<'a> {
    table: &'a str,
    where_clause: String,
}

#[async_trait]
impl TransactionBody for DeleteRows<'_> {
    type Output = u64;

    fn name(&self) -> &str {
        "replace values: delete"
    }

    async fn run(&mut self, tx: &mut Transaction<'_>) -> DbResult<Finish<u64>> {
        let deleted = tx.delete(self.table, &self.where_clause).await?;
        Ok(Finish::Commit(deleted))
    }
}

struct InsertRow<'a> {
    table: &'a str,
    condition: String,
    row: &'a ValueMap,
}

#[async_trait]
impl TransactionBody for InsertRow<'_> {
    type Output = bool;

    fn name(&self) -> &str {
        "replace values: insert"
    }

    async fn run(&mut self, tx: &mut Transaction<'_>) -> DbResult<Finish<bool>> {
        let query = format!(
            "SELECT * FROM {} WHERE {}",
            quote_identifier(self.table),
            self.condition
        );
        if tx.get_row(&query).await?.is_some() {
            debug!(table = self.table, "Value already present");
            return Ok(Finish::Rollback(false));
        }
        tx.execute(&statement::insert(self.table, self.row)).await?;
        Ok(Finish::Commit(true))
    }
}
