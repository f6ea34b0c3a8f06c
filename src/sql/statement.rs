//! Text builders for the row-affecting statements.

use crate::error::{DbError, DbResult};
use crate::sql::escape::quote_identifier;
use crate::sql::value::ValueMap;
use std::borrow::Cow;

/// `GROUP` is a column name in the domain schema but a keyword in SQL.
pub fn quote_group_keyword(sql: &str) -> Cow<'_, str> {
    if sql.contains(" GROUP ") {
        Cow::Owned(sql.replace(" GROUP ", " \"GROUP\" "))
    } else {
        Cow::Borrowed(sql)
    }
}

/// `INSERT ... RETURNING *`, so the caller can read back generated keys.
pub fn insert(table: &str, values: &ValueMap) -> String {
    let table = quote_identifier(table);
    if values.is_empty() {
        return format!("INSERT INTO {table} DEFAULT VALUES RETURNING *");
    }
    let columns: Vec<String> = values.keys().map(|c| quote_identifier(c)).collect();
    let literals: Vec<String> = values.values().map(|v| v.to_literal()).collect();
    format!(
        "INSERT INTO {table} ({}) VALUES ({}) RETURNING *",
        columns.join(", "),
        literals.join(", ")
    )
}

/// `UPDATE` of the non-null entries of `values`, or of all entries when
/// `update_where_none` is set.
///
/// Fails with a bad-value error when nothing is left to assign.
pub fn update(
    table: &str,
    where_clause: &str,
    values: &ValueMap,
    update_where_none: bool,
) -> DbResult<String> {
    let assignments: Vec<String> = values
        .iter()
        .filter(|(_, value)| update_where_none || !value.is_null())
        .map(|(column, value)| format!("{} = {}", quote_identifier(column), value.to_literal()))
        .collect();
    if assignments.is_empty() {
        return Err(DbError::bad_value(format!(
            "No values given to update in table '{table}'"
        )));
    }
    Ok(with_where(
        format!(
            "UPDATE {} SET {}",
            quote_identifier(table),
            assignments.join(", ")
        ),
        where_clause,
    ))
}

pub fn delete(table: &str, where_clause: &str) -> String {
    with_where(format!("DELETE FROM {}", quote_identifier(table)), where_clause)
}

fn with_where(statement: String, where_clause: &str) -> String {
    match where_clause.trim() {
        "" => statement,
        condition => format!("{statement} WHERE {condition}"),
    }
}
