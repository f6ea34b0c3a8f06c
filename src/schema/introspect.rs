//! Table introspection.
//!
//! The table map decides between CREATE and ALTER for the dynamic hardware
//! tables and drives dropping the whole base.

use crate::db::driver::Row;
use crate::db::executor::SqlExecutor;
use crate::error::DbResult;
use std::collections::BTreeMap;
use tracing::debug;

/// Uppercased table name → column names in ordinal order.
pub type TableMap = BTreeMap<String, Vec<String>>;

mod queries {
    /// Base tables of the public schema with their columns. Tables without
    /// columns come back once with a NULL column name.
    pub const LIST_TABLE_COLUMNS: &str = r#"
        SELECT
            t.table_name AS table_name,
            c.column_name AS column_name
        FROM information_schema.tables t
        LEFT JOIN information_schema.columns c
            ON c.table_schema = t.table_schema AND c.table_name = t.table_name
        WHERE t.table_schema = 'public'
        AND t.table_type = 'BASE TABLE'
        ORDER BY t.table_name, c.ordinal_position
        "#;
}

/// Read all tables of the public schema.
pub async fn get_tables(executor: &SqlExecutor) -> DbResult<TableMap> {
    let rows = executor.get_set(queries::LIST_TABLE_COLUMNS).await?;
    let tables = tables_from_rows(&rows);
    debug!(count = tables.len(), "Current tables");
    Ok(tables)
}

/// Storage options appended to CREATE TABLE. PostgreSQL needs none.
pub fn get_table_creation_options(_table: &str) -> &'static str {
    ""
}

fn tables_from_rows(rows: &[Row]) -> TableMap {
    let mut tables = TableMap::new();
    for row in rows {
        let Some(table) = row.get("table_name").and_then(|v| v.as_str()) else {
            continue;
        };
        let columns = tables.entry(table.to_uppercase()).or_default();
        if let Some(column) = row.get("column_name").and_then(|v| v.as_str()) {
            columns.push(column.to_string());
        }
    }
    tables
}
