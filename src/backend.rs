//! Backend façade.
//!
//! [`Backend`] owns the connection manager for one database and the hardware
//! audit schema loaded at construction. Entity CRUD code talks to it (or to
//! its [`SqlExecutor`]) instead of to a process-wide pool.

use crate::config::BackendConfig;
use crate::db::driver::{PoolFactory, Row};
use crate::db::executor::SqlExecutor;
use crate::db::manager::{ConnectionManager, RetryPolicy};
use crate::db::pool::PgPoolFactory;
use crate::db::replace::{ReplaceSummary, ReplaceValues};
use crate::error::{DbError, DbResult};
use crate::schema::hardware::{HardwareSchema, device_table};
use crate::schema::introspect::{TableMap, get_tables};
use crate::schema::tracker::ModificationTracker;
use crate::sql::escape::quote_identifier;
use crate::sql::filter::{Filter, create_query};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Upper bound on failed `DROP TABLE`s while dropping the base.
const MAX_DROP_FAILURES: u32 = 100;

#[derive(Debug, Clone)]
pub struct Backend {
    executor: SqlExecutor,
    hardware: Arc<HardwareSchema>,
}

impl Backend {
    /// Connect to PostgreSQL. The pool is created and checked right away, so
    /// an unreachable database fails here.
    pub async fn connect(config: BackendConfig, hardware: HardwareSchema) -> DbResult<Self> {
        config.validate()?;
        info!(
            address = %config.address,
            database = %config.database,
            hardware_classes = hardware.classes().len(),
            "Connecting backend"
        );
        let backend = Self::from_factory(
            Arc::new(PgPoolFactory::new(config)),
            RetryPolicy::default(),
            hardware,
        );
        backend.executor.manager().ensure_pool().await?;
        Ok(backend)
    }

    /// Build a backend on any driver. No pool is created until first use.
    pub fn from_factory(
        factory: Arc<dyn PoolFactory>,
        retry: RetryPolicy,
        hardware: HardwareSchema,
    ) -> Self {
        let manager = Arc::new(ConnectionManager::with_retry_policy(factory, retry));
        Self {
            executor: SqlExecutor::new(manager),
            hardware: Arc::new(hardware),
        }
    }

    pub fn executor(&self) -> &SqlExecutor {
        &self.executor
    }

    pub fn hardware(&self) -> &HardwareSchema {
        &self.hardware
    }

    pub async fn get_tables(&self) -> DbResult<TableMap> {
        get_tables(&self.executor).await
    }

    /// Rows of `table` matching `filter`, limited to `attributes` if given.
    pub async fn select<S: AsRef<str>>(
        &self,
        table: &str,
        attributes: &[S],
        filter: &Filter,
    ) -> DbResult<Vec<Row>> {
        self.executor
            .get_set(&create_query(table, attributes, filter))
            .await
    }

    pub fn tracker(&self) -> ModificationTracker {
        ModificationTracker::new(self.executor.clone())
    }

    pub async fn replace_values(&self, replace: &ReplaceValues) -> DbResult<ReplaceSummary> {
        replace.apply(&self.executor).await
    }

    /// Create or alter the hardware audit tables. Returns the statements
    /// that were executed.
    pub async fn create_hardware_tables(&self) -> DbResult<Vec<String>> {
        let tables = self.get_tables().await?;
        let statements = self.hardware.ddl_statements(&tables);
        for statement in &statements {
            debug!(statement = %statement, "Applying hardware DDL");
            self.executor.execute(statement).await?;
        }
        info!(statements = statements.len(), "Hardware audit tables up to date");
        Ok(statements)
    }

    /// Search the hardware device tables.
    ///
    /// `classes` are class name patterns (`*` wildcard); empty means all
    /// classes. Only device attributes are searched. A class is skipped when
    /// the filter or `attributes` name an attribute it does not have. Every
    /// row is tagged with `hardwareClass` and lists all device attributes of
    /// its class, missing ones as null.
    pub async fn search_hardware<C, A>(
        &self,
        classes: &[C],
        attributes: &[A],
        filter: &Filter,
    ) -> DbResult<Vec<Row>>
    where
        C: AsRef<str>,
        A: AsRef<str>,
    {
        let mut filter = filter.clone();
        filter.remove("hardwareClass");
        filter.remove("type");
        let attributes: Vec<&str> = attributes
            .iter()
            .map(AsRef::as_ref)
            .filter(|a| *a != "hardwareClass")
            .collect();
        for attribute in &attributes {
            if !filter.contains(attribute) {
                filter = filter.with_none(*attribute);
            }
        }

        let mut results = Vec::new();
        for class_name in self.hardware.matching_classes(classes) {
            let Some(class_filter) = self.hardware.route_filter(class_name, &filter) else {
                continue;
            };
            let Some(class) = self.hardware.class(class_name) else {
                continue;
            };
            let columns: Vec<&str> = attributes
                .iter()
                .copied()
                .filter(|a| class.device_attributes().any(|d| d.name == *a))
                .collect();

            debug!(class = class_name, "Searching hardware");
            let query = create_query(&device_table(class_name), &columns, &class_filter);
            for row in self.executor.get_set(&query).await? {
                let mut tagged: Row = row
                    .into_iter()
                    .filter(|(column, _)| column != "hardware_id")
                    .collect();
                tagged.insert(
                    "hardwareClass".to_string(),
                    JsonValue::String(class_name.to_string()),
                );
                for attribute in class.device_attributes() {
                    tagged
                        .entry(attribute.name.clone())
                        .or_insert(JsonValue::Null);
                }
                results.push(tagged);
            }
        }
        Ok(results)
    }

    /// Drop every table. Tables other tables depend on fail until their
    /// dependents are gone, so passes repeat until all drops succeed or
    /// failures run out.
    pub async fn drop_all_tables(&self) -> DbResult<()> {
        let mut failures = 0;
        loop {
            let tables = self.get_tables().await?;
            let mut last_error = None;
            for table in tables.keys() {
                debug!(table = %table, "Dropping table");
                match self
                    .executor
                    .execute(&format!("DROP TABLE {}", quote_identifier(table)))
                    .await
                {
                    Ok(_) => {}
                    Err(e) => {
                        error!(table = %table, error = %e, "Dropping table failed");
                        failures += 1;
                        last_error = Some(e);
                        if failures >= MAX_DROP_FAILURES {
                            break;
                        }
                    }
                }
            }
            match last_error {
                None => {
                    info!(tables = tables.len(), "Dropped all tables");
                    return Ok(());
                }
                Some(e) if failures >= MAX_DROP_FAILURES => {
                    return Err(DbError::retries_exhausted("drop tables", failures, e));
                }
                Some(_) => {}
            }
        }
    }

    /// Close the pool.
    pub async fn shutdown(&self) {
        self.executor.manager().shutdown().await;
    }
}
