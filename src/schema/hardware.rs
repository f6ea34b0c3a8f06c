//! Hardware audit schema.
//!
//! Every hardware class from the audit configuration gets two tables:
//! `HARDWARE_DEVICE_<class>` with the device attributes (scope `g`) and
//! `HARDWARE_CONFIG_<class>` with the per-host attributes (scope `i`). The
//! schema is loaded once and drives both the DDL and the routing of hardware
//! searches.

use crate::error::{DbError, DbResult};
use crate::schema::introspect::{TableMap, get_table_creation_options};
use crate::sql::escape::quote_identifier;
use crate::sql::filter::Filter;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub const DEVICE_TABLE_PREFIX: &str = "HARDWARE_DEVICE_";
pub const CONFIG_TABLE_PREFIX: &str = "HARDWARE_CONFIG_";

/// Where an attribute is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    /// Property of the device itself.
    #[serde(rename = "g")]
    Device,
    /// Property of a device as seen on one host.
    #[serde(rename = "i")]
    Host,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareAttribute {
    pub name: String,
    pub sql_type: String,
    pub scope: Scope,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareClass {
    pub name: String,
    pub attributes: Vec<HardwareAttribute>,
}

impl HardwareClass {
    pub fn attribute(&self, name: &str) -> Option<&HardwareAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn device_attributes(&self) -> impl Iterator<Item = &HardwareAttribute> {
        self.attributes.iter().filter(|a| a.scope == Scope::Device)
    }
}

// Configuration file shape.
#[derive(Deserialize)]
struct ClassEntry {
    #[serde(rename = "Class")]
    class: ClassName,
    #[serde(rename = "Values", default)]
    values: Vec<ValueEntry>,
}

#[derive(Deserialize)]
struct ClassName {
    #[serde(rename = "Opsi")]
    opsi: String,
}

#[derive(Deserialize)]
struct ValueEntry {
    #[serde(rename = "Opsi")]
    opsi: String,
    #[serde(rename = "Type")]
    sql_type: String,
    #[serde(rename = "Scope")]
    scope: Scope,
}

/// Hardware classes in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareSchema {
    classes: Vec<HardwareClass>,
}

pub fn device_table(class: &str) -> String {
    format!("{DEVICE_TABLE_PREFIX}{class}")
}

pub fn config_table(class: &str) -> String {
    format!("{CONFIG_TABLE_PREFIX}{class}")
}

impl HardwareSchema {
    pub fn from_json_str(json: &str) -> DbResult<Self> {
        let entries: Vec<ClassEntry> = serde_json::from_str(json)
            .map_err(|e| DbError::bad_value(format!("Invalid hardware audit configuration: {e}")))?;

        let mut classes: Vec<HardwareClass> = Vec::with_capacity(entries.len());
        for entry in entries {
            let attributes = entry
                .values
                .into_iter()
                .map(|v| HardwareAttribute {
                    name: v.opsi,
                    sql_type: v.sql_type,
                    scope: v.scope,
                })
                .collect();
            // A later entry for the same class replaces the earlier one.
            classes.retain(|c| c.name != entry.class.opsi);
            classes.push(HardwareClass {
                name: entry.class.opsi,
                attributes,
            });
        }
        debug!(classes = classes.len(), "Loaded hardware audit configuration");
        Ok(Self { classes })
    }

    pub fn from_file(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            DbError::bad_value(format!(
                "Cannot read hardware audit configuration {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json_str(&json)
    }

    pub fn classes(&self) -> &[HardwareClass] {
        &self.classes
    }

    pub fn class(&self, name: &str) -> Option<&HardwareClass> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// CREATE or ALTER statements bringing the hardware tables in line with
    /// the configuration.
    ///
    /// Missing tables are created with all attributes of their scope.
    /// Existing tables get `ALTER COLUMN .. TYPE` for known columns and `ADD`
    /// for new ones; nothing is emitted for an existing table without
    /// attributes of its scope.
    pub fn ddl_statements(&self, existing: &TableMap) -> Vec<String> {
        let mut statements = Vec::new();
        for class in &self.classes {
            let mut device = TableDdl::new(
                device_table(&class.name),
                existing,
                &["\"hardware_id\" SERIAL"],
                "PRIMARY KEY (\"hardware_id\")",
            );
            let mut config = TableDdl::new(
                config_table(&class.name),
                existing,
                &[
                    "\"config_id\" SERIAL",
                    "\"hostId\" varchar(50) NOT NULL",
                    "\"hardware_id\" INTEGER NOT NULL",
                    "\"firstseen\" TIMESTAMP NOT NULL DEFAULT '0001-01-01 00:00:00'",
                    "\"lastseen\" TIMESTAMP NOT NULL DEFAULT '0001-01-01 00:00:00'",
                    "\"state\" SMALLINT NOT NULL",
                ],
                "PRIMARY KEY (\"config_id\")",
            );
            for attribute in &class.attributes {
                match attribute.scope {
                    Scope::Device => device.column(attribute),
                    Scope::Host => config.column(attribute),
                }
            }
            statements.extend(device.finish());
            statements.extend(config.finish());
        }
        statements
    }

    /// Class names matching any of `patterns`, where `*` matches any run of
    /// characters. No patterns means every class.
    pub fn matching_classes<S: AsRef<str>>(&self, patterns: &[S]) -> Vec<&str> {
        if patterns.is_empty() {
            return self.classes.iter().map(|c| c.name.as_str()).collect();
        }
        let regexes: Vec<Regex> = patterns
            .iter()
            .filter_map(|p| {
                let pattern = format!("^{}$", regex::escape(p.as_ref()).replace("\\*", ".*"));
                Regex::new(&pattern).ok()
            })
            .collect();
        self.classes
            .iter()
            .map(|c| c.name.as_str())
            .filter(|name| regexes.iter().any(|re| re.is_match(name)))
            .collect()
    }

    /// The part of `filter` that applies to the device table of `class`.
    ///
    /// Returns `None` when the class cannot match: the filter names an
    /// attribute the class does not have, or the filter is non-empty but
    /// none of its attributes are device attributes.
    pub fn route_filter(&self, class: &str, filter: &Filter) -> Option<Filter> {
        let class = self.class(class)?;
        let mut routed = Filter::new();
        for (field, values) in filter.iter() {
            let Some(attribute) = class.attribute(field) else {
                debug!(
                    class = %class.name,
                    attribute = field,
                    "Skipping hardware class without attribute"
                );
                return None;
            };
            if attribute.scope == Scope::Device {
                routed.set(field, values.map(<[_]>::to_vec));
            }
        }
        if routed.is_empty() && !filter.is_empty() {
            return None;
        }
        Some(routed)
    }
}

/// Accumulates one CREATE or ALTER TABLE statement.
struct TableDdl {
    table: String,
    existing_columns: Option<Vec<String>>,
    lines: Vec<String>,
    primary_key: &'static str,
    processed: usize,
}

impl TableDdl {
    fn new(
        table: String,
        existing: &TableMap,
        fixed_columns: &[&str],
        primary_key: &'static str,
    ) -> Self {
        let existing_columns = existing.get(&table.to_uppercase()).cloned();
        let lines = match existing_columns {
            Some(_) => Vec::new(),
            None => fixed_columns.iter().map(|c| c.to_string()).collect(),
        };
        Self {
            table,
            existing_columns,
            lines,
            primary_key,
            processed: 0,
        }
    }

    fn column(&mut self, attribute: &HardwareAttribute) {
        let name = quote_identifier(&attribute.name);
        let line = match &self.existing_columns {
            Some(columns) if columns.iter().any(|c| c == &attribute.name) => {
                format!("ALTER COLUMN {name} TYPE {}", attribute.sql_type)
            }
            Some(_) => format!("ADD {name} {} NULL", attribute.sql_type),
            None => format!("{name} {} NULL", attribute.sql_type),
        };
        self.lines.push(line);
        self.processed += 1;
    }

    fn finish(mut self) -> Option<String> {
        let table = quote_identifier(&self.table);
        if self.existing_columns.is_some() {
            if self.processed == 0 {
                return None;
            }
            return Some(format!("ALTER TABLE {table}\n{}", self.lines.join(",\n")));
        }
        self.lines.push(self.primary_key.to_string());
        let options = get_table_creation_options(&self.table);
        Some(
            format!("CREATE TABLE {table} (\n{}\n) {options}", self.lines.join(",\n"))
                .trim_end()
                .to_string(),
        )
    }
}
