//! Object filter to SQL predicate translation.
//!
//! A [`Filter`] maps column names to the values a row may have. Values of one
//! field are OR-ed, fields are AND-ed. A field that is unset or has an empty
//! value list does not constrain anything; pass `[Null]` to ask for rows where
//! the column is NULL.
//!
//! Text values get extra treatment:
//! - `>5`, `<= 2.5`, `<>0`: numeric comparison (`=`, `<`, `>`, `<=`, `>=`, `<>`)
//! - anything containing `*`: `LIKE`, with `*` as the zero-or-more wildcard
//!   and `_`, `%`, `\` matched literally
//! - `\*` is a literal asterisk in both LIKE and equality matches

use crate::error::{DbError, DbResult};
use crate::sql::escape::{ESCAPED_ASTERISK, quote_identifier, quote_text};
use crate::sql::value::{SqlValue, ValueMap};
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::LazyLock;

static COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(<=|>=|<>|<|>|=)\s*([-+]?[0-9]+(?:\.[0-9]+)?)\s*$").expect("valid regex")
});

/// Field constraints, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    fields: Vec<(String, Option<Vec<SqlValue>>)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constrain `field` to a single value.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.set(field, Some(vec![value.into()]));
        self
    }

    /// Constrain `field` to any of `values`.
    pub fn with_any<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.set(field, Some(values.into_iter().map(Into::into).collect()));
        self
    }

    /// Mention `field` without constraining it.
    pub fn with_none(mut self, field: impl Into<String>) -> Self {
        self.set(field, None);
        self
    }

    /// Replace the constraint on `field`, keeping its original position.
    pub fn set(&mut self, field: impl Into<String>, values: Option<Vec<SqlValue>>) {
        let field = field.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some(entry) => entry.1 = values,
            None => self.fields.push((field, values)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Option<Vec<SqlValue>>> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, values)| values)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn remove(&mut self, field: &str) -> Option<Option<Vec<SqlValue>>> {
        let idx = self.fields.iter().position(|(name, _)| name == field)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&[SqlValue]>)> {
        self.fields
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build a filter from a JSON object: `null` leaves a field unset, arrays
    /// list alternatives, anything else is a single value.
    pub fn from_json(value: &JsonValue) -> DbResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| DbError::bad_value("Filter must be a JSON object"))?;
        let mut filter = Filter::new();
        for (field, value) in object {
            let values = match value {
                JsonValue::Null => None,
                JsonValue::Array(items) => Some(items.iter().map(SqlValue::from_json).collect()),
                other => Some(vec![SqlValue::from_json(other)]),
            };
            filter.set(field.clone(), values);
        }
        Ok(filter)
    }

    /// Translate into a WHERE clause body. Empty when nothing constrains.
    pub fn to_sql(&self) -> String {
        self.fields
            .iter()
            .filter_map(|(field, values)| {
                let values = values.as_deref().filter(|v| !v.is_empty())?;
                let alternatives: Vec<String> =
                    values.iter().map(|value| predicate(field, value)).collect();
                Some(format!("({})", alternatives.join(" OR ")))
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

fn predicate(field: &str, value: &SqlValue) -> String {
    let column = quote_identifier(field);
    match value {
        SqlValue::Null => format!("{column} IS NULL"),
        SqlValue::Text(text) => text_predicate(&column, text),
        other => format!("{column} = {}", other.to_literal()),
    }
}

fn text_predicate(column: &str, text: &str) -> String {
    if let Some((operator, number)) = parse_comparison(text) {
        return format!("{column} {operator} {number}");
    }
    match like_pattern(text) {
        Some(pattern) => format!("{column} LIKE {}", quote_text(&pattern)),
        None => format!("{column} = {}", quote_text(&text.replace(ESCAPED_ASTERISK, "*"))),
    }
}

/// Split `"<= 2.5"` into `("<=", "2.5")`.
pub fn parse_comparison(text: &str) -> Option<(&str, &str)> {
    let captures = COMPARISON.captures(text)?;
    Some((captures.get(1)?.as_str(), captures.get(2)?.as_str()))
}

/// LIKE pattern for `text`, or `None` when it has no unescaped `*`.
pub fn like_pattern(text: &str) -> Option<String> {
    let mut pattern = String::with_capacity(text.len() + 4);
    let mut wildcard = false;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'*') => {
                chars.next();
                pattern.push('*');
            }
            '*' => {
                wildcard = true;
                pattern.push('%');
            }
            '_' | '%' | '\\' => {
                pattern.push('\\');
                pattern.push(c);
            }
            _ => pattern.push(c),
        }
    }
    wildcard.then_some(pattern)
}

/// `SELECT` over `table` restricted by `filter`; all columns when
/// `attributes` is empty.
pub fn create_query<S: AsRef<str>>(table: &str, attributes: &[S], filter: &Filter) -> String {
    let select = if attributes.is_empty() {
        "*".to_string()
    } else {
        attributes
            .iter()
            .map(|a| quote_identifier(a.as_ref()))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let table = quote_identifier(table);
    let query = match filter.to_sql() {
        where_clause if where_clause.is_empty() => format!("SELECT {select} FROM {table}"),
        where_clause => format!("SELECT {select} FROM {table} WHERE {where_clause}"),
    };
    tracing::debug!(query = %query, "Created query");
    query
}

/// Exact-match condition identifying one row: every entry must be equal,
/// NULL entries must be NULL.
pub fn unique_condition(values: &ValueMap) -> String {
    values
        .iter()
        .map(|(column, value)| match value {
            SqlValue::Null => format!("{} IS NULL", quote_identifier(column)),
            other => format!("{} = {}", quote_identifier(column), other.to_literal()),
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}
