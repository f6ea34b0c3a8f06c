//! Typed values for statement building.
//!
//! Callers hand over [`SqlValue`]s instead of arbitrary objects; the single
//! [`SqlValue::to_literal`] match is the only place literals are rendered.

use crate::sql::escape::quote_text;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Column name → value, as passed to `insert` and `update`.
pub type ValueMap = BTreeMap<String, SqlValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Pre-rendered SQL such as `CURRENT_TIMESTAMP`; emitted verbatim.
    Raw(String),
}

impl SqlValue {
    /// Render this value as a SQL literal.
    pub fn to_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(true) => "true".to_string(),
            SqlValue::Bool(false) => "false".to_string(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Float(v) if v.is_nan() => "'NaN'".to_string(),
            SqlValue::Float(v) if v.is_infinite() && *v > 0.0 => "'Infinity'".to_string(),
            SqlValue::Float(v) if v.is_infinite() => "'-Infinity'".to_string(),
            SqlValue::Float(v) => v.to_string(),
            SqlValue::Text(v) => quote_text(v),
            SqlValue::Raw(sql) => sql.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Convert a decoded JSON value (e.g. a row cell) back into a SQL value.
    /// Arrays and objects are stored as their JSON text.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => SqlValue::Null,
            JsonValue::Bool(b) => SqlValue::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }

    /// JSON form as it would come back from a row-dict cursor.
    pub fn to_json(&self) -> JsonValue {
        match self {
            SqlValue::Null => JsonValue::Null,
            SqlValue::Bool(b) => JsonValue::Bool(*b),
            SqlValue::Int(i) => JsonValue::from(*i),
            SqlValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(f.to_string())),
            SqlValue::Text(s) | SqlValue::Raw(s) => JsonValue::String(s.clone()),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v.into())
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        SqlValue::Int(v.into())
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}
