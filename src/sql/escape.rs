//! Escaping rules for values interpolated into SQL text.
//!
//! Statements are built as plain text, so every interpolated value goes
//! through [`quote_text`] or one of the LIKE helpers here. Text literals are
//! emitted as PostgreSQL escape strings (`E'...'`), which makes the backslash
//! rule independent of `standard_conforming_strings`.

pub const ESCAPED_BACKSLASH: &str = "\\\\";
pub const ESCAPED_APOSTROPHE: &str = "''";
pub const ESCAPED_UNDERSCORE: &str = "\\_";
pub const ESCAPED_PERCENT: &str = "\\%";
pub const ESCAPED_ASTERISK: &str = "\\*";

pub fn escape_backslash(value: &str) -> String {
    value.replace('\\', ESCAPED_BACKSLASH)
}

pub fn escape_apostrophe(value: &str) -> String {
    value.replace('\'', ESCAPED_APOSTROPHE)
}

pub fn escape_underscore(value: &str) -> String {
    value.replace('_', ESCAPED_UNDERSCORE)
}

pub fn escape_percent(value: &str) -> String {
    value.replace('%', ESCAPED_PERCENT)
}

/// Mark every `*` as literal so the filter translator does not treat it as a
/// wildcard.
pub fn escape_asterisk(value: &str) -> String {
    value.replace('*', ESCAPED_ASTERISK)
}

/// Render text as a quoted SQL literal.
pub fn quote_text(value: &str) -> String {
    format!("E'{}'", escape_apostrophe(&escape_backslash(value)))
}

/// Render an identifier in double quotes, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Inverse of the backslash and apostrophe rules applied by [`quote_text`],
/// operating on the text between the quotes.
pub fn unescape_text(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('\\', Some('\\')) | ('\'', Some('\'')) => {
                out.push(c);
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}
