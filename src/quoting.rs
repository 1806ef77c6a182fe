//! Identifier Quoting (C2).
//!
//! All SQL composition in the DDL compiler, the as-of rewriter, and the timestamp
//! enumerator MUST pass identifiers through [`quote_ident`] and literals through
//! [`quote_literal`] or [`quote_timestamp`]. No string concatenation of user input
//! is permitted anywhere else in this crate.

use crate::time::{format, UtcTimestamp};

/// Quotes a schema/table/column name as a PostgreSQL double-quoted identifier,
/// doubling any embedded `"`.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a qualified identifier (`schema.table`) with each part quoted separately.
pub fn quote_qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Quotes a string value as a PostgreSQL single-quoted literal, doubling any
/// embedded `'`. Does not use backslash escaping (`standard_conforming_strings`).
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quotes a UTC timestamp as a literal suitable for comparison against
/// `timestamp without time zone` columns.
pub fn quote_timestamp(t: &UtcTimestamp) -> String {
    quote_literal(&format(t))
}
