//! Amendment Utility (C9).
//!
//! Administrative override of a history row's validity period. Both endpoints are
//! `UtcTimestamp`, which this crate can only construct via [`crate::time::parse`] or
//! [`crate::time::UtcTimestamp::from_naive_utc`] on a value the caller has already
//! established is UTC — so `NonUtcTimestamp` can't actually be raised from here; it
//! stays in the error taxonomy for callers further out that accept raw strings.

use crate::connection::Connection;
use crate::error::Result;
use crate::quoting::{quote_ident, quote_qualified, quote_timestamp};
use crate::time::UtcTimestamp;

pub struct Amender<'a> {
    history_schema: &'a str,
}

impl<'a> Amender<'a> {
    pub fn new(history_schema: &'a str) -> Self {
        Self { history_schema }
    }

    /// Rewrites `history.<table>`'s `[valid_from, valid_to)` for the row identified
    /// by `hid`. Intended for data migration; this does not re-validate the
    /// exclusion constraint beyond what PostgreSQL already enforces on `COMMIT`.
    pub fn amend_period<C: Connection>(
        &self,
        conn: &mut C,
        table: &str,
        hid: u64,
        from: UtcTimestamp,
        to: UtcTimestamp,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET {} = {}, {} = {} WHERE {} = {hid}",
            quote_qualified(self.history_schema, table),
            quote_ident(crate::ddl::HistorySystemColumns::VALID_FROM),
            quote_timestamp(&from),
            quote_ident(crate::ddl::HistorySystemColumns::VALID_TO),
            quote_timestamp(&to),
            quote_ident(crate::ddl::HistorySystemColumns::HID),
        );
        conn.execute_batch(&sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::FakeConnection;
    use crate::time::parse;

    #[test]
    fn amend_period_updates_the_identified_history_row() {
        let amender = Amender::new("history");
        let mut conn = FakeConnection::new();

        amender
            .amend_period(
                &mut conn,
                "foos",
                42,
                parse("2024-01-01 00:00:00").unwrap(),
                parse("2024-02-01 00:00:00").unwrap(),
            )
            .unwrap();

        let sql = &conn.executed[0];
        assert!(sql.starts_with("UPDATE \"history\".\"foos\" SET"));
        assert!(sql.contains("\"valid_from\" = '2024-01-01 00:00:00.000000'"));
        assert!(sql.contains("\"valid_to\" = '2024-02-01 00:00:00.000000'"));
        assert!(sql.contains("\"hid\" = 42"));
    }
}
