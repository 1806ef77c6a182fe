//! History Model Factory (C6).
//!
//! Synthesizes the companion relation for a temporal entity's history, as a value
//! type parametrized over [`TemporalEntityDescriptor`] rather than a generated class
//! rather than generating one at runtime. `HistoryView` is
//! cheap to construct and carries no state of its own beyond what it's given.

use crate::connection::Connection;
use crate::ddl::HistorySystemColumns;
use crate::domain::TemporalEntityDescriptor;
use crate::error::{Result, TemporalError};
use crate::quoting::{quote_ident, quote_qualified};
use crate::time::{self, UtcTimestamp};

/// One row of `history.<table>`, as read back from the database.
///
/// `as_of_time` is the instant this row was read as current for: a user-supplied
/// time for an explicit as-of lookup ([`HistoryView::at`]), or `LEAST(valid_to,
/// now())` when the row is read without one (`pred`/`succ`/`first`/`last`).
#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub hid: u64,
    pub rid: String,
    pub valid_from: UtcTimestamp,
    pub valid_to: UtcTimestamp,
    pub recorded_at: UtcTimestamp,
    pub as_of_time: UtcTimestamp,
    pub attributes: Vec<Option<String>>,
}

/// History companion for a temporal entity, conceptually `M::History`; here,
/// a borrowed view rather than a synthesized type.
pub struct HistoryView<'a> {
    entity: &'a TemporalEntityDescriptor,
    current_schema: &'a str,
    history_schema: &'a str,
}

impl<'a> HistoryView<'a> {
    pub fn new(
        entity: &'a TemporalEntityDescriptor,
        current_schema: &'a str,
        history_schema: &'a str,
    ) -> Self {
        Self {
            entity,
            current_schema,
            history_schema,
        }
    }

    fn history_table(&self) -> String {
        quote_qualified(self.history_schema, &self.entity.name)
    }

    fn current_table(&self) -> String {
        quote_qualified(self.current_schema, &self.entity.name)
    }

    fn pk(&self) -> String {
        quote_ident(&self.entity.primary_key)
    }

    /// Adjacent version whose interval closes where `row` opens (`valid_to =
    /// this.valid_from`). Returns `None` when the boundary touches the canonical
    /// "beginning of time" — there is no predecessor of the first version.
    pub fn pred<C: Connection>(&self, conn: &mut C, row: &HistoryRow) -> Result<Option<HistoryRow>> {
        if row.valid_from.naive() == time::parse("0001-01-01 00:00:00")?.naive() {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {hid}, {rid}::text, {vf}, {vt}, {ra}, {as_of} FROM {table} \
             WHERE {rid} = {row_rid} AND {vt} = {boundary}",
            hid = quote_ident(HistorySystemColumns::HID),
            rid = self.pk(),
            vf = quote_ident(HistorySystemColumns::VALID_FROM),
            vt = quote_ident(HistorySystemColumns::VALID_TO),
            ra = quote_ident(HistorySystemColumns::RECORDED_AT),
            as_of = as_of_time_sql(),
            table = self.history_table(),
            row_rid = crate::quoting::quote_literal(&row.rid),
            boundary = crate::quoting::quote_timestamp(&row.valid_from),
        );
        self.one_row(conn, &sql)
    }

    /// Adjacent version whose interval opens where `row` closes (`valid_from =
    /// this.valid_to`). Returns `None` when the boundary touches `END_OF_TIME`.
    pub fn succ<C: Connection>(&self, conn: &mut C, row: &HistoryRow) -> Result<Option<HistoryRow>> {
        if time::format(&row.valid_to) == crate::time::END_OF_TIME {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {hid}, {rid}::text, {vf}, {vt}, {ra}, {as_of} FROM {table} \
             WHERE {rid} = {row_rid} AND {vf} = {boundary}",
            hid = quote_ident(HistorySystemColumns::HID),
            rid = self.pk(),
            vf = quote_ident(HistorySystemColumns::VALID_FROM),
            vt = quote_ident(HistorySystemColumns::VALID_TO),
            ra = quote_ident(HistorySystemColumns::RECORDED_AT),
            as_of = as_of_time_sql(),
            table = self.history_table(),
            row_rid = crate::quoting::quote_literal(&row.rid),
            boundary = crate::quoting::quote_timestamp(&row.valid_to),
        );
        self.one_row(conn, &sql)
    }

    /// The earliest version of `rid`, ordered by `valid_from`.
    pub fn first<C: Connection>(&self, conn: &mut C, rid: &str) -> Result<Option<HistoryRow>> {
        self.bound(conn, rid, "ASC")
    }

    /// The latest version of `rid`, ordered by `valid_from`.
    pub fn last<C: Connection>(&self, conn: &mut C, rid: &str) -> Result<Option<HistoryRow>> {
        self.bound(conn, rid, "DESC")
    }

    /// The version of `rid` valid at `as_of`, with `as_of_time` carrying that
    /// user-supplied instant rather than a recomputed `LEAST(valid_to, now())`.
    pub fn at<C: Connection>(&self, conn: &mut C, rid: &str, as_of: &UtcTimestamp) -> Result<Option<HistoryRow>> {
        let sql = format!(
            "SELECT {hid}, {rid_col}::text, {vf}, {vt}, {ra}, {as_of} FROM {table} \
             WHERE {rid_col} = {rid_lit} AND {vf} <= {as_of} AND {vt} > {as_of}",
            hid = quote_ident(HistorySystemColumns::HID),
            rid_col = self.pk(),
            vf = quote_ident(HistorySystemColumns::VALID_FROM),
            vt = quote_ident(HistorySystemColumns::VALID_TO),
            ra = quote_ident(HistorySystemColumns::RECORDED_AT),
            as_of = crate::quoting::quote_timestamp(as_of),
            table = self.history_table(),
            rid_lit = crate::quoting::quote_literal(rid),
        );
        let mut row = self.one_row(conn, &sql)?;
        if let Some(row) = row.as_mut() {
            row.as_of_time = as_of.clone();
        }
        Ok(row)
    }

    fn bound<C: Connection>(&self, conn: &mut C, rid: &str, direction: &str) -> Result<Option<HistoryRow>> {
        let sql = format!(
            "SELECT {hid}, {rid_col}::text, {vf}, {vt}, {ra}, {as_of} FROM {table} \
             WHERE {rid_col} = {rid_lit} ORDER BY {vf} {direction} LIMIT 1",
            hid = quote_ident(HistorySystemColumns::HID),
            rid_col = self.pk(),
            vf = quote_ident(HistorySystemColumns::VALID_FROM),
            vt = quote_ident(HistorySystemColumns::VALID_TO),
            ra = quote_ident(HistorySystemColumns::RECORDED_AT),
            as_of = as_of_time_sql(),
            table = self.history_table(),
            rid_lit = crate::quoting::quote_literal(rid),
        );
        self.one_row(conn, &sql)
    }

    /// The current (live) row, read from `current.<name>` rather than the history
    /// table.
    pub fn record<C: Connection>(&self, conn: &mut C, rid: &str) -> Result<Option<Vec<Option<String>>>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = {}",
            self.current_table(),
            self.pk(),
            crate::quoting::quote_literal(rid)
        );
        Ok(conn.query(&sql)?.into_iter().next())
    }

    /// History rows are read-only.
    pub fn destroy(&self, hid: u64) -> Result<()> {
        Err(TemporalError::ReadOnlyRecord(hid))
    }

    fn one_row<C: Connection>(&self, conn: &mut C, sql: &str) -> Result<Option<HistoryRow>> {
        let rows = conn.query(sql)?;
        rows.into_iter().next().map(parse_history_row).transpose()
    }
}

/// The `LEAST(valid_to, now())` projection shared by every history query that
/// doesn't already know its caller's as-of time.
fn as_of_time_sql() -> String {
    format!(
        "LEAST({}, (now() AT TIME ZONE 'UTC')) AS as_of_time",
        quote_ident(HistorySystemColumns::VALID_TO),
    )
}

fn parse_history_row(mut row: Vec<Option<String>>) -> Result<HistoryRow> {
    if row.len() < 6 {
        return Err(TemporalError::MalformedTimestamp(
            "history row has fewer than 6 system columns".to_string(),
        ));
    }
    let attributes = row.split_off(6);
    let as_of_time = time::parse(row[5].as_deref().unwrap_or_default())?;
    let recorded_at = time::parse(row[4].as_deref().unwrap_or_default())?;
    let valid_to = time::parse(row[3].as_deref().unwrap_or_default())?;
    let valid_from = time::parse(row[2].as_deref().unwrap_or_default())?;
    let rid = row[1].clone().unwrap_or_default();
    let hid = row[0]
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| TemporalError::MalformedTimestamp("hid is not an integer".to_string()))?;
    Ok(HistoryRow {
        hid,
        rid,
        valid_from,
        valid_to,
        recorded_at,
        as_of_time,
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::FakeConnection;

    fn entity() -> TemporalEntityDescriptor {
        TemporalEntityDescriptor::new("foos", "id")
    }

    #[test]
    fn destroy_always_fails_read_only() {
        let descriptor = entity();
        let view = HistoryView::new(&descriptor, "current", "history");
        let err = view.destroy(7).unwrap_err();
        assert!(matches!(err, TemporalError::ReadOnlyRecord(7)));
    }

    #[test]
    fn pred_returns_none_at_the_beginning_of_time() {
        let descriptor = entity();
        let view = HistoryView::new(&descriptor, "current", "history");
        let mut conn = FakeConnection::new();

        let row = HistoryRow {
            hid: 1,
            rid: "1".to_string(),
            valid_from: time::parse("0001-01-01 00:00:00").unwrap(),
            valid_to: time::parse("2024-01-01 00:00:00").unwrap(),
            recorded_at: time::parse("2024-01-01 00:00:00").unwrap(),
            as_of_time: time::parse("2024-01-01 00:00:00").unwrap(),
            attributes: vec![],
        };

        let result = view.pred(&mut conn, &row).unwrap();
        assert!(result.is_none());
        assert!(conn.queried.is_empty());
    }

    #[test]
    fn succ_returns_none_at_end_of_time() {
        let descriptor = entity();
        let view = HistoryView::new(&descriptor, "current", "history");
        let mut conn = FakeConnection::new();

        let row = HistoryRow {
            hid: 1,
            rid: "1".to_string(),
            valid_from: time::parse("2024-01-01 00:00:00").unwrap(),
            valid_to: time::parse("9999-12-31 00:00:00").unwrap(),
            recorded_at: time::parse("2024-01-01 00:00:00").unwrap(),
            as_of_time: time::parse("2024-01-01 00:00:00").unwrap(),
            attributes: vec![],
        };

        let result = view.succ(&mut conn, &row).unwrap();
        assert!(result.is_none());
        assert!(conn.queried.is_empty());
    }

    #[test]
    fn pred_queries_for_the_adjoining_boundary_row() {
        let descriptor = entity();
        let view = HistoryView::new(&descriptor, "current", "history");
        let mut conn = FakeConnection::new();
        conn.push_result(vec![vec![
            Some("1".to_string()),
            Some("1".to_string()),
            Some("2023-01-01 00:00:00.000000".to_string()),
            Some("2024-01-01 00:00:00.000000".to_string()),
            Some("2023-01-01 00:00:00.000000".to_string()),
            Some("2024-01-01 00:00:00.000000".to_string()),
        ]]);

        let row = HistoryRow {
            hid: 2,
            rid: "1".to_string(),
            valid_from: time::parse("2024-01-01 00:00:00").unwrap(),
            valid_to: time::parse("9999-12-31 00:00:00").unwrap(),
            recorded_at: time::parse("2024-01-01 00:00:00").unwrap(),
            as_of_time: time::parse("2024-01-01 00:00:00").unwrap(),
            attributes: vec![],
        };

        let result = view.pred(&mut conn, &row).unwrap().unwrap();
        assert_eq!(result.hid, 1);
        assert!(conn.queried[0].contains("\"valid_to\" = '2024-01-01 00:00:00.000000'"));
        assert!(conn.queried[0].contains("AS as_of_time"));
    }

    #[test]
    fn at_overrides_as_of_time_with_the_caller_supplied_instant() {
        let descriptor = entity();
        let view = HistoryView::new(&descriptor, "current", "history");
        let mut conn = FakeConnection::new();
        conn.push_result(vec![vec![
            Some("1".to_string()),
            Some("1".to_string()),
            Some("2023-01-01 00:00:00.000000".to_string()),
            Some("9999-12-31 00:00:00.000000".to_string()),
            Some("2023-01-01 00:00:00.000000".to_string()),
            Some("2023-06-01 00:00:00.000000".to_string()),
        ]]);

        let as_of = time::parse("2023-06-01 00:00:00").unwrap();
        let result = view.at(&mut conn, "1", &as_of).unwrap().unwrap();

        assert_eq!(result.as_of_time.naive(), as_of.naive());
        assert!(conn.queried[0].contains("\"valid_from\" <= '2023-06-01 00:00:00.000000'"));
        assert!(conn.queried[0].contains("\"valid_to\" > '2023-06-01 00:00:00.000000'"));
    }

    #[test]
    fn record_reads_from_current_schema() {
        let descriptor = entity();
        let view = HistoryView::new(&descriptor, "current", "history");
        let mut conn = FakeConnection::new();
        conn.push_result(vec![vec![Some("1".to_string()), Some("alice".to_string())]]);

        let result = view.record(&mut conn, "1").unwrap();
        assert!(result.is_some());
        assert!(conn.queried[0].starts_with("SELECT * FROM \"current\".\"foos\""));
    }
}
