//! Temporal Object Cache (C4).
//!
//! Process-wide mapping from logical table name to "is this table temporal?".
//! Populated at DDL-execution time by the DDL Compiler and consulted by the As-Of
//! Query Rewriter at query-compile time. Single-writer (DDL under transaction),
//! multi-reader (query rewriter); entries are monotone-stable between DDL events.

use dashmap::DashMap;

use crate::connection::Connection;
use crate::error::Result;

#[derive(Debug, Default)]
pub struct TemporalCache {
    entries: DashMap<String, bool>,
}

impl TemporalCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Marks `name` as temporal. Called by `create_table` on success.
    pub fn add(&self, name: &str) {
        self.entries.insert(name.to_string(), true);
    }

    /// Removes `name` from the cache. Called by `drop_table`.
    pub fn del(&self, name: &str) {
        self.entries.remove(name);
    }

    /// Atomically moves a cache entry to a new logical name. Called by
    /// `rename_table`.
    pub fn rename(&self, old_name: &str, new_name: &str) {
        self.entries.remove(old_name);
        self.entries.insert(new_name.to_string(), true);
    }

    /// Returns whether `name` is known to be temporal, memoized. On a cache miss
    /// this verifies that both `current.<name>` and `history.<name>` exist.
    pub fn is_temporal<C: Connection>(
        &self,
        conn: &mut C,
        current_schema: &str,
        history_schema: &str,
        name: &str,
    ) -> Result<bool> {
        if let Some(hit) = self.entries.get(name) {
            return Ok(*hit);
        }

        let exists = table_exists(conn, current_schema, name)? && table_exists(conn, history_schema, name)?;
        self.entries.insert(name.to_string(), exists);
        Ok(exists)
    }
}

fn table_exists<C: Connection>(conn: &mut C, schema: &str, name: &str) -> Result<bool> {
    let sql = format!(
        "SELECT 1 FROM pg_catalog.pg_tables WHERE schemaname = {} AND tablename = {}",
        crate::quoting::quote_literal(schema),
        crate::quoting::quote_literal(name),
    );
    Ok(!conn.query(&sql)?.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::FakeConnection;

    #[test]
    fn add_then_is_temporal_hits_cache_without_querying() {
        let cache = TemporalCache::new();
        cache.add("foos");

        let mut conn = FakeConnection::new();
        let result = cache
            .is_temporal(&mut conn, "current", "history", "foos")
            .unwrap();

        assert!(result);
        assert!(conn.queried.is_empty(), "cache hit must not query the database");
    }

    #[test]
    fn miss_queries_both_schemas_and_memoizes() {
        let cache = TemporalCache::new();
        let mut conn = FakeConnection::new();
        conn.push_result(vec![vec![Some("1".to_string())]]);
        conn.push_result(vec![vec![Some("1".to_string())]]);

        let result = cache
            .is_temporal(&mut conn, "current", "history", "bars")
            .unwrap();

        assert!(result);
        assert_eq!(conn.queried.len(), 2);

        // Second call is a cache hit.
        let result2 = cache
            .is_temporal(&mut conn, "current", "history", "bars")
            .unwrap();
        assert!(result2);
        assert_eq!(conn.queried.len(), 2);
    }

    #[test]
    fn del_invalidates_a_dropped_table() {
        let cache = TemporalCache::new();
        cache.add("foos");
        cache.del("foos");

        let mut conn = FakeConnection::new();
        conn.push_result(vec![]);
        conn.push_result(vec![]);

        let result = cache
            .is_temporal(&mut conn, "current", "history", "foos")
            .unwrap();
        assert!(!result);
    }

    #[test]
    fn rename_moves_the_cache_entry_atomically() {
        let cache = TemporalCache::new();
        cache.add("foos");
        cache.rename("foos", "bazzes");

        let mut conn = FakeConnection::new();
        assert!(cache
            .is_temporal(&mut conn, "current", "history", "bazzes")
            .unwrap());
        assert!(conn.queried.is_empty());
    }
}
