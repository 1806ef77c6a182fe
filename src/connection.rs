//! Database connection abstraction.
//!
//! The design calls for an explicit "relation rewriter" interface that the mapper
//! calls... do not monkey-patch." The same principle applies one layer down: the
//! Schema Router, DDL Compiler, and Amendment utility depend on this trait, not on
//! the `postgres` crate directly, so the core is testable against [`FakeConnection`]
//! without a live PostgreSQL server.

use crate::error::Result;

/// A blocking database connection. Every method blocks on the database; there are
/// no internal yield points.
pub trait Connection {
    /// Executes one or more semicolon-separated statements with no result set.
    fn execute_batch(&mut self, sql: &str) -> Result<()>;

    /// Executes a single statement and returns each result row as a vector of
    /// nullable text fields, in column order. Sufficient for the catalog
    /// introspection and timestamp-enumeration queries this crate issues; result
    /// values are parsed by the caller (via `time::parse`, etc).
    fn query(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>>;

    /// Current `search_path` setting, as PostgreSQL reports it.
    fn current_search_path(&mut self) -> Result<String>;

    /// Sets `search_path` for the remainder of the session (or until changed again).
    fn set_search_path(&mut self, path: &str) -> Result<()>;

    /// Whether the enclosing transaction is in an aborted state (PostgreSQL rejects
    /// every statement but `ROLLBACK` in this state).
    fn transaction_is_aborted(&self) -> bool;
}

/// Thin [`Connection`] over a real `postgres::Client`.
pub struct PgConnection {
    client: postgres::Client,
    aborted: bool,
}

impl PgConnection {
    pub fn new(client: postgres::Client) -> Self {
        Self {
            client,
            aborted: false,
        }
    }
}

impl Connection for PgConnection {
    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        match self.client.batch_execute(sql) {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.code().is_some() {
                    self.aborted = true;
                }
                Err(e.into())
            }
        }
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        let rows = self.client.query(sql, &[])?;
        Ok(rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| row.try_get::<_, Option<String>>(i).unwrap_or(None))
                    .collect()
            })
            .collect())
    }

    fn current_search_path(&mut self) -> Result<String> {
        let rows = self.query("SHOW search_path")?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut row| row.pop().flatten())
            .unwrap_or_else(|| "\"$user\", public".to_string()))
    }

    fn set_search_path(&mut self, path: &str) -> Result<()> {
        self.execute_batch(&format!("SET search_path = {path}"))?;
        self.aborted = false;
        Ok(())
    }

    fn transaction_is_aborted(&self) -> bool {
        self.aborted
    }
}

/// Test double recording every statement it is asked to execute, so component
/// tests can assert on emitted SQL without a live server.
#[derive(Debug, Default)]
pub struct FakeConnection {
    pub executed: Vec<String>,
    pub queried: Vec<String>,
    pub search_path: String,
    pub aborted: bool,
    /// Canned rows to return from the next `query()` call, consumed in order.
    pub query_results: std::collections::VecDeque<Vec<Vec<Option<String>>>>,
}

impl FakeConnection {
    pub fn new() -> Self {
        Self {
            search_path: "\"$user\", public".to_string(),
            ..Default::default()
        }
    }

    pub fn push_result(&mut self, rows: Vec<Vec<Option<String>>>) {
        self.query_results.push_back(rows);
    }
}

impl Connection for FakeConnection {
    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.executed.push(sql.to_string());
        Ok(())
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        self.queried.push(sql.to_string());
        Ok(self.query_results.pop_front().unwrap_or_default())
    }

    fn current_search_path(&mut self) -> Result<String> {
        Ok(self.search_path.clone())
    }

    fn set_search_path(&mut self, path: &str) -> Result<()> {
        self.search_path = path.to_string();
        Ok(())
    }

    fn transaction_is_aborted(&self) -> bool {
        self.aborted
    }
}
