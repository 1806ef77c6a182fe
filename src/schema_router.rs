//! Schema Router (C3).
//!
//! Executes a block with the connection's `search_path` set to a given schema,
//! restoring it on every exit path. Only the outermost frame of a nested call
//! mutates `search_path`; inner frames ride along on the outer frame's setting.
//!
//! If the enclosing transaction is aborted when the block is done, restoration is
//! deferred: PostgreSQL rejects any statement but `ROLLBACK` in that state, so
//! issuing a `SET search_path` would itself fail. The router instead marks the
//! cached path invalid so the next read refreshes it from the server.

use std::cell::Cell;

use crate::connection::Connection;
use crate::error::Result;

/// Per-connection router state. Not `Send`: one engine per connection, one
/// connection per thread.
pub struct SchemaRouter {
    depth: Cell<u32>,
    cached_path: std::cell::RefCell<Option<String>>,
}

impl Default for SchemaRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRouter {
    pub fn new() -> Self {
        Self {
            depth: Cell::new(0),
            cached_path: std::cell::RefCell::new(None),
        }
    }

    /// Runs `body` with `search_path` set to `schema`.
    ///
    /// When `allow_nesting` is `false`, an inner call made while already inside an
    /// `on_schema` frame is a no-op with respect to path changes (the body still
    /// runs, just without the router touching `search_path` again) — this is what
    /// catalog introspection needs, since the driver's own introspection queries
    /// assume `current_schema()` and must not be redirected a second time.
    pub fn on_schema<C, F, T>(
        &self,
        conn: &mut C,
        schema: &str,
        allow_nesting: bool,
        body: F,
    ) -> Result<T>
    where
        C: Connection,
        F: FnOnce(&mut C) -> Result<T>,
    {
        let is_outermost = self.depth.get() == 0;
        let should_mutate = is_outermost || allow_nesting;

        if should_mutate {
            let previous = self.path_for_restore(conn)?;
            self.depth.set(self.depth.get() + 1);
            tracing::debug!(schema, "setting search_path");
            conn.set_search_path(&quote_schema(schema))?;

            let result = body(conn);

            self.depth.set(self.depth.get() - 1);
            self.restore(conn, previous)?;
            result
        } else {
            self.depth.set(self.depth.get() + 1);
            let result = body(conn);
            self.depth.set(self.depth.get() - 1);
            result
        }
    }

    fn path_for_restore<C: Connection>(&self, conn: &mut C) -> Result<String> {
        if let Some(cached) = self.cached_path.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let path = conn.current_search_path()?;
        *self.cached_path.borrow_mut() = Some(path.clone());
        Ok(path)
    }

    fn restore<C: Connection>(&self, conn: &mut C, previous: String) -> Result<()> {
        if conn.transaction_is_aborted() {
            tracing::warn!("deferring search_path restore: transaction is aborted");
            *self.cached_path.borrow_mut() = None;
            return Ok(());
        }
        conn.set_search_path(&previous)?;
        *self.cached_path.borrow_mut() = Some(previous);
        Ok(())
    }

    /// Current nesting depth, for tests.
    pub fn depth(&self) -> u32 {
        self.depth.get()
    }
}

fn quote_schema(schema: &str) -> String {
    crate::quoting::quote_ident(schema)
}
