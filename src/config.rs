//! Engine configuration.
//!
//! Mirrors the shape of a typical database-client config struct: a plain value type
//! with a `Default` impl, no I/O of its own. Nothing here is read from a file;
//! callers that want `rustydb.toml`-style config loading compose this with their own
//! config crate at the application boundary.

use std::time::Duration;

/// Reserved schema name for current-state tables.
pub const DEFAULT_CURRENT_SCHEMA: &str = "current";

/// Reserved schema name for history tables.
pub const DEFAULT_HISTORY_SCHEMA: &str = "history";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `postgres` crate connection string, e.g. `"host=localhost user=postgres"`.
    pub connection_params: String,

    /// Schema holding `<name>` current-state tables. Normally "current".
    pub current_schema: String,

    /// Schema holding `<name>` history tables. Normally "history".
    pub history_schema: String,

    /// Per-statement timeout applied to DDL and as-of queries.
    pub statement_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connection_params: String::new(),
            current_schema: DEFAULT_CURRENT_SCHEMA.to_string(),
            history_schema: DEFAULT_HISTORY_SCHEMA.to_string(),
            statement_timeout: Duration::from_secs(30),
        }
    }
}
