//! DDL Compiler (C5).
//!
//! Translates each relational DDL operation into a coordinated sequence of
//! lower-level DDL against `current.<name>`, `history.<name>`, and the
//! `public.<name>` presentation view. Every plan below runs inside a single
//! transaction; on the temporal path, a plan that doesn't apply (`is_temporal`
//! false) is never built — callers delegate to the non-temporal DDL path instead.

use crate::config::EngineConfig;
use crate::connection::Connection;
use crate::domain::{ColumnDefinition, IndexDefinition, TableDefinition};
use crate::error::{Result, TemporalError};
use crate::quoting::{quote_ident, quote_qualified};
use crate::temporal_cache::TemporalCache;

/// The four system columns every `history.<name>` table carries in addition to
/// whatever it inherits from `current.<name>`.
pub struct HistorySystemColumns;

impl HistorySystemColumns {
    pub const HID: &'static str = "hid";
    pub const VALID_FROM: &'static str = "valid_from";
    pub const VALID_TO: &'static str = "valid_to";
    pub const RECORDED_AT: &'static str = "recorded_at";

    fn column_sql() -> Vec<String> {
        vec![
            format!("{} BIGSERIAL", quote_ident(Self::HID)),
            format!(
                "{} timestamp without time zone NOT NULL",
                quote_ident(Self::VALID_FROM)
            ),
            format!(
                "{} timestamp without time zone NOT NULL DEFAULT '{}'",
                quote_ident(Self::VALID_TO),
                crate::time::END_OF_TIME
            ),
            format!(
                "{} timestamp without time zone NOT NULL DEFAULT (now() AT TIME ZONE 'UTC')",
                quote_ident(Self::RECORDED_AT)
            ),
        ]
    }
}

pub struct DdlCompiler<'a> {
    config: &'a EngineConfig,
    cache: &'a TemporalCache,
}

impl<'a> DdlCompiler<'a> {
    pub fn new(config: &'a EngineConfig, cache: &'a TemporalCache) -> Self {
        Self { config, cache }
    }

    fn current_schema(&self) -> &str {
        &self.config.current_schema
    }

    fn history_schema(&self) -> &str {
        &self.config.history_schema
    }

    /// `create_table(name, options)`. Requires a primary key.
    pub fn create_table<C: Connection>(&self, conn: &mut C, table: &TableDefinition) -> Result<()> {
        let pk = table
            .primary_key
            .clone()
            .ok_or_else(|| TemporalError::PrimaryKeyRequired(table.name.clone()))?;

        tracing::info!(table = %table.name, "compiling create_table plan");
        let plan = self.create_table_plan(table, &pk);
        self.run_transaction(conn, &plan)?;
        self.cache.add(&table.name);
        Ok(())
    }

    fn create_table_plan(&self, table: &TableDefinition, pk: &str) -> Vec<String> {
        let mut stmts = Vec::new();
        stmts.push(format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_ident(self.current_schema())
        ));
        stmts.push(format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_ident(self.history_schema())
        ));
        stmts.push("CREATE EXTENSION IF NOT EXISTS btree_gist".to_string());

        let current_table = quote_qualified(self.current_schema(), &table.name);
        let column_sql: Vec<String> = table.columns.iter().map(ColumnDefinition::to_sql).collect();
        stmts.push(format!(
            "CREATE TABLE {current_table} ({}, PRIMARY KEY ({}))",
            column_sql.join(", "),
            quote_ident(pk)
        ));

        let history_table = quote_qualified(self.history_schema(), &table.name);
        let mut history_cols = HistorySystemColumns::column_sql();
        history_cols.push(format!(
            "CONSTRAINT {} CHECK ({} < {})",
            quote_ident(&format!("{}_valid_period_check", table.name)),
            quote_ident(HistorySystemColumns::VALID_FROM),
            quote_ident(HistorySystemColumns::VALID_TO),
        ));
        history_cols.push(format!(
            "CONSTRAINT {} EXCLUDE USING gist (\
                box(point(extract(epoch from {vf}), {pk}::double precision), \
                    point(extract(epoch from {vt} - interval '1 millisecond'), {pk}::double precision)) \
                WITH &&)",
            quote_ident(&format!("{}_no_overlap", table.name)),
            vf = quote_ident(HistorySystemColumns::VALID_FROM),
            vt = quote_ident(HistorySystemColumns::VALID_TO),
            pk = quote_ident(pk),
        ));
        stmts.push(format!(
            "CREATE TABLE {history_table} ({}) INHERITS ({current_table})",
            history_cols.join(", ")
        ));

        stmts.push(format!(
            "CREATE INDEX {} ON {history_table} ({}, {}) WITH (fillfactor = 100)",
            quote_ident(&format!("{}_valid_period_idx", table.name)),
            quote_ident(HistorySystemColumns::VALID_FROM),
            quote_ident(HistorySystemColumns::VALID_TO),
        ));
        stmts.push(format!(
            "CREATE INDEX {} ON {history_table} ({}) WITH (fillfactor = 90)",
            quote_ident(&format!("{}_pk_idx", table.name)),
            quote_ident(pk),
        ));

        stmts.push(self.view_sql(&table.name));
        stmts.extend(self.rule_sql(&table.name, &column_names(table), pk));

        stmts
    }

    /// `drop_table(name)`. `CASCADE` removes the inherited history table, the
    /// view, and the rules in one statement.
    pub fn drop_table<C: Connection>(&self, conn: &mut C, name: &str) -> Result<()> {
        tracing::info!(table = name, "compiling drop_table plan");
        let current_table = quote_qualified(self.current_schema(), name);
        self.run_transaction(conn, &[format!("DROP TABLE {current_table} CASCADE")])?;
        self.cache.del(name);
        Ok(())
    }

    /// `rename_table`: in both schemas, rename the table and its primary-key
    /// sequence, and rename the view.
    pub fn rename_table<C: Connection>(
        &self,
        conn: &mut C,
        old_name: &str,
        new_name: &str,
        pk: &str,
    ) -> Result<()> {
        tracing::info!(table = old_name, new_name, "compiling rename_table plan");
        let mut stmts = Vec::new();
        for schema in [self.current_schema(), self.history_schema()] {
            let from = quote_qualified(schema, old_name);
            stmts.push(format!("ALTER TABLE {from} RENAME TO {}", quote_ident(new_name)));
            stmts.push(format!(
                "ALTER SEQUENCE IF EXISTS {} RENAME TO {}",
                quote_qualified(schema, &format!("{old_name}_{pk}_seq")),
                quote_ident(&format!("{new_name}_{pk}_seq")),
            ));
        }
        stmts.push(format!(
            "ALTER VIEW {} RENAME TO {}",
            quote_qualified("public", old_name),
            quote_ident(new_name)
        ));
        self.run_transaction(conn, &stmts)?;
        self.cache.rename(old_name, new_name);
        Ok(())
    }

    /// `add_column` / `rename_column`: apply against `current.<name>`, then
    /// rebuild the view and its three rules (the rule bodies embed the column
    /// list, so any column change invalidates them).
    pub fn add_column<C: Connection>(
        &self,
        conn: &mut C,
        table: &str,
        column: &ColumnDefinition,
        pk: &str,
        all_columns_after: &[String],
    ) -> Result<()> {
        tracing::info!(table, column = %column.name, "compiling add_column plan");
        let mut stmts = vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_qualified(self.current_schema(), table),
            column.to_sql()
        )];
        stmts.extend(self.rebuild_view_and_rules(table, all_columns_after, pk));
        self.run_transaction(conn, &stmts)
    }

    pub fn rename_column<C: Connection>(
        &self,
        conn: &mut C,
        table: &str,
        old_name: &str,
        new_name: &str,
        pk: &str,
        all_columns_after: &[String],
    ) -> Result<()> {
        tracing::info!(table, old_name, new_name, "compiling rename_column plan");
        let mut stmts = vec![format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            quote_qualified(self.current_schema(), table),
            quote_ident(old_name),
            quote_ident(new_name)
        )];
        stmts.extend(self.rebuild_view_and_rules(table, all_columns_after, pk));
        self.run_transaction(conn, &stmts)
    }

    /// `change_column` / `remove_column`: destructive — drop the view, apply the
    /// change against `current.<name>` in-schema, rebuild the view and rules.
    pub fn change_column<C: Connection>(
        &self,
        conn: &mut C,
        table: &str,
        alter_clause: &str,
        pk: &str,
        all_columns_after: &[String],
    ) -> Result<()> {
        tracing::info!(table, alter_clause, "compiling change_column plan");
        let mut stmts = vec![
            format!("DROP VIEW {}", quote_qualified("public", table)),
            format!(
                "ALTER TABLE {} {alter_clause}",
                quote_qualified(self.current_schema(), table)
            ),
        ];
        stmts.push(self.view_sql(table));
        stmts.extend(self.rule_sql(table, all_columns_after, pk));
        self.run_transaction(conn, &stmts)
    }

    pub fn remove_column<C: Connection>(
        &self,
        conn: &mut C,
        table: &str,
        column: &str,
        pk: &str,
        all_columns_after: &[String],
    ) -> Result<()> {
        tracing::info!(table, column, "compiling remove_column plan");
        self.change_column(
            conn,
            table,
            &format!("DROP COLUMN {}", quote_ident(column)),
            pk,
            all_columns_after,
        )
    }

    /// `change_column_default` / `change_column_null`: apply against
    /// `current.<name>` only; the rules reference columns by name, not by
    /// nullability or default, so they are unaffected.
    pub fn change_column_default<C: Connection>(
        &self,
        conn: &mut C,
        table: &str,
        column: &str,
        default_expr: Option<&str>,
    ) -> Result<()> {
        tracing::info!(table, column, "compiling change_column_default plan");
        let clause = match default_expr {
            Some(expr) => format!("ALTER COLUMN {} SET DEFAULT {expr}", quote_ident(column)),
            None => format!("ALTER COLUMN {} DROP DEFAULT", quote_ident(column)),
        };
        self.run_transaction(
            conn,
            &[format!(
                "ALTER TABLE {} {clause}",
                quote_qualified(self.current_schema(), table)
            )],
        )
    }

    pub fn change_column_null<C: Connection>(
        &self,
        conn: &mut C,
        table: &str,
        column: &str,
        nullable: bool,
    ) -> Result<()> {
        tracing::info!(table, column, nullable, "compiling change_column_null plan");
        let clause = if nullable {
            format!("ALTER COLUMN {} DROP NOT NULL", quote_ident(column))
        } else {
            format!("ALTER COLUMN {} SET NOT NULL", quote_ident(column))
        };
        self.run_transaction(
            conn,
            &[format!(
                "ALTER TABLE {} {clause}",
                quote_qualified(self.current_schema(), table)
            )],
        )
    }

    /// `add_index`: apply against `current.<name>`, then against
    /// `history.<name>` with any `UNIQUE` flag stripped.
    pub fn add_index<C: Connection>(&self, conn: &mut C, table: &str, index: &IndexDefinition) -> Result<()> {
        tracing::info!(table, index = %index.name, "compiling add_index plan");
        let history_index = index.without_unique();
        let stmts = vec![
            index_sql(self.current_schema(), table, index),
            index_sql(self.history_schema(), table, &history_index),
        ];
        self.run_transaction(conn, &stmts)
    }

    /// `remove_index`: apply against both schemas.
    pub fn remove_index<C: Connection>(&self, conn: &mut C, index_name: &str) -> Result<()> {
        tracing::info!(index_name, "compiling remove_index plan");
        let stmts = vec![
            format!(
                "DROP INDEX {}",
                quote_qualified(self.current_schema(), index_name)
            ),
            format!(
                "DROP INDEX {}",
                quote_qualified(self.history_schema(), index_name)
            ),
        ];
        self.run_transaction(conn, &stmts)
    }

    fn rebuild_view_and_rules(&self, table: &str, columns: &[String], pk: &str) -> Vec<String> {
        let mut stmts = vec![format!("DROP VIEW {}", quote_qualified("public", table))];
        stmts.push(self.view_sql(table));
        stmts.extend(self.rule_sql(table, columns, pk));
        stmts
    }

    fn view_sql(&self, table: &str) -> String {
        format!(
            "CREATE VIEW {} AS SELECT * FROM ONLY {}",
            quote_qualified("public", table),
            quote_qualified(self.current_schema(), table)
        )
    }

    /// The three INSTEAD rules. Declaration order is load-bearing: for UPDATE,
    /// closing the currently-open history row must precede inserting the new
    /// one, or the exclusion constraint fires against itself.
    fn rule_sql(&self, table: &str, columns: &[String], pk: &str) -> Vec<String> {
        let public_view = quote_qualified("public", table);
        let current_table = quote_qualified(self.current_schema(), table);
        let history_table = quote_qualified(self.history_schema(), table);
        let col_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let new_col_values = columns
            .iter()
            .map(|c| format!("NEW.{}", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let quoted_pk = quote_ident(pk);

        let insert_rule = format!(
            "CREATE RULE {} AS ON INSERT TO {public_view} DO INSTEAD (\
                INSERT INTO {current_table} ({col_list}) VALUES ({new_col_values}); \
                INSERT INTO {history_table} ({col_list}, {valid_from}) \
                    SELECT {col_list}, (now() AT TIME ZONE 'UTC') FROM {current_table} \
                    WHERE {quoted_pk} = currval(pg_get_serial_sequence('{current_table}', '{pk}')))",
            quote_ident(&format!("{table}_insert")),
            valid_from = quote_ident(HistorySystemColumns::VALID_FROM),
        );

        let update_rule = format!(
            "CREATE RULE {} AS ON UPDATE TO {public_view} DO INSTEAD (\
                UPDATE {history_table} SET {valid_to} = (now() AT TIME ZONE 'UTC') \
                    WHERE {quoted_pk} = OLD.{quoted_pk} AND {valid_to} = '{end_of_time}'; \
                INSERT INTO {history_table} ({col_list}, {valid_from}) \
                    VALUES ({new_col_values}, (now() AT TIME ZONE 'UTC')); \
                UPDATE {current_table} SET ({col_list}) = ({new_col_values}) \
                    WHERE {quoted_pk} = OLD.{quoted_pk})",
            quote_ident(&format!("{table}_update")),
            valid_to = quote_ident(HistorySystemColumns::VALID_TO),
            valid_from = quote_ident(HistorySystemColumns::VALID_FROM),
            end_of_time = crate::time::END_OF_TIME,
        );

        let delete_rule = format!(
            "CREATE RULE {} AS ON DELETE TO {public_view} DO INSTEAD (\
                UPDATE {history_table} SET {valid_to} = (now() AT TIME ZONE 'UTC') \
                    WHERE {quoted_pk} = OLD.{quoted_pk} AND {valid_to} = '{end_of_time}'; \
                DELETE FROM {current_table} WHERE {quoted_pk} = OLD.{quoted_pk})",
            quote_ident(&format!("{table}_delete")),
            valid_to = quote_ident(HistorySystemColumns::VALID_TO),
            end_of_time = crate::time::END_OF_TIME,
        );

        vec![insert_rule, update_rule, delete_rule]
    }

    /// Metadata introspection: for temporal tables, redirected to the `current`
    /// schema with `allow_nesting = false` by the caller's `SchemaRouter`, since
    /// the driver's stock introspection queries use `current_schema()`.
    pub fn column_definitions<C: Connection>(
        &self,
        conn: &mut C,
        table: &str,
    ) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = {} \
             ORDER BY ordinal_position",
            crate::quoting::quote_literal(table)
        );
        let rows = conn.query(&sql)?;
        Ok(rows.into_iter().filter_map(|mut r| r.pop().flatten()).collect())
    }

    fn run_transaction<C: Connection>(&self, conn: &mut C, stmts: &[String]) -> Result<()> {
        let mut batch = String::from("BEGIN;\n");
        for stmt in stmts {
            tracing::debug!(sql = %stmt, "executing DDL statement");
            batch.push_str(stmt);
            batch.push_str(";\n");
        }
        batch.push_str("COMMIT;\n");
        conn.execute_batch(&batch)
    }
}

fn column_names(table: &TableDefinition) -> Vec<String> {
    table.columns.iter().map(|c| c.name.clone()).collect()
}

fn index_sql(schema: &str, table: &str, index: &IndexDefinition) -> String {
    let unique = if index.unique { "UNIQUE " } else { "" };
    let cols = index
        .columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "CREATE {unique}INDEX {} ON {} ({cols})",
        quote_ident(&index.name),
        quote_qualified(schema, table)
    );
    if let Some(fillfactor) = index.fillfactor {
        sql.push_str(&format!(" WITH (fillfactor = {fillfactor})"));
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::FakeConnection;

    fn sample_table() -> TableDefinition {
        TableDefinition::new("foos")
            .with_column(ColumnDefinition::new("id", "serial").not_null())
            .with_column(ColumnDefinition::new("name", "text"))
            .with_primary_key("id")
    }

    #[test]
    fn create_table_without_primary_key_fails_with_no_ddl_executed() {
        let config = EngineConfig::default();
        let cache = TemporalCache::new();
        let compiler = DdlCompiler::new(&config, &cache);
        let mut conn = FakeConnection::new();

        let table = TableDefinition::new("foos").with_column(ColumnDefinition::new("name", "text"));
        let err = compiler.create_table(&mut conn, &table).unwrap_err();

        assert!(matches!(err, TemporalError::PrimaryKeyRequired(_)));
        assert!(conn.executed.is_empty());
    }

    #[test]
    fn create_table_emits_schemas_history_table_and_three_rules() {
        let config = EngineConfig::default();
        let cache = TemporalCache::new();
        let compiler = DdlCompiler::new(&config, &cache);
        let mut conn = FakeConnection::new();

        compiler.create_table(&mut conn, &sample_table()).unwrap();

        assert_eq!(conn.executed.len(), 1);
        let batch = &conn.executed[0];
        assert!(batch.contains("CREATE SCHEMA IF NOT EXISTS \"current\""));
        assert!(batch.contains("CREATE SCHEMA IF NOT EXISTS \"history\""));
        assert!(batch.contains("INHERITS (\"current\".\"foos\")"));
        assert!(batch.contains("EXCLUDE USING gist"));
        assert!(batch.contains("CHECK (\"valid_from\" < \"valid_to\")"));
        assert!(batch.contains("CREATE RULE \"foos_insert\""));
        assert!(batch.contains("CREATE RULE \"foos_update\""));
        assert!(batch.contains("CREATE RULE \"foos_delete\""));

        // Update rule closes the open history row before inserting the new one.
        let update_pos = batch.find("CREATE RULE \"foos_update\"").unwrap();
        let close_pos = batch[update_pos..].find("SET \"valid_to\"").unwrap();
        let insert_pos = batch[update_pos..]
            .find("INSERT INTO \"history\".\"foos\"")
            .unwrap();
        assert!(close_pos < insert_pos, "close-history must precede insert-history");
    }

    #[test]
    fn create_table_adds_to_cache_on_success() {
        let config = EngineConfig::default();
        let cache = TemporalCache::new();
        let compiler = DdlCompiler::new(&config, &cache);
        let mut conn = FakeConnection::new();

        compiler.create_table(&mut conn, &sample_table()).unwrap();

        assert!(cache.is_temporal(&mut conn, "current", "history", "foos").unwrap());
    }

    #[test]
    fn add_index_strips_unique_on_the_history_side() {
        let config = EngineConfig::default();
        let cache = TemporalCache::new();
        let compiler = DdlCompiler::new(&config, &cache);
        let mut conn = FakeConnection::new();

        let index = IndexDefinition::new("foos_email_idx", vec!["email".to_string()]).unique();
        compiler.add_index(&mut conn, "foos", &index).unwrap();

        let batch = &conn.executed[0];
        assert!(batch.contains("CREATE UNIQUE INDEX \"foos_email_idx\" ON \"current\".\"foos\""));
        assert!(batch.contains("CREATE INDEX \"foos_email_idx\" ON \"history\".\"foos\""));
        assert!(!batch.contains("CREATE UNIQUE INDEX \"foos_email_idx\" ON \"history\""));
    }

    #[test]
    fn add_index_applies_fillfactor_to_both_schemas() {
        let config = EngineConfig::default();
        let cache = TemporalCache::new();
        let compiler = DdlCompiler::new(&config, &cache);
        let mut conn = FakeConnection::new();

        let index = IndexDefinition::new("foos_name_idx", vec!["name".to_string()]).with_fillfactor(80);
        compiler.add_index(&mut conn, "foos", &index).unwrap();

        let batch = &conn.executed[0];
        assert_eq!(batch.matches("WITH (fillfactor = 80)").count(), 2);
    }

    #[test]
    fn drop_table_cascades_and_invalidates_cache() {
        let config = EngineConfig::default();
        let cache = TemporalCache::new();
        cache.add("foos");
        let compiler = DdlCompiler::new(&config, &cache);
        let mut conn = FakeConnection::new();

        compiler.drop_table(&mut conn, "foos").unwrap();

        assert!(conn.executed[0].contains("DROP TABLE \"current\".\"foos\" CASCADE"));
        conn.push_result(vec![]);
        conn.push_result(vec![]);
        assert!(!cache.is_temporal(&mut conn, "current", "history", "foos").unwrap());
    }

    #[test]
    fn rename_table_renames_both_schemas_sequence_and_view() {
        let config = EngineConfig::default();
        let cache = TemporalCache::new();
        cache.add("foos");
        let compiler = DdlCompiler::new(&config, &cache);
        let mut conn = FakeConnection::new();

        compiler.rename_table(&mut conn, "foos", "bazzes", "id").unwrap();

        let batch = &conn.executed[0];
        assert!(batch.contains("ALTER TABLE \"current\".\"foos\" RENAME TO \"bazzes\""));
        assert!(batch.contains("ALTER TABLE \"history\".\"foos\" RENAME TO \"bazzes\""));
        assert!(batch.contains("ALTER VIEW \"public\".\"foos\" RENAME TO \"bazzes\""));
        assert!(cache.is_temporal(&mut conn, "current", "history", "bazzes").unwrap());
    }
}
