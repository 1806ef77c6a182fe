//! As-Of Query Rewriter (C7).
//!
//! Rewrites reads of a temporal entity to see the version of each row valid at a
//! given instant, via a `WITH <table> AS (...)` CTE whose body selects from
//! `history.<table>`. The "Relation builder" that actually assembles a join tree and
//! calls into this rewriter is an external collaborator; this
//! module exposes [`RelationBuilder`] as the seam it calls through, never a concrete
//! ORM of its own.

use sqlparser::ast::{Expr, SelectItem, SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::connection::Connection;
use crate::error::Result;
use crate::quoting::{quote_ident, quote_qualified, quote_timestamp};
use crate::temporal_cache::TemporalCache;
use crate::time::UtcTimestamp;

/// Aggregate function names recognized when suppressing the implicit ordering and
/// `as_of_time` projection in [`AsOfRewriter::of`].
const AGGREGATE_FUNCTIONS: &[&str] = &[
    "min", "max", "sum", "count", "avg", "stddev", "stddev_pop", "stddev_samp", "var_pop",
    "var_samp", "variance", "corr", "regr_avgx", "regr_avgy", "regr_count", "regr_intercept",
    "regr_r2", "regr_slope", "regr_sxx", "regr_sxy", "regr_syy", "bit_and", "bit_or", "bool_and",
    "bool_or", "array_agg", "string_agg", "xmlagg", "every",
];

/// The abstract join-assembling collaborator this rewriter calls into. A real
/// relation builder implements this over its own query DSL; this crate never
/// constructs one itself.
pub trait RelationBuilder {
    /// Logical names joined into this relation besides its own table, scanned by
    /// the transitive join-rewrite hook.
    fn joined_tables(&self) -> &[String];

    /// The ORDER/WHERE fragment to reattach once the relation is rewound to
    /// history. `None` means "apply the entity's default scopes instead" — the
    /// caller is expected to have already resolved those before calling `as_of`.
    fn order_and_where(&self) -> Option<&str>;
}

pub struct AsOfRewriter<'a> {
    cache: &'a TemporalCache,
    history_schema: &'a str,
}

impl<'a> AsOfRewriter<'a> {
    pub fn new(cache: &'a TemporalCache, history_schema: &'a str) -> Self {
        Self {
            cache,
            history_schema,
        }
    }

    /// `as_of(T, base_scope)`. `current_schema` and `history_schema` are only
    /// needed to answer "is this joined table temporal" via the cache; the CTEs
    /// themselves only ever read `history.<name>`.
    pub fn as_of<C: Connection>(
        &self,
        conn: &mut C,
        current_schema: &str,
        table: &str,
        as_of: UtcTimestamp,
        relation: &dyn RelationBuilder,
    ) -> Result<String> {
        let t_literal = quote_timestamp(&as_of);
        tracing::debug!(table, as_of = %t_literal, "rewriting as_of query");
        let mut ctes = vec![self.history_cte(table, &t_literal)];

        for joined in relation.joined_tables() {
            if self
                .cache
                .is_temporal(conn, current_schema, self.history_schema, joined)?
            {
                ctes.push(self.history_cte(joined, &t_literal));
            }
        }

        let mut sql = format!(
            "WITH {} SELECT * FROM {}",
            ctes.join(", "),
            quote_ident(table)
        );
        if let Some(fragment) = relation.order_and_where() {
            sql.push(' ');
            sql.push_str(fragment);
        }
        Ok(sql)
    }

    /// The "history at T" CTE body shared by the driving table and every joined
    /// table the transitive-rewrite hook pulls in.
    fn history_cte(&self, table: &str, t_literal: &str) -> String {
        let table_ident = quote_ident(table);
        format!(
            "{table_ident} AS (SELECT {table_ident}.*, {t_literal} AS as_of_time FROM {} \
             WHERE {t_literal} >= \"valid_from\" AND {t_literal} < \"valid_to\")",
            quote_qualified(self.history_schema, table),
        )
    }

    /// `of(object)`: the complete history of one logical row, ordered by
    /// `(recorded_at, hid)` unless the caller's own select list contains an
    /// aggregate, in which case both the ordering and the computed `as_of_time`
    /// projection are suppressed.
    pub fn of(&self, table: &str, pk: &str, rid: &str, select_list: Option<&str>) -> String {
        let aggregated = select_list.map(has_aggregate).unwrap_or(false);
        let projection = match select_list {
            Some(list) if aggregated => list.to_string(),
            Some(list) => format!("{list}, LEAST(\"valid_to\", now()) AS as_of_time"),
            None => "*, LEAST(\"valid_to\", now()) AS as_of_time".to_string(),
        };

        let mut sql = format!(
            "SELECT {projection} FROM {} WHERE {} = {}",
            quote_qualified(self.history_schema, table),
            quote_ident(pk),
            crate::quoting::quote_literal(rid),
        );
        if !aggregated {
            sql.push_str(" ORDER BY \"recorded_at\", \"hid\"");
        }
        sql
    }

    /// `all()`: the entire history, read-only, ordered by `(recorded_at, hid)`.
    pub fn all(&self, table: &str) -> String {
        format!(
            "SELECT * FROM {} ORDER BY \"recorded_at\", \"hid\"",
            quote_qualified(self.history_schema, table)
        )
    }
}

/// Walks the parsed AST of a `SELECT <list>` fragment looking for a call to any
/// name in [`AGGREGATE_FUNCTIONS`], rather than matching the source text with a
/// regex.
fn has_aggregate(select_list: &str) -> bool {
    let probe = format!("SELECT {select_list} FROM t");
    let statements = match Parser::parse_sql(&PostgreSqlDialect {}, &probe) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let Some(Statement::Query(query)) = statements.into_iter().next() else {
        return false;
    };
    let SetExpr::Select(select) = *query.body else {
        return false;
    };
    select.projection.iter().any(|item| match item {
        SelectItem::UnnamedExpr(expr) => expr_has_aggregate(expr),
        SelectItem::ExprWithAlias { expr, .. } => expr_has_aggregate(expr),
        _ => false,
    })
}

fn expr_has_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Function(func) => {
            let name = func.name.to_string().to_lowercase();
            AGGREGATE_FUNCTIONS.contains(&name.as_str())
        }
        Expr::BinaryOp { left, right, .. } => expr_has_aggregate(left) || expr_has_aggregate(right),
        Expr::UnaryOp { expr, .. } => expr_has_aggregate(expr),
        Expr::Nested(expr) => expr_has_aggregate(expr),
        Expr::Cast { expr, .. } => expr_has_aggregate(expr),
        Expr::IsNull(expr) | Expr::IsNotNull(expr) => expr_has_aggregate(expr),
        Expr::Between { expr, low, high, .. } => {
            expr_has_aggregate(expr) || expr_has_aggregate(low) || expr_has_aggregate(high)
        }
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
            ..
        } => {
            operand.as_deref().is_some_and(expr_has_aggregate)
                || conditions.iter().any(expr_has_aggregate)
                || results.iter().any(expr_has_aggregate)
                || else_result.as_deref().is_some_and(expr_has_aggregate)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::FakeConnection;
    use crate::time::parse;

    struct FixedRelation {
        joined: Vec<String>,
        fragment: Option<String>,
    }

    impl RelationBuilder for FixedRelation {
        fn joined_tables(&self) -> &[String] {
            &self.joined
        }

        fn order_and_where(&self) -> Option<&str> {
            self.fragment.as_deref()
        }
    }

    #[test]
    fn as_of_with_no_joins_emits_a_single_cte() {
        let cache = TemporalCache::new();
        let rewriter = AsOfRewriter::new(&cache, "history");
        let mut conn = FakeConnection::new();
        let relation = FixedRelation {
            joined: vec![],
            fragment: None,
        };

        let sql = rewriter
            .as_of(
                &mut conn,
                "current",
                "widgets",
                parse("2024-01-01 00:00:00").unwrap(),
                &relation,
            )
            .unwrap();

        assert_eq!(sql.matches("AS (SELECT").count(), 1);
        assert!(sql.contains("FROM \"history\".\"widgets\""));
        assert!(sql.contains("'2024-01-01 00:00:00.000000' >= \"valid_from\""));
    }

    #[test]
    fn as_of_adds_a_cte_for_every_temporal_joined_table() {
        let cache = TemporalCache::new();
        cache.add("owners");
        let rewriter = AsOfRewriter::new(&cache, "history");
        let mut conn = FakeConnection::new();
        let relation = FixedRelation {
            joined: vec!["owners".to_string(), "tags".to_string()],
            fragment: Some("WHERE \"widgets\".\"active\" ORDER BY \"widgets\".\"id\"".to_string()),
        };

        let sql = rewriter
            .as_of(
                &mut conn,
                "current",
                "widgets",
                parse("2024-01-01 00:00:00").unwrap(),
                &relation,
            )
            .unwrap();

        assert_eq!(sql.matches("AS (SELECT").count(), 2, "owners joined, tags is not temporal");
        assert!(sql.contains("\"owners\" AS (SELECT"));
        assert!(sql.ends_with("ORDER BY \"widgets\".\"id\""));
    }

    #[test]
    fn of_orders_by_recorded_at_and_hid_without_aggregates() {
        let cache = TemporalCache::new();
        let rewriter = AsOfRewriter::new(&cache, "history");
        let sql = rewriter.of("widgets", "id", "7", None);
        assert!(sql.contains("LEAST(\"valid_to\", now()) AS as_of_time"));
        assert!(sql.ends_with("ORDER BY \"recorded_at\", \"hid\""));
    }

    #[test]
    fn of_suppresses_ordering_and_as_of_time_for_aggregate_select_list() {
        let cache = TemporalCache::new();
        let rewriter = AsOfRewriter::new(&cache, "history");
        let sql = rewriter.of("widgets", "id", "7", Some("count(*)"));
        assert!(!sql.contains("as_of_time"));
        assert!(!sql.contains("ORDER BY"));
        assert!(sql.starts_with("SELECT count(*)"));
    }

    #[test]
    fn has_aggregate_detects_nested_calls_inside_expressions() {
        assert!(has_aggregate("sum(amount) + 1"));
        assert!(!has_aggregate("price"));
    }

    #[test]
    fn all_is_read_only_and_ordered() {
        let cache = TemporalCache::new();
        let rewriter = AsOfRewriter::new(&cache, "history");
        let sql = rewriter.all("widgets");
        assert_eq!(
            sql,
            "SELECT * FROM \"history\".\"widgets\" ORDER BY \"recorded_at\", \"hid\""
        );
    }
}
