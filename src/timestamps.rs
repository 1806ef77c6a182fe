//! Timestamp Enumerator (C8).
//!
//! For a temporal entity (and, transitively, its non-polymorphic `belongs_to`/
//! `has_one` associations that are themselves temporal), returns the sorted,
//! distinct set of instants at which any of those rows changed.

use crate::connection::Connection;
use crate::domain::{Association, AssociationKind, TemporalEntityDescriptor};
use crate::error::Result;
use crate::history::HistoryView;
use crate::quoting::{quote_ident, quote_literal, quote_qualified, quote_timestamp};
use crate::schema_router::SchemaRouter;
use crate::time::{self, UtcTimestamp};

pub struct TimestampEnumerator<'a> {
    current_schema: &'a str,
    history_schema: &'a str,
}

impl<'a> TimestampEnumerator<'a> {
    pub fn new(current_schema: &'a str, history_schema: &'a str) -> Self {
        Self {
            current_schema,
            history_schema,
        }
    }

    /// `entity_is_temporal` controls whether the driving table is read from
    /// `history.<name>` (and contributes its own `valid_from`/`valid_to` to the
    /// result) or from `public.<name>` purely to scope the join by id.
    pub fn enumerate<C: Connection>(
        &self,
        conn: &mut C,
        router: &SchemaRouter,
        entity: &TemporalEntityDescriptor,
        entity_is_temporal: bool,
        record_id: Option<&str>,
    ) -> Result<Vec<UtcTimestamp>> {
        let associations = temporal_associations(entity);

        let driving_schema = if entity_is_temporal {
            self.history_schema
        } else {
            "public"
        };
        let mut froms = vec![format!("{} AS e", quote_qualified(driving_schema, &entity.name))];
        let mut ts_exprs = Vec::new();
        if entity_is_temporal {
            ts_exprs.push("e.\"valid_from\"".to_string());
            ts_exprs.push("e.\"valid_to\"".to_string());
        }

        for (i, assoc) in associations.iter().enumerate() {
            let alias = format!("a{i}");
            froms.push(format!(
                "LEFT OUTER JOIN {} AS {alias} ON {alias}.{} = e.{}",
                quote_qualified(self.history_schema, &assoc.target.name),
                quote_ident(&assoc.target.primary_key),
                quote_ident(&format!("{}_id", assoc.name)),
            ));
            ts_exprs.push(format!("{alias}.\"valid_from\""));
            ts_exprs.push(format!("{alias}.\"valid_to\""));
        }

        let mut inner_where = String::new();
        if let Some(rid) = record_id {
            inner_where = format!(
                " WHERE e.{} = {}",
                quote_ident(&entity.primary_key),
                quote_literal(rid)
            );
        }

        let lower_bound = match record_id {
            Some(rid) => {
                let history = HistoryView::new(entity, self.current_schema, self.history_schema);
                history.first(conn, rid)?.map(|row| row.valid_from)
            }
            None => None,
        };

        let mut outer_where = vec!["ts IS NOT NULL".to_string(), "ts < now()".to_string()];
        if let Some(bound) = &lower_bound {
            outer_where.push(format!("ts >= {}", quote_timestamp(bound)));
        }

        let sql = format!(
            "SELECT DISTINCT ts FROM (SELECT UNNEST(ARRAY[{}]) AS ts FROM {}{inner_where}) enumerated \
             WHERE {} ORDER BY ts",
            ts_exprs.join(", "),
            froms.join(" "),
            outer_where.join(" AND "),
        );

        let rows = router.on_schema(conn, self.history_schema, false, |c| c.query(&sql))?;
        Ok(rows
            .into_iter()
            .filter_map(|mut r| r.pop().flatten())
            .filter_map(|s| time::parse(&s).ok())
            .collect())
    }
}

fn temporal_associations(entity: &TemporalEntityDescriptor) -> Vec<&Association> {
    entity
        .associations
        .iter()
        .filter(|a| {
            !a.is_polymorphic
                && matches!(a.kind, AssociationKind::BelongsTo | AssociationKind::HasOne)
                && a.is_temporal
        })
        .collect()
}
