//! Query template rendering.
//!
//! Model queries are minijinja templates. Besides the interval variables
//! (`start_ds`, `end_ds`, `start_ts`, `end_ts`, `start_ms`, `end_ms`,
//! `latest_ds`, `latest_ts`) they may call `ref('schema.model')`, which
//! resolves to the physical table backing that upstream model, and use
//! `this` for the relation being written or audited.

use crate::error::{DbError, DbResult};
use minijinja::{context, Environment, Error, ErrorKind};
use qy_core::time::{to_ds, to_ts};
use qy_core::Timestamp;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Values available to a query template.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub start: Timestamp,
    /// Exclusive end of the interval
    pub end: Timestamp,
    pub latest: Timestamp,
    /// Model name to the relation `ref()` resolves it to
    pub tables: Arc<BTreeMap<String, String>>,
    /// Relation the query writes to or audits
    pub this: Option<String>,
}

impl RenderContext {
    pub fn new(start: Timestamp, end: Timestamp, latest: Timestamp) -> Self {
        Self {
            start,
            end,
            latest,
            tables: Arc::new(BTreeMap::new()),
            this: None,
        }
    }

    pub fn with_tables(mut self, tables: BTreeMap<String, String>) -> Self {
        self.tables = Arc::new(tables);
        self
    }

    pub fn with_this(mut self, this: impl Into<String>) -> Self {
        self.this = Some(this.into());
        self
    }
}

/// Render `template` for `model`.
pub fn render_query(model: &str, template: &str, ctx: &RenderContext) -> DbResult<String> {
    let mut env = Environment::new();
    let missing: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    let tables = Arc::clone(&ctx.tables);
    let missing_ref = Arc::clone(&missing);
    env.add_function("ref", move |name: String| -> Result<String, Error> {
        match tables.get(&name) {
            Some(table) => Ok(table.clone()),
            None => {
                *missing_ref.lock().unwrap_or_else(|p| p.into_inner()) = Some(name.clone());
                Err(Error::new(
                    ErrorKind::InvalidOperation,
                    format!("unknown model '{name}'"),
                ))
            }
        }
    });

    // Inclusive last day of the interval, for BETWEEN-style filters.
    let last = (ctx.end - 1).max(ctx.start);
    let rendered = env.render_str(
        template,
        context! {
            start_ds => to_ds(ctx.start),
            end_ds => to_ds(last),
            start_ts => to_ts(ctx.start),
            end_ts => to_ts(ctx.end),
            start_ms => ctx.start,
            end_ms => ctx.end,
            latest_ds => to_ds(ctx.latest),
            latest_ts => to_ts(ctx.latest),
            this => ctx.this.clone(),
        },
    );

    rendered.map_err(|e| {
        let reference = missing.lock().unwrap_or_else(|p| p.into_inner()).take();
        match reference {
            Some(reference) => DbError::UnknownReference {
                model: model.to_string(),
                reference,
            },
            None => DbError::RenderError {
                model: model.to_string(),
                message: e.to_string(),
            },
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use qy_core::time::{parse_start, DAY_MS};

    fn day(value: &str) -> Timestamp {
        parse_start(value, 0).unwrap()
    }

    #[test]
    fn test_render_interval_variables() {
        let start = day("2024-01-01");
        let ctx = RenderContext::new(start, start + 2 * DAY_MS, start + 2 * DAY_MS);
        let sql = render_query(
            "db.a",
            "WHERE ds BETWEEN '{{ start_ds }}' AND '{{ end_ds }}' AND ts < '{{ end_ts }}'",
            &ctx,
        )
        .unwrap();
        assert_eq!(
            sql,
            "WHERE ds BETWEEN '2024-01-01' AND '2024-01-02' AND ts < '2024-01-03 00:00:00'"
        );
    }

    #[test]
    fn test_render_ref_resolves_physical_table() {
        let tables: BTreeMap<String, String> =
            [("db.a".to_string(), "quarry.db__a__123".to_string())].into();
        let ctx = RenderContext::new(0, DAY_MS, DAY_MS)
            .with_tables(tables)
            .with_this("quarry.db__b__456");
        let sql = render_query("db.b", "SELECT * FROM {{ ref('db.a') }} -- {{ this }}", &ctx).unwrap();
        assert_eq!(sql, "SELECT * FROM quarry.db__a__123 -- quarry.db__b__456");
    }

    #[test]
    fn test_render_unknown_ref() {
        let ctx = RenderContext::new(0, DAY_MS, DAY_MS);
        let err = render_query("db.b", "SELECT * FROM {{ ref('db.zzz') }}", &ctx).unwrap_err();
        assert!(matches!(
            err,
            DbError::UnknownReference { ref reference, .. } if reference == "db.zzz"
        ));
    }

    #[test]
    fn test_render_syntax_error() {
        let ctx = RenderContext::new(0, DAY_MS, DAY_MS);
        let err = render_query("db.b", "SELECT {{ broken", &ctx).unwrap_err();
        assert!(matches!(err, DbError::RenderError { .. }));
    }
}
