//! SQL identifier quoting utilities

/// Quote a SQL identifier.
///
/// Wraps the identifier in double quotes and escapes any embedded double quotes
/// by doubling them.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a potentially schema-qualified name (e.g. `schema.table`).
pub fn quote_qualified(name: &str) -> String {
    name.split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

/// Split a schema-qualified name into (schema, table), defaulting to `main`.
pub fn split_qualified_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) => (&name[..pos], &name[pos + 1..]),
        None => ("main", name),
    }
}

/// Escape a SQL string literal value by doubling single quotes.
pub fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

/// A `TIMESTAMP` literal for an epoch-millisecond value.
pub fn timestamp_literal(ts: i64) -> String {
    format!("TIMESTAMP '{}'", qy_core::time::to_ts(ts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_qualified() {
        assert_eq!(quote_qualified("users"), r#""users""#);
        assert_eq!(quote_qualified("staging.orders"), r#""staging"."orders""#);
        assert_eq!(quote_ident(r#"my"table"#), r#""my""table""#);
    }

    #[test]
    fn test_split_qualified_name() {
        assert_eq!(split_qualified_name("users"), ("main", "users"));
        assert_eq!(split_qualified_name("a.b"), ("a", "b"));
    }

    #[test]
    fn test_timestamp_literal() {
        assert_eq!(timestamp_literal(0), "TIMESTAMP '1970-01-01 00:00:00'");
        assert_eq!(escape_sql_string("it's"), "it''s");
    }
}
