//! Audit SQL generation
//!
//! Each generator returns a query selecting the offending rows of `table`;
//! an audit passes when that query returns nothing.

use crate::sql_utils::{escape_sql_string, quote_ident};
use qy_core::AuditKind;

/// Generate SQL for a not_null audit
pub fn generate_not_null(table: &str, columns: &[String]) -> String {
    let predicate = columns
        .iter()
        .map(|c| format!("{} IS NULL", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(" OR ");
    format!("SELECT * FROM {table} AS t WHERE {predicate}")
}

/// Generate SQL for a unique_values audit (duplicates of the column tuple)
pub fn generate_unique_values(table: &str, columns: &[String]) -> String {
    let cols = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {cols}, COUNT(*) AS cnt\nFROM {table} AS t\nGROUP BY {cols}\nHAVING COUNT(*) > 1")
}

/// Generate SQL for an accepted_values audit
///
/// Values that parse as numbers are emitted unquoted.
pub fn generate_accepted_values(table: &str, column: &str, values: &[String]) -> String {
    let values_list = values
        .iter()
        .map(|v| {
            if v.parse::<f64>().is_ok() {
                v.clone()
            } else {
                format!("'{}'", escape_sql_string(v))
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    let qc = quote_ident(column);
    format!("SELECT * FROM {table} AS t WHERE {qc} NOT IN ({values_list}) OR {qc} IS NULL")
}

/// Offending-rows query for a built-in audit.
///
/// `table` is a relation expression (a table name or a parenthesized
/// subquery). Custom audits are templates and return `None`.
pub fn generate(kind: &AuditKind, table: &str) -> Option<String> {
    match kind {
        AuditKind::NotNull { columns } => Some(generate_not_null(table, columns)),
        AuditKind::UniqueValues { columns } => Some(generate_unique_values(table, columns)),
        AuditKind::AcceptedValues { column, values } => {
            Some(generate_accepted_values(table, column, values))
        }
        AuditKind::Custom { .. } => None,
    }
}
