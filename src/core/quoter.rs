// src/core/quoter.rs

//! Parameter-safe quoting (§4.C).
//!
//! The Resync Engine and a handful of legacy-shaped Upserter code paths
//! build SQL text rather than bind parameters (the spec's "string-
//! templated SQL" note in §9 — kept because the Upserter's column list
//! varies per table and isn't known until runtime). Every value that
//! reaches SQL text form MUST flow through [`quote`]; bound-parameter
//! paths (the normal `sqlx::query().bind(..)` case) don't need it.

/// The literal SQL keyword used when a value represents SQL `NULL`.
pub const SQL_NULL: &str = "NULL";

/// Quotes a single value for inclusion in generated SQL text.
///
/// `None` becomes the bare keyword `NULL` (not the string `'NULL'`);
/// `Some(v)` is single-quoted with embedded quotes doubled, matching
/// Postgres's standard-conforming-strings escaping.
pub fn quote(value: Option<&str>) -> String {
    match value {
        None => SQL_NULL.to_string(),
        Some(v) => format!("'{}'", v.replace('\'', "''")),
    }
}

/// Post-processes generated SQL, turning any quoted literal `'NULL'` back
/// into the bare keyword `NULL`. This mirrors the Upserter's explicit
/// `'NULL'` → `NULL` substitution described in §4.C; it is only safe to
/// apply to whole generated statements, never to arbitrary user data,
/// since it works on exact textual sentinels.
pub fn fix_null_literals(sql: &str) -> String {
    sql.replace("'NULL'", SQL_NULL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_survives_as_keyword() {
        assert_eq!(quote(None), "NULL");
    }

    #[test]
    fn value_is_single_quoted_and_escaped() {
        assert_eq!(quote(Some("o'brien")), "'o''brien'");
    }

    #[test]
    fn fix_null_literals_only_touches_exact_sentinel() {
        let sql = "INSERT INTO t (a, b) VALUES ('NULL', 'NULLABLE')";
        assert_eq!(
            fix_null_literals(sql),
            "INSERT INTO t (a, b) VALUES (NULL, 'NULLABLE')"
        );
    }
}
