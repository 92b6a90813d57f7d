//! Per-adapter rendering profiles.
//!
//! A [`QueryProfile`] supplies the dialect-specific pieces (identifier
//! quoting, placeholder syntax, column type names) while the statement
//! builders in [`super`] own the statement shapes.

use crate::types::{BaseKind, ValueKind};

/// Dialect policy consumed by the shared statement builders.
pub trait QueryProfile {
    /// Profile name, for logs and errors.
    fn name(&self) -> &'static str;

    /// Quote a table or column identifier.
    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// The placeholder for the 1-based bind ordinal.
    fn placeholder(&self, ordinal: usize) -> String;

    /// The column type name for a kind. Nullability and key constraints are
    /// rendered by the DDL builder, not here.
    fn column_type(&self, kind: &ValueKind) -> String;

    /// The column type for an auto-incrementing key column.
    fn auto_key_type(&self) -> String;

    /// Suffix appended after `PRIMARY KEY` on auto-incrementing keys, for
    /// dialects that spell auto-increment as a keyword.
    fn auto_increment_suffix(&self) -> Option<&'static str> {
        None
    }
}

/// PostgreSQL rendering profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl QueryProfile for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, ordinal: usize) -> String {
        format!("${}", ordinal)
    }

    fn column_type(&self, kind: &ValueKind) -> String {
        match &kind.base {
            BaseKind::Integer => "BIGINT".into(),
            BaseKind::Real => "DOUBLE PRECISION".into(),
            BaseKind::Text => "TEXT".into(),
            BaseKind::Boolean => "BOOLEAN".into(),
            BaseKind::Timestamp => "TIMESTAMPTZ".into(),
            BaseKind::TableRef(_) => "BIGINT".into(),
        }
    }

    fn auto_key_type(&self) -> String {
        "BIGSERIAL".into()
    }
}

/// SQLite rendering profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

impl QueryProfile for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, ordinal: usize) -> String {
        format!("?{}", ordinal)
    }

    fn column_type(&self, kind: &ValueKind) -> String {
        match &kind.base {
            BaseKind::Integer => "INTEGER".into(),
            BaseKind::Real => "REAL".into(),
            BaseKind::Text => "TEXT".into(),
            BaseKind::Boolean => "BOOLEAN".into(),
            BaseKind::Timestamp => "TIMESTAMP".into(),
            BaseKind::TableRef(_) => "INTEGER".into(),
        }
    }

    fn auto_key_type(&self) -> String {
        // AUTOINCREMENT is only valid on INTEGER PRIMARY KEY.
        "INTEGER".into()
    }

    fn auto_increment_suffix(&self) -> Option<&'static str> {
        Some("AUTOINCREMENT")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(Postgres.quote_identifier("Person"), "\"Person\"");
        assert_eq!(Postgres.quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Postgres.placeholder(2), "$2");
        assert_eq!(Sqlite.placeholder(2), "?2");
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(Postgres.column_type(&ValueKind::timestamp()), "TIMESTAMPTZ");
        assert_eq!(
            Sqlite.column_type(&ValueKind::table_ref("Person")),
            "INTEGER"
        );
    }
}
