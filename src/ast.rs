//! Untyped syntax tree produced by the parser.
//!
//! Nothing here has been checked against a schema yet; column references
//! may not exist, operand kinds may not line up. The resolver consumes this
//! tree and either produces a typed [`Query`](crate::ir::Query) or rejects
//! the statement.

use serde::{Deserialize, Serialize};

use crate::types::{BaseKind, ValueKind};

/// A parsed statement, one of the six supported forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Select {
        projection: Projection,
        from: Vec<String>,
        filter: Option<Expr>,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<Expr>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Expr)>,
        filter: Option<Expr>,
    },
    Delete {
        table: String,
        filter: Option<Expr>,
    },
    CreateTable {
        table: String,
    },
    DropTable {
        table: String,
    },
}

/// What a SELECT projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    /// `SELECT *`: the full row shape of the (single) FROM table.
    Star,
    /// An explicit column tuple.
    Columns(Vec<ColumnRef>),
}

/// A possibly-qualified column reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

impl ColumnRef {
    pub fn bare(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            column: column.into(),
        }
    }
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.table {
            Some(t) => write!(f, "{}.{}", t, self.column),
            None => write!(f, "{}", self.column),
        }
    }
}

/// Binary operators. Comparisons unify their operand kinds exactly;
/// `And`/`Or` require boolean operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        !matches!(self, BinOp::And | BinOp::Or)
    }

    /// The DSL spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
        }
    }
}

/// The declared kind of a bind marker: `$` sigil, one-letter tag, optional
/// `?` nullable suffix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindTag {
    pub tag: BindBase,
    pub nullable: bool,
}

/// One-letter bind kind tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindBase {
    /// `$i`
    Integer,
    /// `$f`
    Real,
    /// `$s`
    Text,
    /// `$b`
    Boolean,
    /// `$d`
    Timestamp,
    /// `$k`: key of whichever table-reference column it is compared with.
    Key,
}

impl BindTag {
    /// The declared kind, when it is self-contained. `$k` has no kind of its
    /// own until the resolver unifies it with a table-reference column.
    pub fn declared_kind(&self) -> Option<ValueKind> {
        let base = match self.tag {
            BindBase::Integer => BaseKind::Integer,
            BindBase::Real => BaseKind::Real,
            BindBase::Text => BaseKind::Text,
            BindBase::Boolean => BaseKind::Boolean,
            BindBase::Timestamp => BaseKind::Timestamp,
            BindBase::Key => return None,
        };
        Some(ValueKind::new(base, self.nullable))
    }
}

impl std::fmt::Display for BindTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let letter = match self.tag {
            BindBase::Integer => 'i',
            BindBase::Real => 'f',
            BindBase::Text => 's',
            BindBase::Boolean => 'b',
            BindBase::Timestamp => 'd',
            BindBase::Key => 'k',
        };
        write!(f, "${}{}", letter, if self.nullable { "?" } else { "" })
    }
}

/// Literal values appearing directly in the DSL text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
}

impl Literal {
    pub fn kind(&self) -> ValueKind {
        match self {
            Literal::Integer(_) => ValueKind::integer(),
            Literal::Real(_) => ValueKind::real(),
            Literal::Text(_) => ValueKind::text(),
            Literal::Boolean(_) => ValueKind::boolean(),
        }
    }
}

/// An expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Column(ColumnRef),
    Bind(BindTag),
    Literal(Literal),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_tag_display() {
        let tag = BindTag {
            tag: BindBase::Text,
            nullable: true,
        };
        assert_eq!(tag.to_string(), "$s?");
        assert_eq!(tag.declared_kind(), Some(ValueKind::text().nullable()));
    }

    #[test]
    fn test_key_tag_has_no_standalone_kind() {
        let tag = BindTag {
            tag: BindBase::Key,
            nullable: false,
        };
        assert_eq!(tag.declared_kind(), None);
    }

    #[test]
    fn test_column_ref_display() {
        assert_eq!(ColumnRef::bare("name").to_string(), "name");
        assert_eq!(
            ColumnRef::qualified("Person", "name").to_string(),
            "Person.name"
        );
    }
}
