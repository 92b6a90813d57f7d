//! Query rendering.
//!
//! Turns a compiled [`Query`] into concrete statement text plus the ordered
//! placeholder list for one dialect. Rendering is pure: it never touches a
//! connection, and the same query with the same profile always yields the
//! same output. Placeholder order is the bind order established by the
//! resolver.

pub mod profile;

pub use profile::{Postgres, QueryProfile, Sqlite};

use crate::ast::{BinOp, Literal};
use crate::ir::{ProjectionShape, Query, QueryKind};
use crate::resolve::{ResolvedColumn, TypedExpr};
use crate::schema::TableSchema;
use crate::types::{BaseKind, ValueKind};

/// A rendered statement: text plus the kind of every placeholder, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub sql: String,
    pub placeholders: Vec<ValueKind>,
}

/// Render a query for one dialect.
pub fn render(query: &Query, profile: &dyn QueryProfile) -> Rendered {
    let mut out = Output {
        profile,
        qualify: query.tables.len() > 1,
        sql: String::new(),
        placeholders: Vec::new(),
    };
    match &query.kind {
        QueryKind::Select { columns } => out.select(query, columns),
        QueryKind::Insert { columns, values } => out.insert(query, columns, values),
        QueryKind::Update { assignments } => out.update(query, assignments),
        QueryKind::Delete => out.delete(query),
        QueryKind::Create { schema } => out.sql = build_create_table(schema, profile),
        QueryKind::Drop { table } => {
            out.sql = format!("DROP TABLE {}", profile.quote_identifier(table));
        }
    }
    Rendered {
        sql: out.sql,
        placeholders: out.placeholders,
    }
}

/// Build CREATE TABLE text straight from a schema descriptor.
///
/// Columns are NOT NULL unless declared nullable; the designated key gets
/// PRIMARY KEY, auto-increment when it is a table-reference kind; non-key
/// table-reference columns get a REFERENCES constraint.
pub fn build_create_table(schema: &TableSchema, profile: &dyn QueryProfile) -> String {
    let mut sql = String::from("CREATE TABLE ");
    sql.push_str(&profile.quote_identifier(&schema.name));
    sql.push_str(" (\n");

    let mut lines = Vec::with_capacity(schema.columns.len());
    for column in &schema.columns {
        let mut line = String::from("    ");
        line.push_str(&profile.quote_identifier(&column.name));
        line.push(' ');
        if column.is_auto_key() {
            line.push_str(&profile.auto_key_type());
            line.push_str(" PRIMARY KEY");
            if let Some(suffix) = profile.auto_increment_suffix() {
                line.push(' ');
                line.push_str(suffix);
            }
        } else {
            line.push_str(&profile.column_type(&column.kind));
            if !column.kind.nullable {
                line.push_str(" NOT NULL");
            }
            if column.primary_key {
                line.push_str(" PRIMARY KEY");
            }
            if let BaseKind::TableRef(target) = &column.kind.base {
                line.push_str(" REFERENCES ");
                line.push_str(&profile.quote_identifier(target));
            }
        }
        lines.push(line);
    }

    sql.push_str(&lines.join(",\n"));
    sql.push_str("\n)");
    sql
}

struct Output<'a> {
    profile: &'a dyn QueryProfile,
    /// Qualify column names when more than one table is in scope.
    qualify: bool,
    sql: String,
    placeholders: Vec<ValueKind>,
}

impl Output<'_> {
    fn select(&mut self, query: &Query, columns: &[ResolvedColumn]) {
        self.sql.push_str("SELECT ");
        if matches!(query.projection.shape, ProjectionShape::FullRow(_)) {
            self.sql.push('*');
        } else {
            let cols: Vec<String> = columns.iter().map(|c| self.column(c)).collect();
            self.sql.push_str(&cols.join(", "));
        }
        self.sql.push_str(" FROM ");
        let tables: Vec<String> = query
            .tables
            .iter()
            .map(|t| self.profile.quote_identifier(&t.name))
            .collect();
        self.sql.push_str(&tables.join(", "));
        self.where_clause(query);
    }

    fn insert(&mut self, query: &Query, columns: &[ResolvedColumn], values: &[TypedExpr]) {
        self.sql.push_str("INSERT INTO ");
        self.sql
            .push_str(&self.profile.quote_identifier(&query.table().name));
        let cols: Vec<String> = columns
            .iter()
            .map(|c| self.profile.quote_identifier(&c.column))
            .collect();
        self.sql.push_str(" (");
        self.sql.push_str(&cols.join(", "));
        self.sql.push_str(") VALUES (");
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.expr(value, 0);
        }
        self.sql.push(')');
    }

    fn update(&mut self, query: &Query, assignments: &[(ResolvedColumn, TypedExpr)]) {
        self.sql.push_str("UPDATE ");
        self.sql
            .push_str(&self.profile.quote_identifier(&query.table().name));
        self.sql.push_str(" SET ");
        for (i, (column, value)) in assignments.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.sql
                .push_str(&self.profile.quote_identifier(&column.column));
            self.sql.push_str(" = ");
            self.expr(value, 0);
        }
        self.where_clause(query);
    }

    fn delete(&mut self, query: &Query) {
        self.sql.push_str("DELETE FROM ");
        self.sql
            .push_str(&self.profile.quote_identifier(&query.table().name));
        self.where_clause(query);
    }

    fn where_clause(&mut self, query: &Query) {
        if let Some(filter) = &query.filter {
            self.sql.push_str(" WHERE ");
            self.expr(filter, 0);
        }
    }

    /// Render an expression. `parent_prec` drives minimal parenthesization:
    /// OR binds loosest, then AND, then comparisons.
    fn expr(&mut self, expr: &TypedExpr, parent_prec: u8) {
        match expr {
            TypedExpr::Column(col) => {
                let rendered = self.column(col);
                self.sql.push_str(&rendered);
            }
            TypedExpr::Bind { kind, ordinal } => {
                self.placeholders.push(kind.clone());
                self.sql.push_str(&self.profile.placeholder(*ordinal));
            }
            TypedExpr::Literal(lit) => self.literal(lit),
            TypedExpr::Binary { op, lhs, rhs } => {
                let prec = precedence(*op);
                let parens = prec < parent_prec;
                if parens {
                    self.sql.push('(');
                }
                self.expr(lhs, prec);
                self.sql.push(' ');
                self.sql.push_str(sql_op(*op));
                self.sql.push(' ');
                self.expr(rhs, prec);
                if parens {
                    self.sql.push(')');
                }
            }
        }
    }

    fn column(&self, col: &ResolvedColumn) -> String {
        if self.qualify {
            format!(
                "{}.{}",
                self.profile.quote_identifier(&col.table),
                self.profile.quote_identifier(&col.column)
            )
        } else {
            self.profile.quote_identifier(&col.column)
        }
    }

    fn literal(&mut self, lit: &Literal) {
        match lit {
            Literal::Integer(v) => self.sql.push_str(&v.to_string()),
            Literal::Real(v) => self.sql.push_str(&v.to_string()),
            Literal::Text(v) => {
                self.sql.push('\'');
                self.sql.push_str(&v.replace('\'', "''"));
                self.sql.push('\'');
            }
            Literal::Boolean(v) => self.sql.push_str(if *v { "TRUE" } else { "FALSE" }),
        }
    }
}

fn precedence(op: BinOp) -> u8 {
    match op {
        BinOp::Or => 1,
        BinOp::And => 2,
        _ => 3,
    }
}

fn sql_op(op: BinOp) -> &'static str {
    match op {
        BinOp::Eq => "=",
        BinOp::Ne => "<>",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::And => "AND",
        BinOp::Or => "OR",
    }
}
