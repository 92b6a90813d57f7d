//! Resolver and type-checker.
//!
//! Walks the untyped syntax tree against the schema registry and either
//! produces a fully typed tree plus the two inferred types (projection and
//! bind), or rejects the statement. Resolution is a pure function of the
//! tree and the registry: no ambient state, no caching.
//!
//! Unification is exact. Base kind and nullability must both match; there is
//! no widening and no `Option<T>` ↔ `T` coercion. The single directional
//! rule is for value positions (INSERT values, UPDATE assignments), where a
//! non-nullable value may fill a nullable column.

use std::sync::Arc;

use tracing::trace;

use crate::ast::{BinOp, BindTag, ColumnRef, Expr, Literal, Projection, Stmt};
use crate::error::{CompileError, CompileResult};
use crate::ir::{ProjectionShape, ProjectionType, Query, QueryKind};
use crate::schema::{SchemaRegistry, TableSchema};
use crate::types::{BaseKind, ValueKind};

/// A column reference resolved to a concrete table column.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedColumn {
    pub table: String,
    pub column: String,
    pub kind: ValueKind,
    /// Position of the column within its table's row shape.
    pub index: usize,
}

/// A typed expression node. Every node knows its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedExpr {
    Column(ResolvedColumn),
    /// A bind parameter. Ordinals are 1-based and follow left-to-right
    /// source order across the whole statement.
    Bind { kind: ValueKind, ordinal: usize },
    Literal(Literal),
    Binary {
        op: BinOp,
        lhs: Box<TypedExpr>,
        rhs: Box<TypedExpr>,
    },
}

impl TypedExpr {
    /// The kind this expression evaluates to.
    pub fn kind(&self) -> ValueKind {
        match self {
            TypedExpr::Column(col) => col.kind.clone(),
            TypedExpr::Bind { kind, .. } => kind.clone(),
            TypedExpr::Literal(lit) => lit.kind(),
            TypedExpr::Binary { .. } => ValueKind::boolean(),
        }
    }
}

/// Resolve a parsed statement into a typed [`Query`].
pub fn resolve(stmt: Stmt, registry: &SchemaRegistry) -> CompileResult<Query> {
    match stmt {
        Stmt::Select {
            projection,
            from,
            filter,
        } => resolve_select(projection, from, filter, registry),
        Stmt::Insert {
            table,
            columns,
            values,
        } => resolve_insert(table, columns, values, registry),
        Stmt::Update {
            table,
            assignments,
            filter,
        } => resolve_update(table, assignments, filter, registry),
        Stmt::Delete { table, filter } => resolve_delete(table, filter, registry),
        Stmt::CreateTable { table } => {
            let schema = lookup(registry, &table)?;
            Ok(Query::new(
                QueryKind::Create {
                    schema: Arc::clone(&schema),
                },
                vec![schema],
                None,
                ProjectionType::none(),
                Vec::new(),
            ))
        }
        Stmt::DropTable { table } => {
            let schema = lookup(registry, &table)?;
            Ok(Query::new(
                QueryKind::Drop {
                    table: schema.name.clone(),
                },
                vec![schema],
                None,
                ProjectionType::none(),
                Vec::new(),
            ))
        }
    }
}

fn lookup(registry: &SchemaRegistry, table: &str) -> CompileResult<Arc<TableSchema>> {
    registry
        .table(table)
        .cloned()
        .ok_or_else(|| CompileError::UnknownTable(table.to_string()))
}

// ---------------------------------------------------------------------------
// Statement resolution
// ---------------------------------------------------------------------------

fn resolve_select(
    projection: Projection,
    from: Vec<String>,
    filter: Option<Expr>,
    registry: &SchemaRegistry,
) -> CompileResult<Query> {
    let mut tables = Vec::with_capacity(from.len());
    for name in &from {
        let schema = lookup(registry, name)?;
        if tables.iter().any(|t: &Arc<TableSchema>| t.name == schema.name) {
            return Err(CompileError::mismatch(format!(
                "table '{}' appears more than once in FROM; self-joins are not supported",
                name
            )));
        }
        tables.push(schema);
    }
    let scope = Scope { tables: &tables };

    let (columns, projection) = match projection {
        Projection::Star => {
            if tables.len() != 1 {
                return Err(CompileError::AritySelect(format!(
                    "SELECT * requires exactly one FROM table, found {}",
                    tables.len()
                )));
            }
            let table = &tables[0];
            let projection = ProjectionType {
                shape: ProjectionShape::FullRow(table.name.clone()),
                kinds: table.row_kinds(),
            };
            (Vec::new(), projection)
        }
        Projection::Columns(refs) => {
            let mut columns = Vec::with_capacity(refs.len());
            for col_ref in &refs {
                columns.push(scope.resolve_column(col_ref)?);
            }
            let projection = ProjectionType {
                shape: ProjectionShape::Tuple,
                kinds: columns.iter().map(|c| c.kind.clone()).collect(),
            };
            (columns, projection)
        }
    };

    let mut filter = resolve_filter(filter, &scope)?;
    let mut binds = Vec::new();
    if let Some(expr) = filter.as_mut() {
        assign_ordinals(expr, &mut binds);
    }
    trace!(tables = tables.len(), binds = binds.len(), "resolved SELECT");

    Ok(Query::new(
        QueryKind::Select { columns },
        tables,
        filter,
        projection,
        binds,
    ))
}

fn resolve_insert(
    table: String,
    columns: Vec<String>,
    values: Vec<Expr>,
    registry: &SchemaRegistry,
) -> CompileResult<Query> {
    let schema = lookup(registry, &table)?;
    if columns.len() != values.len() {
        return Err(CompileError::mismatch(format!(
            "INSERT names {} columns but provides {} values",
            columns.len(),
            values.len()
        )));
    }

    let mut resolved_columns = Vec::with_capacity(columns.len());
    let mut typed_values = Vec::with_capacity(values.len());
    for (name, value) in columns.iter().zip(values) {
        let column = schema.find_column(name).ok_or_else(|| {
            CompileError::UnknownColumn {
                table: schema.name.clone(),
                column: name.clone(),
            }
        })?;
        if column.is_auto_key() {
            return Err(CompileError::mismatch(format!(
                "column '{}' is an auto-generated key and cannot be inserted",
                name
            )));
        }
        if resolved_columns
            .iter()
            .any(|c: &ResolvedColumn| c.column == *name)
        {
            return Err(CompileError::mismatch(format!(
                "column '{}' is named twice in INSERT",
                name
            )));
        }
        let typed = resolve_value_expr(&value, &column.kind, &column.name)?;
        resolved_columns.push(ResolvedColumn {
            table: schema.name.clone(),
            column: column.name.clone(),
            kind: column.kind.clone(),
            index: schema.column_index(name).unwrap_or_default(),
        });
        typed_values.push(typed);
    }

    // Every non-nullable, non-auto-key column must be provided.
    for column in &schema.columns {
        if column.kind.nullable || column.is_auto_key() {
            continue;
        }
        if !resolved_columns.iter().any(|c| c.column == column.name) {
            return Err(CompileError::mismatch(format!(
                "non-nullable column '{}' must be provided in INSERT",
                column.name
            )));
        }
    }

    let mut binds = Vec::new();
    for value in typed_values.iter_mut() {
        assign_ordinals(value, &mut binds);
    }

    Ok(Query::new(
        QueryKind::Insert {
            columns: resolved_columns,
            values: typed_values,
        },
        vec![schema],
        None,
        ProjectionType::none(),
        binds,
    ))
}

fn resolve_update(
    table: String,
    assignments: Vec<(String, Expr)>,
    filter: Option<Expr>,
    registry: &SchemaRegistry,
) -> CompileResult<Query> {
    let schema = lookup(registry, &table)?;
    let tables = vec![Arc::clone(&schema)];
    let scope = Scope { tables: &tables };

    let mut typed_assignments = Vec::with_capacity(assignments.len());
    for (name, value) in &assignments {
        let column = schema.find_column(name).ok_or_else(|| {
            CompileError::UnknownColumn {
                table: schema.name.clone(),
                column: name.clone(),
            }
        })?;
        if column.primary_key {
            return Err(CompileError::mismatch(format!(
                "primary key column '{}' cannot be assigned",
                name
            )));
        }
        let typed = resolve_value_expr(value, &column.kind, &column.name)?;
        typed_assignments.push((
            ResolvedColumn {
                table: schema.name.clone(),
                column: column.name.clone(),
                kind: column.kind.clone(),
                index: schema.column_index(name).unwrap_or_default(),
            },
            typed,
        ));
    }

    let mut filter = resolve_filter(filter, &scope)?;

    let mut binds = Vec::new();
    for (_, value) in typed_assignments.iter_mut() {
        assign_ordinals(value, &mut binds);
    }
    if let Some(expr) = filter.as_mut() {
        assign_ordinals(expr, &mut binds);
    }

    Ok(Query::new(
        QueryKind::Update {
            assignments: typed_assignments,
        },
        tables,
        filter,
        ProjectionType::none(),
        binds,
    ))
}

fn resolve_delete(
    table: String,
    filter: Option<Expr>,
    registry: &SchemaRegistry,
) -> CompileResult<Query> {
    let schema = lookup(registry, &table)?;
    let tables = vec![schema];
    let scope = Scope { tables: &tables };

    let mut filter = resolve_filter(filter, &scope)?;
    let mut binds = Vec::new();
    if let Some(expr) = filter.as_mut() {
        assign_ordinals(expr, &mut binds);
    }

    Ok(Query::new(
        QueryKind::Delete,
        tables,
        filter,
        ProjectionType::none(),
        binds,
    ))
}

/// Resolve a WHERE clause; it must evaluate to a non-nullable boolean.
fn resolve_filter(filter: Option<Expr>, scope: &Scope<'_>) -> CompileResult<Option<TypedExpr>> {
    match filter {
        None => Ok(None),
        Some(expr) => {
            let typed = scope.resolve_expr(&expr)?;
            let kind = typed.kind();
            if kind != ValueKind::boolean() {
                return Err(CompileError::mismatch(format!(
                    "WHERE clause must be boolean, found {}",
                    kind
                )));
            }
            Ok(Some(typed))
        }
    }
}

/// Resolve an INSERT value or UPDATE assignment expression.
///
/// Value positions accept only literals and bind markers, and a
/// non-nullable value may fill a nullable column (the reverse is an error).
fn resolve_value_expr(
    expr: &Expr,
    column_kind: &ValueKind,
    column_name: &str,
) -> CompileResult<TypedExpr> {
    let typed = match expr {
        Expr::Literal(lit) => TypedExpr::Literal(lit.clone()),
        Expr::Bind(tag) => {
            let kind = bind_kind(tag, Some(column_kind))?;
            TypedExpr::Bind { kind, ordinal: 0 }
        }
        Expr::Column(col) => {
            return Err(CompileError::mismatch(format!(
                "column reference '{}' is not allowed in a value position",
                col
            )));
        }
        Expr::Binary { .. } => {
            return Err(CompileError::mismatch(
                "value positions accept only literals and bind markers",
            ));
        }
    };

    let kind = typed.kind();
    let base_matches = kind.base == column_kind.base;
    let nullability_ok = column_kind.nullable || !kind.nullable;
    if !base_matches || !nullability_ok {
        return Err(CompileError::mismatch(format!(
            "cannot assign {} to column '{}' of kind {}",
            kind, column_name, column_kind
        )));
    }
    Ok(typed)
}

/// The declared kind of a bind marker. `$k` has no standalone kind and
/// adopts the table identity of the column it is unified with.
fn bind_kind(tag: &BindTag, peer: Option<&ValueKind>) -> CompileResult<ValueKind> {
    if let Some(kind) = tag.declared_kind() {
        return Ok(kind);
    }
    match peer {
        Some(peer_kind) => match &peer_kind.base {
            BaseKind::TableRef(table) => Ok(ValueKind::new(
                BaseKind::TableRef(table.clone()),
                tag.nullable,
            )),
            other => Err(CompileError::mismatch(format!(
                "'{}' requires a table-reference column, found {}",
                tag, other
            ))),
        },
        None => Err(CompileError::mismatch(format!(
            "cannot infer the table for '{}' outside a comparison with a key column",
            tag
        ))),
    }
}

// ---------------------------------------------------------------------------
// Expression resolution
// ---------------------------------------------------------------------------

struct Scope<'a> {
    tables: &'a [Arc<TableSchema>],
}

impl Scope<'_> {
    /// Resolve a column reference. With more than one table in scope every
    /// reference must be qualified, even when the name happens to be unique.
    fn resolve_column(&self, col_ref: &ColumnRef) -> CompileResult<ResolvedColumn> {
        let table = match &col_ref.table {
            Some(name) => self
                .tables
                .iter()
                .find(|t| t.name == *name)
                .ok_or_else(|| CompileError::UnknownTable(name.clone()))?,
            None => {
                if self.tables.len() != 1 {
                    return Err(CompileError::AmbiguousColumn(col_ref.column.clone()));
                }
                &self.tables[0]
            }
        };
        let column = table.find_column(&col_ref.column).ok_or_else(|| {
            CompileError::UnknownColumn {
                table: table.name.clone(),
                column: col_ref.column.clone(),
            }
        })?;
        Ok(ResolvedColumn {
            table: table.name.clone(),
            column: column.name.clone(),
            kind: column.kind.clone(),
            index: table.column_index(&column.name).unwrap_or_default(),
        })
    }

    fn resolve_expr(&self, expr: &Expr) -> CompileResult<TypedExpr> {
        match expr {
            Expr::Column(col_ref) => Ok(TypedExpr::Column(self.resolve_column(col_ref)?)),
            Expr::Literal(lit) => Ok(TypedExpr::Literal(lit.clone())),
            Expr::Bind(tag) => {
                let kind = bind_kind(tag, None)?;
                Ok(TypedExpr::Bind { kind, ordinal: 0 })
            }
            Expr::Binary { op, lhs, rhs } => {
                if op.is_comparison() {
                    self.resolve_comparison(*op, lhs, rhs)
                } else {
                    self.resolve_logical(*op, lhs, rhs)
                }
            }
        }
    }

    fn resolve_comparison(&self, op: BinOp, lhs: &Expr, rhs: &Expr) -> CompileResult<TypedExpr> {
        // A `$k` marker adopts the table of the column on the other side, so
        // resolve the non-key side first. Ordinal numbering happens in a
        // separate left-to-right pass and is unaffected by this order.
        let (lhs, rhs) = match (key_tag(lhs), key_tag(rhs)) {
            (Some(l), Some(_)) => {
                return Err(CompileError::mismatch(format!(
                    "cannot infer the table for '{}' compared with another key marker",
                    l
                )));
            }
            (Some(tag), None) => {
                let rhs = self.resolve_expr(rhs)?;
                let kind = bind_kind(tag, Some(&rhs.kind()))?;
                (TypedExpr::Bind { kind, ordinal: 0 }, rhs)
            }
            (None, Some(tag)) => {
                let lhs = self.resolve_expr(lhs)?;
                let kind = bind_kind(tag, Some(&lhs.kind()))?;
                (lhs, TypedExpr::Bind { kind, ordinal: 0 })
            }
            (None, None) => (self.resolve_expr(lhs)?, self.resolve_expr(rhs)?),
        };

        let lk = lhs.kind();
        let rk = rhs.kind();
        if lk != rk {
            return Err(CompileError::mismatch(format!(
                "operands of '{}' have kinds {} and {}",
                op.symbol(),
                lk,
                rk
            )));
        }
        if !matches!(op, BinOp::Eq | BinOp::Ne) && !is_ordered(&lk.base) {
            return Err(CompileError::mismatch(format!(
                "kind {} has no ordering for '{}'",
                lk,
                op.symbol()
            )));
        }
        Ok(TypedExpr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn resolve_logical(&self, op: BinOp, lhs: &Expr, rhs: &Expr) -> CompileResult<TypedExpr> {
        let lhs = self.resolve_expr(lhs)?;
        let rhs = self.resolve_expr(rhs)?;
        for side in [&lhs, &rhs] {
            let kind = side.kind();
            if kind != ValueKind::boolean() {
                return Err(CompileError::mismatch(format!(
                    "operands of '{}' must be boolean, found {}",
                    op.symbol(),
                    kind
                )));
            }
        }
        Ok(TypedExpr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }
}

fn key_tag(expr: &Expr) -> Option<&BindTag> {
    match expr {
        Expr::Bind(tag) if tag.declared_kind().is_none() => Some(tag),
        _ => None,
    }
}

fn is_ordered(base: &BaseKind) -> bool {
    matches!(
        base,
        BaseKind::Integer | BaseKind::Real | BaseKind::Text | BaseKind::Timestamp
    )
}

/// Assign 1-based ordinals to bind nodes in left-to-right order and collect
/// their kinds into the statement's bind type.
fn assign_ordinals(expr: &mut TypedExpr, binds: &mut Vec<ValueKind>) {
    match expr {
        TypedExpr::Bind { kind, ordinal } => {
            binds.push(kind.clone());
            *ordinal = binds.len();
        }
        TypedExpr::Binary { lhs, rhs, .. } => {
            assign_ordinals(lhs, binds);
            assign_ordinals(rhs, binds);
        }
        TypedExpr::Column(_) | TypedExpr::Literal(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use crate::schema::SchemaRegistry;
    use pretty_assertions::assert_eq;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new()
            .with(
                TableSchema::new("Person")
                    .key("id")
                    .column("name", ValueKind::text())
                    .column("address", ValueKind::text().nullable()),
            )
            .with(
                TableSchema::new("Order")
                    .key("id")
                    .column("person", ValueKind::table_ref("Person"))
                    .column("total", ValueKind::integer()),
            )
    }

    fn compile(src: &str) -> CompileResult<Query> {
        resolve(parser::parse(src)?, &registry())
    }

    #[test]
    fn test_select_star_projects_full_row() {
        let query = compile("SELECT * FROM Person WHERE name == $s").unwrap();
        assert_eq!(
            query.projection.shape,
            ProjectionShape::FullRow("Person".into())
        );
        assert_eq!(
            query.projection.kinds,
            vec![
                ValueKind::table_ref("Person"),
                ValueKind::text(),
                ValueKind::text().nullable(),
            ]
        );
        assert_eq!(query.binds, vec![ValueKind::text()]);
    }

    #[test]
    fn test_select_columns_projects_tuple() {
        let query = compile("SELECT id, address FROM Person WHERE name == $s").unwrap();
        assert_eq!(query.projection.shape, ProjectionShape::Tuple);
        assert_eq!(
            query.projection.kinds,
            vec![ValueKind::table_ref("Person"), ValueKind::text().nullable()]
        );
        assert_eq!(query.binds, vec![ValueKind::text()]);
    }

    #[test]
    fn test_unqualified_column_with_two_tables_fails() {
        // `total` only exists in Order, but qualification is still required.
        let err = compile("SELECT total FROM Person, Order").unwrap_err();
        assert_eq!(err, CompileError::AmbiguousColumn("total".into()));
    }

    #[test]
    fn test_qualified_columns_with_two_tables_resolve() {
        let query =
            compile("SELECT Person.name, Order.total FROM Person, Order WHERE Order.person == Person.id")
                .unwrap();
        assert_eq!(
            query.projection.kinds,
            vec![ValueKind::text(), ValueKind::integer()]
        );
    }

    #[test]
    fn test_select_star_with_two_tables_is_arity_error() {
        let err = compile("SELECT * FROM Person, Order").unwrap_err();
        assert!(matches!(err, CompileError::AritySelect(_)), "{:?}", err);
    }

    #[test]
    fn test_unknown_table() {
        let err = compile("SELECT * FROM Persno").unwrap_err();
        assert_eq!(err, CompileError::UnknownTable("Persno".into()));
    }

    #[test]
    fn test_unknown_column() {
        let err = compile("SELECT nam FROM Person").unwrap_err();
        assert_eq!(
            err,
            CompileError::UnknownColumn {
                table: "Person".into(),
                column: "nam".into()
            }
        );
    }

    #[test]
    fn test_nullable_column_vs_non_nullable_bind_fails() {
        let err = compile("SELECT * FROM Person WHERE address == $s").unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { .. }), "{:?}", err);
    }

    #[test]
    fn test_nullable_bind_matches_nullable_column() {
        let query = compile("SELECT * FROM Person WHERE address == $s?").unwrap();
        assert_eq!(query.binds, vec![ValueKind::text().nullable()]);
    }

    #[test]
    fn test_kind_mismatch_in_comparison() {
        let err = compile("SELECT * FROM Person WHERE name == 42").unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { .. }), "{:?}", err);
    }

    #[test]
    fn test_where_must_be_boolean() {
        let err = compile("SELECT * FROM Person WHERE name").unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { .. }), "{:?}", err);
    }

    #[test]
    fn test_bind_order_is_source_order() {
        let query = compile(
            "SELECT * FROM Person WHERE name == $s AND id == $k AND address == $s?",
        )
        .unwrap();
        assert_eq!(
            query.binds,
            vec![
                ValueKind::text(),
                ValueKind::table_ref("Person"),
                ValueKind::text().nullable(),
            ]
        );
    }

    #[test]
    fn test_key_bind_adopts_table_identity() {
        let query = compile("DELETE FROM Order WHERE person == $k").unwrap();
        assert_eq!(query.binds, vec![ValueKind::table_ref("Person")]);
    }

    #[test]
    fn test_key_bind_against_non_reference_fails() {
        let err = compile("SELECT * FROM Person WHERE name == $k").unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { .. }), "{:?}", err);
    }

    #[test]
    fn test_ordering_requires_ordered_kind() {
        let err = compile("SELECT * FROM Person WHERE id < $k").unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { .. }), "{:?}", err);
    }

    #[test]
    fn test_insert_binds_in_value_order() {
        let query =
            compile("INSERT INTO Person (name, address) VALUES ($s, $s?)").unwrap();
        assert_eq!(
            query.binds,
            vec![ValueKind::text(), ValueKind::text().nullable()]
        );
    }

    #[test]
    fn test_insert_non_nullable_literal_into_nullable_column() {
        assert!(compile("INSERT INTO Person (name, address) VALUES ('Ada', 'London')").is_ok());
    }

    #[test]
    fn test_insert_must_cover_non_nullable_columns() {
        let err = compile("INSERT INTO Person (address) VALUES ($s?)").unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { .. }), "{:?}", err);
    }

    #[test]
    fn test_insert_rejects_auto_key() {
        let err = compile("INSERT INTO Person (id, name) VALUES ($k, $s)").unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { .. }), "{:?}", err);
    }

    #[test]
    fn test_update_binds_assignments_before_filter() {
        let query = compile("UPDATE Person SET address = $s? WHERE id == $k").unwrap();
        assert_eq!(
            query.binds,
            vec![
                ValueKind::text().nullable(),
                ValueKind::table_ref("Person"),
            ]
        );
    }

    #[test]
    fn test_update_cannot_assign_primary_key() {
        let err = compile("UPDATE Person SET id = $k WHERE name == $s").unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { .. }), "{:?}", err);
    }

    #[test]
    fn test_create_carries_schema() {
        let query = compile("CREATE TABLE Person").unwrap();
        match &query.kind {
            QueryKind::Create { schema } => assert_eq!(schema.name, "Person"),
            other => panic!("expected create, got {:?}", other),
        }
    }
}
