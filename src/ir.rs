//! The database-neutral query IR.
//!
//! A [`Query`] is the output of the compile pipeline: statement kind, the
//! resolved tables, the typed filter tree, and the two inferred types:
//! the projection type (what a SELECT yields per row) and the bind type
//! (what execution requires, in order). It is immutable and cheap to share;
//! one compiled query can be executed any number of times with different
//! bind tuples.
//!
//! A `Query` can only be produced by [`compile`]: if it exists, it passed
//! the type checker, and its declared types agree with its expression tree.

use std::sync::Arc;

use tracing::debug;

use crate::error::CompileResult;
use crate::parser;
use crate::resolve::{self, ResolvedColumn, TypedExpr};
use crate::schema::{SchemaRegistry, TableSchema};
use crate::types::ValueKind;

/// Statement kind tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
}

/// Per-kind payload of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryKind {
    /// `columns` is empty for a full-row (`SELECT *`) projection.
    Select { columns: Vec<ResolvedColumn> },
    Insert {
        columns: Vec<ResolvedColumn>,
        values: Vec<TypedExpr>,
    },
    Update {
        assignments: Vec<(ResolvedColumn, TypedExpr)>,
    },
    Delete,
    /// CREATE carries the full descriptor so renderers can emit constraints.
    Create { schema: Arc<TableSchema> },
    Drop { table: String },
}

/// The shape of what a SELECT yields per row.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionShape {
    /// Not a SELECT; execution yields an affected-row count.
    None,
    /// The full row of the named table.
    FullRow(String),
    /// An explicit column tuple.
    Tuple,
}

/// The projection type: shape plus the ordered slot kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionType {
    pub shape: ProjectionShape,
    pub kinds: Vec<ValueKind>,
}

impl ProjectionType {
    pub fn none() -> Self {
        Self {
            shape: ProjectionShape::None,
            kinds: Vec::new(),
        }
    }

    pub fn is_rows(&self) -> bool {
        !matches!(self.shape, ProjectionShape::None)
    }
}

/// A compiled, immutable query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub kind: QueryKind,
    /// FROM / target tables, in source order.
    pub tables: Vec<Arc<TableSchema>>,
    pub filter: Option<TypedExpr>,
    pub projection: ProjectionType,
    /// The bind type: kinds required at execution, in placeholder order.
    pub binds: Vec<ValueKind>,
}

impl Query {
    pub(crate) fn new(
        kind: QueryKind,
        tables: Vec<Arc<TableSchema>>,
        filter: Option<TypedExpr>,
        projection: ProjectionType,
        binds: Vec<ValueKind>,
    ) -> Self {
        Self {
            kind,
            tables,
            filter,
            projection,
            binds,
        }
    }

    pub fn statement_kind(&self) -> StatementKind {
        match self.kind {
            QueryKind::Select { .. } => StatementKind::Select,
            QueryKind::Insert { .. } => StatementKind::Insert,
            QueryKind::Update { .. } => StatementKind::Update,
            QueryKind::Delete => StatementKind::Delete,
            QueryKind::Create { .. } => StatementKind::Create,
            QueryKind::Drop { .. } => StatementKind::Drop,
        }
    }

    /// The statement's target table: the first entry of `tables`. Every
    /// statement kind except SELECT has exactly one; multi-table SELECT
    /// callers iterate `tables` directly instead.
    pub fn table(&self) -> &Arc<TableSchema> {
        &self.tables[0]
    }
}

/// Compile DSL text against a schema registry.
///
/// Runs parse → resolve → build. Every compile-class error (syntax,
/// unknown table/column, qualification, type mismatch, projection arity)
/// surfaces here, before any database is involved.
///
/// # Example
/// ```
/// use prequel::compile;
/// use prequel::schema::{SchemaRegistry, TableSchema};
/// use prequel::types::ValueKind;
///
/// let registry = SchemaRegistry::new().with(
///     TableSchema::new("Person")
///         .key("id")
///         .column("name", ValueKind::text())
///         .column("address", ValueKind::text().nullable()),
/// );
///
/// let query = compile("SELECT * FROM Person WHERE name == $s", &registry)?;
/// assert_eq!(query.binds, vec![ValueKind::text()]);
/// # Ok::<(), prequel::error::CompileError>(())
/// ```
pub fn compile(src: &str, registry: &SchemaRegistry) -> CompileResult<Query> {
    let stmt = parser::parse(src)?;
    let query = resolve::resolve(stmt, registry)?;
    debug!(
        kind = ?query.statement_kind(),
        tables = query.tables.len(),
        binds = query.binds.len(),
        projection = query.projection.kinds.len(),
        "compiled query"
    );
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueKind;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new().with(
            TableSchema::new("Person")
                .key("id")
                .column("name", ValueKind::text()),
        )
    }

    #[test]
    fn test_compile_pipeline() {
        let query = compile("SELECT * FROM Person", &registry()).unwrap();
        assert_eq!(query.statement_kind(), StatementKind::Select);
        assert!(query.binds.is_empty());
        assert!(query.projection.is_rows());
    }

    #[test]
    fn test_compiled_query_is_reusable() {
        let query = compile("SELECT * FROM Person WHERE name == $s", &registry()).unwrap();
        let clone = query.clone();
        assert_eq!(query, clone);
    }

    #[test]
    fn test_syntax_error_surfaces_from_compile() {
        assert!(compile("SELECT FROM", &registry()).is_err());
    }
}
