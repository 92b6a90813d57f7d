//! In-memory adapter.
//!
//! A small table store implementing the full execution protocol. It backs
//! the integration tests and works as an embedded engine for tools that
//! want the compiler without a server.
//!
//! Comparison semantics follow SQL filtering: any comparison involving NULL
//! is not true. Text ordering is plain `str` ordering; locale-aware
//! collation is out of scope for this adapter.
//!
//! Transactions snapshot the whole store at `begin`: rollback, and dropping
//! a transaction that is still open, restore that snapshot. The snapshot
//! covers every table, so writes made through other connections to the same
//! store while a transaction is open are rolled back with it. Connections
//! are single-owner per the protocol, which keeps that interleaving out of
//! supported use.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::adapter::{
    check_binds, Connection, Outcome, PreparedStatement, Rows, Transaction, TxGuard, TxState,
};
use crate::ast::{BinOp, Literal};
use crate::error::{DbError, DbResult};
use crate::ir::{ProjectionShape, Query, QueryKind};
use crate::resolve::{ResolvedColumn, TypedExpr};
use crate::schema::TableSchema;
use crate::types::Value;

#[derive(Debug, Clone)]
struct MemTable {
    schema: Arc<TableSchema>,
    rows: Vec<Vec<Value>>,
    next_key: i64,
}

#[derive(Debug, Clone, Default)]
struct Store {
    tables: HashMap<String, MemTable>,
}

/// An in-memory database. Cloning the handle shares the store.
#[derive(Debug, Clone, Default)]
pub struct MemDb {
    store: Arc<Mutex<Store>>,
}

impl MemDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection to this store.
    pub fn connect(&self) -> MemConnection {
        MemConnection {
            store: Arc::clone(&self.store),
        }
    }
}

/// A connection into a [`MemDb`].
#[derive(Debug)]
pub struct MemConnection {
    store: Arc<Mutex<Store>>,
}

impl Connection for MemConnection {
    type Prepared = MemPrepared;
    type Tx = MemTransaction;

    async fn create_table(&mut self, schema: &TableSchema) -> DbResult<()> {
        let mut store = self.lock()?;
        create_table(&mut store, schema)
    }

    async fn prepare(&mut self, query: &Query) -> DbResult<Self::Prepared> {
        Ok(MemPrepared {
            store: Arc::clone(&self.store),
            query: query.clone(),
        })
    }

    async fn begin(&mut self) -> DbResult<Self::Tx> {
        let snapshot = self.lock()?.clone();
        Ok(MemTransaction {
            store: Arc::clone(&self.store),
            snapshot,
            guard: TxGuard::new(),
        })
    }
}

impl MemConnection {
    fn lock(&self) -> DbResult<std::sync::MutexGuard<'_, Store>> {
        self.store
            .lock()
            .map_err(|_| DbError::adapter("store lock poisoned"))
    }
}

/// A prepared statement over the in-memory store.
#[derive(Debug)]
pub struct MemPrepared {
    store: Arc<Mutex<Store>>,
    query: Query,
}

impl PreparedStatement for MemPrepared {
    async fn execute(&mut self, binds: &[Value]) -> DbResult<Outcome> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| DbError::adapter("store lock poisoned"))?;
        run_query(&mut store, &self.query, binds)
    }
}

/// A snapshot-based transaction: rollback restores the store as it was at
/// `begin`. Dropping the transaction while still open rolls back too, so an
/// abandoned unit of work never behaves as an implicit commit.
#[derive(Debug)]
pub struct MemTransaction {
    store: Arc<Mutex<Store>>,
    snapshot: Store,
    guard: TxGuard,
}

impl Drop for MemTransaction {
    fn drop(&mut self) {
        if self.guard.state() == TxState::Open {
            if let Ok(mut store) = self.store.lock() {
                *store = std::mem::take(&mut self.snapshot);
                debug!("open mem transaction dropped, snapshot restored");
            }
        }
    }
}

impl Transaction for MemTransaction {
    fn state(&self) -> TxState {
        self.guard.state()
    }

    async fn execute(&mut self, query: &Query, binds: &[Value]) -> DbResult<Outcome> {
        self.guard.ensure_open()?;
        let mut store = self
            .store
            .lock()
            .map_err(|_| DbError::adapter("store lock poisoned"))?;
        run_query(&mut store, query, binds)
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.guard.ensure_open()?;
        self.guard.close(TxState::Committed);
        debug!("mem transaction committed");
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.guard.ensure_open()?;
        let mut store = self
            .store
            .lock()
            .map_err(|_| DbError::adapter("store lock poisoned"))?;
        *store = std::mem::take(&mut self.snapshot);
        self.guard.close(TxState::RolledBack);
        debug!("mem transaction rolled back");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Statement execution
// ---------------------------------------------------------------------------

fn create_table(store: &mut Store, schema: &TableSchema) -> DbResult<()> {
    if store.tables.contains_key(&schema.name) {
        return Err(DbError::adapter(format!(
            "table '{}' already exists",
            schema.name
        )));
    }
    store.tables.insert(
        schema.name.clone(),
        MemTable {
            schema: Arc::new(schema.clone()),
            rows: Vec::new(),
            next_key: 1,
        },
    );
    Ok(())
}

fn run_query(store: &mut Store, query: &Query, binds: &[Value]) -> DbResult<Outcome> {
    check_binds(&query.binds, binds)?;
    match &query.kind {
        QueryKind::Select { columns } => run_select(store, query, columns, binds),
        QueryKind::Insert { columns, values } => run_insert(store, query, columns, values, binds),
        QueryKind::Update { assignments } => run_update(store, query, assignments, binds),
        QueryKind::Delete => run_delete(store, query, binds),
        QueryKind::Create { schema } => {
            create_table(store, schema)?;
            Ok(Outcome::Affected(0))
        }
        QueryKind::Drop { table } => {
            store
                .tables
                .remove(table)
                .ok_or_else(|| DbError::adapter(format!("no such table '{}'", table)))?;
            Ok(Outcome::Affected(0))
        }
    }
}

fn run_select(
    store: &Store,
    query: &Query,
    columns: &[ResolvedColumn],
    binds: &[Value],
) -> DbResult<Outcome> {
    let mut scope = Vec::with_capacity(query.tables.len());
    for schema in &query.tables {
        let table = store
            .tables
            .get(&schema.name)
            .ok_or_else(|| DbError::adapter(format!("no such table '{}'", schema.name)))?;
        scope.push((schema.name.as_str(), table));
    }

    let mut out = Vec::new();
    let mut ctx = Vec::with_capacity(scope.len());
    each_combination(&scope, &mut ctx, &mut |ctx| {
        if !truthy(&query.filter, ctx, binds) {
            return;
        }
        let row = match &query.projection.shape {
            ProjectionShape::FullRow(_) => ctx[0].1.clone(),
            _ => columns
                .iter()
                .map(|col| column_value(col, ctx))
                .collect(),
        };
        out.push(row);
    });

    Ok(Outcome::Rows(Rows::from_raw(
        query.projection.kinds.clone(),
        out,
    )))
}

/// Visit the cross product of the scoped tables' rows.
fn each_combination<'a>(
    scope: &[(&'a str, &'a MemTable)],
    ctx: &mut Vec<(&'a str, &'a Vec<Value>)>,
    visit: &mut dyn FnMut(&[(&'a str, &'a Vec<Value>)]),
) {
    match scope.split_first() {
        None => visit(ctx),
        Some(((name, table), rest)) => {
            for row in &table.rows {
                ctx.push((name, row));
                each_combination(rest, ctx, visit);
                ctx.pop();
            }
        }
    }
}

fn run_insert(
    store: &mut Store,
    query: &Query,
    columns: &[ResolvedColumn],
    values: &[TypedExpr],
    binds: &[Value],
) -> DbResult<Outcome> {
    let name = &query.table().name;
    let table = store
        .tables
        .get_mut(name)
        .ok_or_else(|| DbError::adapter(format!("no such table '{}'", name)))?;

    let mut row = Vec::with_capacity(table.schema.columns.len());
    for column in &table.schema.columns {
        if column.is_auto_key() {
            row.push(Value::Id(table.next_key));
            table.next_key += 1;
            continue;
        }
        match columns.iter().position(|c| c.column == column.name) {
            Some(i) => row.push(eval(&values[i], &[], binds)),
            // The resolver guarantees omitted columns are nullable.
            None => row.push(Value::Null),
        }
    }
    table.rows.push(row);
    Ok(Outcome::Affected(1))
}

fn run_update(
    store: &mut Store,
    query: &Query,
    assignments: &[(ResolvedColumn, TypedExpr)],
    binds: &[Value],
) -> DbResult<Outcome> {
    let name = &query.table().name;
    let table = store
        .tables
        .get_mut(name)
        .ok_or_else(|| DbError::adapter(format!("no such table '{}'", name)))?;

    let mut affected = 0;
    for row in table.rows.iter_mut() {
        let matched = {
            let ctx = [(name.as_str(), &*row)];
            truthy(&query.filter, &ctx, binds)
        };
        if matched {
            for (column, value) in assignments {
                row[column.index] = eval(value, &[], binds);
            }
            affected += 1;
        }
    }
    Ok(Outcome::Affected(affected))
}

fn run_delete(store: &mut Store, query: &Query, binds: &[Value]) -> DbResult<Outcome> {
    let name = &query.table().name;
    let table = store
        .tables
        .get_mut(name)
        .ok_or_else(|| DbError::adapter(format!("no such table '{}'", name)))?;

    let before = table.rows.len();
    let filter = &query.filter;
    table.rows.retain(|row| {
        let ctx = [(name.as_str(), row)];
        !truthy(filter, &ctx, binds)
    });
    Ok(Outcome::Affected((before - table.rows.len()) as u64))
}

// ---------------------------------------------------------------------------
// Expression evaluation
// ---------------------------------------------------------------------------

fn truthy(filter: &Option<TypedExpr>, ctx: &[(&str, &Vec<Value>)], binds: &[Value]) -> bool {
    match filter {
        None => true,
        Some(expr) => eval(expr, ctx, binds) == Value::Boolean(true),
    }
}

fn column_value(col: &ResolvedColumn, ctx: &[(&str, &Vec<Value>)]) -> Value {
    ctx.iter()
        .find(|(name, _)| *name == col.table)
        .and_then(|(_, row)| row.get(col.index))
        .cloned()
        .unwrap_or(Value::Null)
}

fn eval(expr: &TypedExpr, ctx: &[(&str, &Vec<Value>)], binds: &[Value]) -> Value {
    match expr {
        TypedExpr::Column(col) => column_value(col, ctx),
        TypedExpr::Bind { ordinal, .. } => binds
            .get(ordinal.saturating_sub(1))
            .cloned()
            .unwrap_or(Value::Null),
        TypedExpr::Literal(lit) => literal_value(lit),
        TypedExpr::Binary { op, lhs, rhs } => {
            let l = eval(lhs, ctx, binds);
            let r = eval(rhs, ctx, binds);
            Value::Boolean(apply(*op, &l, &r))
        }
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Integer(v) => Value::Integer(*v),
        Literal::Real(v) => Value::Real(*v),
        Literal::Text(v) => Value::Text(v.clone()),
        Literal::Boolean(v) => Value::Boolean(*v),
    }
}

fn apply(op: BinOp, l: &Value, r: &Value) -> bool {
    match op {
        BinOp::And => *l == Value::Boolean(true) && *r == Value::Boolean(true),
        BinOp::Or => *l == Value::Boolean(true) || *r == Value::Boolean(true),
        _ => {
            // SQL filtering: comparisons against NULL are not true.
            if *l == Value::Null || *r == Value::Null {
                return false;
            }
            match compare(l, r) {
                Some(ordering) => match op {
                    BinOp::Eq => ordering == Ordering::Equal,
                    BinOp::Ne => ordering != Ordering::Equal,
                    BinOp::Lt => ordering == Ordering::Less,
                    BinOp::Le => ordering != Ordering::Greater,
                    BinOp::Gt => ordering == Ordering::Greater,
                    BinOp::Ge => ordering != Ordering::Less,
                    BinOp::And | BinOp::Or => false,
                },
                None => false,
            }
        }
    }
}

fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::Id(a), Value::Id(b)) => Some(a.cmp(b)),
        (Value::Real(a), Value::Real(b)) => a.partial_cmp(b),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;
    use crate::schema::SchemaRegistry;
    use crate::types::ValueKind;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new().with(
            TableSchema::new("Person")
                .key("id")
                .column("name", ValueKind::text())
                .column("address", ValueKind::text().nullable()),
        )
    }

    async fn seeded() -> (SchemaRegistry, MemConnection) {
        let registry = registry();
        let db = MemDb::new();
        let mut conn = db.connect();
        conn.create_table(registry.table("Person").unwrap())
            .await
            .unwrap();
        let insert = compile("INSERT INTO Person (name, address) VALUES ($s, $s?)", &registry)
            .unwrap();
        conn.execute(&insert, &[Value::from("Ada"), Value::from("London")])
            .await
            .unwrap();
        conn.execute(&insert, &[Value::from("Grace"), Value::Null])
            .await
            .unwrap();
        (registry, conn)
    }

    #[tokio::test]
    async fn test_insert_assigns_auto_keys() {
        let (registry, mut conn) = seeded().await;
        let select = compile("SELECT id FROM Person", &registry).unwrap();
        let rows: Vec<_> = conn
            .execute(&select, &[])
            .await
            .unwrap()
            .rows()
            .unwrap()
            .collect::<DbResult<Vec<_>>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get(0), Some(&Value::Id(1)));
        assert_eq!(rows[1].get(0), Some(&Value::Id(2)));
    }

    #[tokio::test]
    async fn test_select_filters_and_projects() {
        let (registry, mut conn) = seeded().await;
        let select =
            compile("SELECT name, address FROM Person WHERE name == $s", &registry).unwrap();
        let mut prepared = conn.prepare(&select).await.unwrap();
        let rows: Vec<_> = prepared
            .execute(&[Value::from("Ada")])
            .await
            .unwrap()
            .rows()
            .unwrap()
            .collect::<DbResult<Vec<_>>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].values(),
            &[Value::from("Ada"), Value::from("London")]
        );
    }

    #[tokio::test]
    async fn test_null_comparison_filters_row_out() {
        let (registry, mut conn) = seeded().await;
        // Grace has a NULL address; NULL == NULL is not true in SQL.
        let select =
            compile("SELECT name FROM Person WHERE address == $s?", &registry).unwrap();
        let rows: Vec<_> = conn
            .execute(&select, &[Value::Null])
            .await
            .unwrap()
            .rows()
            .unwrap()
            .collect::<DbResult<Vec<_>>>()
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete_report_affected() {
        let (registry, mut conn) = seeded().await;
        let update =
            compile("UPDATE Person SET address = $s? WHERE name == $s", &registry).unwrap();
        let affected = conn
            .execute(&update, &[Value::from("Paris"), Value::from("Grace")])
            .await
            .unwrap()
            .affected()
            .unwrap();
        assert_eq!(affected, 1);

        let delete = compile("DELETE FROM Person WHERE name == $s", &registry).unwrap();
        let affected = conn
            .execute(&delete, &[Value::from("Ada")])
            .await
            .unwrap()
            .affected()
            .unwrap();
        assert_eq!(affected, 1);
    }

    #[tokio::test]
    async fn test_create_twice_is_adapter_error() {
        let (registry, mut conn) = seeded().await;
        let err = conn
            .create_table(registry.table("Person").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Adapter(_)));
    }

    #[tokio::test]
    async fn test_drop_removes_table() {
        let (registry, mut conn) = seeded().await;
        let drop = compile("DROP TABLE Person", &registry).unwrap();
        conn.execute(&drop, &[]).await.unwrap();
        let select = compile("SELECT * FROM Person", &registry).unwrap();
        assert!(conn.execute(&select, &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_open_transaction_discards_writes() {
        let (registry, mut conn) = seeded().await;
        let delete = compile("DELETE FROM Person", &registry).unwrap();
        {
            let mut tx = conn.begin().await.unwrap();
            tx.execute(&delete, &[]).await.unwrap();
            // Abandoned without commit or rollback.
        }

        let select = compile("SELECT * FROM Person", &registry).unwrap();
        let rows: Vec<_> = conn
            .execute(&select, &[])
            .await
            .unwrap()
            .rows()
            .unwrap()
            .collect::<DbResult<Vec<_>>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_rollback_restores_snapshot() {
        let (registry, mut conn) = seeded().await;
        let delete = compile("DELETE FROM Person", &registry).unwrap();
        let mut tx = conn.begin().await.unwrap();
        tx.execute(&delete, &[]).await.unwrap();
        tx.rollback().await.unwrap();

        let select = compile("SELECT * FROM Person", &registry).unwrap();
        let rows: Vec<_> = conn
            .execute(&select, &[])
            .await
            .unwrap()
            .rows()
            .unwrap()
            .collect::<DbResult<Vec<_>>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
    }
}
