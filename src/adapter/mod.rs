//! The execution protocol adapters implement.
//!
//! The compile pipeline is pure; everything that can touch a database lives
//! behind the traits here. A [`Connection`] prepares compiled queries and
//! opens transactions; a [`PreparedStatement`] executes with a bind tuple;
//! a [`Transaction`] tracks the `Open → {Committed, RolledBack}` state
//! machine and rejects use after a terminal transition.
//!
//! Connections are single-owner: every method takes `&mut self`, and callers
//! serialize access per connection. Pooling is an adapter concern.

pub mod mem;
pub mod postgres;

use std::future::Future;
use std::pin::Pin;

use crate::error::{DbError, DbResult};
use crate::ir::Query;
use crate::schema::TableSchema;
use crate::types::{Value, ValueKind};

/// A database connection.
#[allow(async_fn_in_trait)]
pub trait Connection {
    type Prepared: PreparedStatement;
    type Tx: Transaction;

    /// Create the table described by the schema.
    async fn create_table(&mut self, schema: &TableSchema) -> DbResult<()>;

    /// Prepare a compiled query for repeated execution.
    async fn prepare(&mut self, query: &Query) -> DbResult<Self::Prepared>;

    /// Begin a transaction. The transaction owns the connection's work until
    /// it reaches a terminal state.
    async fn begin(&mut self) -> DbResult<Self::Tx>;

    /// Prepare and execute in one step.
    async fn execute(&mut self, query: &Query, binds: &[Value]) -> DbResult<Outcome> {
        let mut prepared = self.prepare(query).await?;
        prepared.execute(binds).await
    }
}

/// A prepared statement bound to one rendered query.
#[allow(async_fn_in_trait)]
pub trait PreparedStatement {
    /// Execute with a bind tuple matching the query's bind type.
    async fn execute(&mut self, binds: &[Value]) -> DbResult<Outcome>;
}

/// Transaction state machine. Both non-`Open` states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Open,
    Committed,
    RolledBack,
}

impl TxState {
    pub fn name(self) -> &'static str {
        match self {
            TxState::Open => "open",
            TxState::Committed => "committed",
            TxState::RolledBack => "rolled back",
        }
    }
}

/// Shared state tracking embedded by adapter transactions.
#[derive(Debug)]
pub struct TxGuard {
    state: TxState,
}

impl TxGuard {
    pub fn new() -> Self {
        Self {
            state: TxState::Open,
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Fail with [`DbError::TransactionClosed`] unless still open.
    pub fn ensure_open(&self) -> DbResult<()> {
        match self.state {
            TxState::Open => Ok(()),
            terminal => Err(DbError::TransactionClosed(terminal.name())),
        }
    }

    /// Transition to a terminal state. Must be called at most once.
    pub fn close(&mut self, to: TxState) {
        debug_assert_eq!(self.state, TxState::Open);
        self.state = to;
    }
}

impl Default for TxGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// A scoped unit of work over a connection.
#[allow(async_fn_in_trait)]
pub trait Transaction {
    fn state(&self) -> TxState;

    /// Execute a query inside the transaction.
    async fn execute(&mut self, query: &Query, binds: &[Value]) -> DbResult<Outcome>;

    /// Make the work permanent. Terminal.
    async fn commit(&mut self) -> DbResult<()>;

    /// Discard the work. Terminal.
    async fn rollback(&mut self) -> DbResult<()>;
}

/// Boxed future alias for the [`with_transaction`] closure.
pub type TxFuture<'a, T> = Pin<Box<dyn Future<Output = DbResult<T>> + 'a>>;

/// Run a unit of work: `Ok` commits, `Err` rolls back. The transaction is
/// borrowed so the caller can inspect its state afterwards.
///
/// ```rust,ignore
/// let n = with_transaction(&mut tx, |tx| {
///     Box::pin(async move { tx.execute(&query, &binds).await?.affected() })
/// })
/// .await?;
/// ```
pub async fn with_transaction<Tx, T, F>(tx: &mut Tx, work: F) -> DbResult<T>
where
    Tx: Transaction,
    F: for<'a> FnOnce(&'a mut Tx) -> TxFuture<'a, T>,
{
    match work(tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            // The rollback error would shadow the real failure; drop it.
            let _ = tx.rollback().await;
            Err(err)
        }
    }
}

/// What executing a statement produced.
#[derive(Debug)]
pub enum Outcome {
    /// SELECT: a finite, single-pass row sequence.
    Rows(Rows),
    /// Everything else: the affected-row count.
    Affected(u64),
}

impl Outcome {
    pub fn rows(self) -> DbResult<Rows> {
        match self {
            Outcome::Rows(rows) => Ok(rows),
            Outcome::Affected(_) => Err(DbError::adapter("statement does not produce rows")),
        }
    }

    pub fn affected(self) -> DbResult<u64> {
        match self {
            Outcome::Affected(n) => Ok(n),
            Outcome::Rows(_) => Err(DbError::adapter("statement produces rows, not a count")),
        }
    }
}

/// One decoded result row, shaped by the query's projection type.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// A lazy, single-pass sequence of rows.
///
/// Each row is checked against the projection kinds as it is yielded; a slot
/// that fails the check (a stored NULL in a non-nullable slot, a kind
/// mismatch) yields [`DbError::Decode`] for that row without ending the
/// sequence.
#[derive(Debug)]
pub struct Rows {
    kinds: Vec<ValueKind>,
    raw: std::vec::IntoIter<Vec<Value>>,
}

impl Rows {
    /// Wrap raw adapter rows for decoding against the projection kinds.
    pub fn from_raw(kinds: Vec<ValueKind>, raw: Vec<Vec<Value>>) -> Self {
        Self {
            kinds,
            raw: raw.into_iter(),
        }
    }

    /// An empty, exhausted sequence.
    pub fn empty(kinds: Vec<ValueKind>) -> Self {
        Self::from_raw(kinds, Vec::new())
    }
}

impl Iterator for Rows {
    type Item = DbResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.raw.next()?;
        Some(decode_row(&self.kinds, raw))
    }
}

fn decode_row(kinds: &[ValueKind], values: Vec<Value>) -> DbResult<Row> {
    if values.len() != kinds.len() {
        return Err(DbError::adapter(format!(
            "row has {} slots, projection expects {}",
            values.len(),
            kinds.len()
        )));
    }
    for (index, (value, kind)) in values.iter().zip(kinds).enumerate() {
        if !value.matches(kind) {
            return Err(DbError::decode(
                index,
                format!("stored {} does not fit projected kind {}", value.kind_name(), kind),
            ));
        }
    }
    Ok(Row { values })
}

/// Check a bind tuple against a query's bind type. Called by every adapter
/// before encoding.
pub fn check_binds(expected: &[ValueKind], values: &[Value]) -> DbResult<()> {
    if expected.len() != values.len() {
        return Err(DbError::adapter(format!(
            "query requires {} bind values, got {}",
            expected.len(),
            values.len()
        )));
    }
    for (index, (kind, value)) in expected.iter().zip(values).enumerate() {
        if !value.matches(kind) {
            return Err(DbError::Bind {
                index,
                expected: kind.clone(),
                got: value.kind_name().to_string(),
            });
        }
    }
    Ok(())
}
