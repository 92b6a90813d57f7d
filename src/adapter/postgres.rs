//! PostgreSQL adapter over sqlx.
//!
//! Statements are rendered with the [`Postgres`] profile and executed as
//! prepared statements through a [`PgPool`]. Nullable binds are sent as
//! typed `Option` values so the server sees the column's wire type even
//! for NULL.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{PgPool, Row as _};
use tracing::debug;

use crate::adapter::{
    check_binds, Connection, Outcome, PreparedStatement, Rows, Transaction, TxGuard, TxState,
};
use crate::error::{DbError, DbResult};
use crate::ir::Query;
use crate::render::profile::Postgres;
use crate::render::{build_create_table, render, Rendered};
use crate::schema::TableSchema;
use crate::types::{BaseKind, Value, ValueKind};

/// A PostgreSQL database handle backed by a connection pool.
#[derive(Debug, Clone)]
pub struct PgDb {
    pool: PgPool,
}

impl PgDb {
    /// Connect to the given database URL.
    pub async fn connect(url: &str) -> DbResult<Self> {
        let pool = PgPool::connect(url)
            .await
            .map_err(|e| DbError::adapter(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn connection(&self) -> PgConnection {
        PgConnection {
            pool: self.pool.clone(),
        }
    }
}

/// A connection into a [`PgDb`]. Cheap to clone; all handles share the pool.
#[derive(Debug, Clone)]
pub struct PgConnection {
    pool: PgPool,
}

impl Connection for PgConnection {
    type Prepared = PgPrepared;
    type Tx = PgTransaction;

    async fn create_table(&mut self, schema: &TableSchema) -> DbResult<()> {
        let sql = build_create_table(schema, &Postgres);
        debug!(table = %schema.name, "creating table");
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| DbError::adapter(e.to_string()))?;
        Ok(())
    }

    async fn prepare(&mut self, query: &Query) -> DbResult<Self::Prepared> {
        Ok(PgPrepared {
            pool: self.pool.clone(),
            rendered: render(query, &Postgres),
            query: query.clone(),
        })
    }

    async fn begin(&mut self) -> DbResult<Self::Tx> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::adapter(e.to_string()))?;
        Ok(PgTransaction {
            tx: Some(tx),
            guard: TxGuard::new(),
        })
    }
}

/// A statement rendered for PostgreSQL, ready to execute with binds.
#[derive(Debug)]
pub struct PgPrepared {
    pool: PgPool,
    rendered: Rendered,
    query: Query,
}

impl PreparedStatement for PgPrepared {
    async fn execute(&mut self, binds: &[Value]) -> DbResult<Outcome> {
        check_binds(&self.query.binds, binds)?;
        run(&self.pool, &self.query, &self.rendered, binds).await
    }
}

/// A sqlx transaction wrapped with the protocol's state machine.
pub struct PgTransaction {
    tx: Option<sqlx::Transaction<'static, sqlx::Postgres>>,
    guard: TxGuard,
}

impl Transaction for PgTransaction {
    fn state(&self) -> TxState {
        self.guard.state()
    }

    async fn execute(&mut self, query: &Query, binds: &[Value]) -> DbResult<Outcome> {
        self.guard.ensure_open()?;
        check_binds(&query.binds, binds)?;
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| DbError::adapter("transaction handle missing"))?;
        let rendered = render(query, &Postgres);
        run(&mut **tx, query, &rendered, binds).await
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.guard.ensure_open()?;
        let tx = self
            .tx
            .take()
            .ok_or_else(|| DbError::adapter("transaction handle missing"))?;
        tx.commit()
            .await
            .map_err(|e| DbError::adapter(e.to_string()))?;
        self.guard.close(TxState::Committed);
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.guard.ensure_open()?;
        let tx = self
            .tx
            .take()
            .ok_or_else(|| DbError::adapter("transaction handle missing"))?;
        tx.rollback()
            .await
            .map_err(|e| DbError::adapter(e.to_string()))?;
        self.guard.close(TxState::RolledBack);
        Ok(())
    }
}

async fn run<'e, E>(executor: E, query: &Query, rendered: &Rendered, binds: &[Value]) -> DbResult<Outcome>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let mut stmt = sqlx::query(&rendered.sql);
    for (value, kind) in binds.iter().zip(&query.binds) {
        stmt = bind_value(stmt, value, kind);
    }

    if query.projection.is_rows() {
        let rows = stmt
            .fetch_all(executor)
            .await
            .map_err(|e| DbError::adapter(e.to_string()))?;
        let kinds = query.projection.kinds.clone();
        let mut raw = Vec::with_capacity(rows.len());
        for row in &rows {
            raw.push(decode_row(row, &kinds)?);
        }
        Ok(Outcome::Rows(Rows::from_raw(kinds, raw)))
    } else {
        let done = stmt
            .execute(executor)
            .await
            .map_err(|e| DbError::adapter(e.to_string()))?;
        Ok(Outcome::Affected(done.rows_affected()))
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, PgArguments>;

/// Bind one value. NULL is sent as a typed `Option` chosen from the
/// expected kind so the prepared statement's parameter types stay stable.
fn bind_value<'q>(stmt: PgQuery<'q>, value: &Value, kind: &ValueKind) -> PgQuery<'q> {
    match value {
        Value::Null => match &kind.base {
            BaseKind::Integer => stmt.bind(None::<i64>),
            BaseKind::Real => stmt.bind(None::<f64>),
            BaseKind::Text => stmt.bind(None::<String>),
            BaseKind::Boolean => stmt.bind(None::<bool>),
            BaseKind::Timestamp => stmt.bind(None::<DateTime<Utc>>),
            BaseKind::TableRef(_) => stmt.bind(None::<i64>),
        },
        Value::Integer(v) => stmt.bind(*v),
        Value::Real(v) => stmt.bind(*v),
        Value::Text(v) => stmt.bind(v.clone()),
        Value::Boolean(v) => stmt.bind(*v),
        Value::Timestamp(v) => stmt.bind(*v),
        Value::Id(v) => stmt.bind(*v),
    }
}

fn decode_row(row: &PgRow, kinds: &[ValueKind]) -> DbResult<Vec<Value>> {
    let mut values = Vec::with_capacity(kinds.len());
    for (i, kind) in kinds.iter().enumerate() {
        values.push(decode_column(row, i, kind)?);
    }
    Ok(values)
}

fn decode_column(row: &PgRow, index: usize, kind: &ValueKind) -> DbResult<Value> {
    let err = |e: sqlx::Error| DbError::decode(index, e.to_string());
    let value = match &kind.base {
        BaseKind::Integer => row
            .try_get::<Option<i64>, _>(index)
            .map_err(err)?
            .map(Value::Integer),
        BaseKind::Real => row
            .try_get::<Option<f64>, _>(index)
            .map_err(err)?
            .map(Value::Real),
        BaseKind::Text => row
            .try_get::<Option<String>, _>(index)
            .map_err(err)?
            .map(Value::Text),
        BaseKind::Boolean => row
            .try_get::<Option<bool>, _>(index)
            .map_err(err)?
            .map(Value::Boolean),
        BaseKind::Timestamp => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .map_err(err)?
            .map(Value::Timestamp),
        BaseKind::TableRef(_) => row
            .try_get::<Option<i64>, _>(index)
            .map_err(err)?
            .map(Value::Id),
    };
    Ok(value.unwrap_or(Value::Null))
}
