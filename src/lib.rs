//! Prequel: a typed query language compiled to a database-neutral form.
//!
//! Source text is parsed, resolved against registered table schemas, and
//! type-checked into a [`ir::Query`]. Everything up to that point is pure;
//! a query that compiles carries its bind signature and projection type,
//! and adapters only render and run it.
//!
//! ```
//! use prequel::prelude::*;
//!
//! let registry = SchemaRegistry::new().with(
//!     TableSchema::new("Person")
//!         .key("id")
//!         .column("name", ValueKind::text())
//!         .column("address", ValueKind::text().nullable()),
//! );
//!
//! let query = compile("SELECT name FROM Person WHERE id == $k", &registry)?;
//! assert_eq!(query.binds.len(), 1);
//! # Ok::<(), prequel::error::CompileError>(())
//! ```
//!
//! Bind markers are `$` plus a kind tag: `$i` integer, `$f` real, `$s`
//! text, `$b` boolean, `$d` timestamp, `$k` key. A trailing `?` makes the
//! bind nullable (`$s?`). `$k` takes its table identity from the column it
//! is compared against.

pub mod adapter;
pub mod ast;
pub mod error;
pub mod ir;
pub mod parser;
pub mod render;
pub mod resolve;
pub mod schema;
pub mod types;

pub use ir::compile;

pub mod prelude {
    pub use crate::adapter::{
        with_transaction, Connection, Outcome, PreparedStatement, Row, Rows, Transaction, TxState,
    };
    pub use crate::error::{CompileError, CompileResult, DbError, DbResult};
    pub use crate::ir::{compile, Query, StatementKind};
    pub use crate::render::{render, Postgres, QueryProfile, Sqlite};
    pub use crate::schema::{SchemaRegistry, TableSchema};
    pub use crate::types::{BaseKind, Value, ValueKind};
}
