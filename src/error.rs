//! Error types for prequel.
//!
//! Two families, kept deliberately separate: [`CompileError`] covers
//! everything detectable before a query reaches a database (syntax and
//! resolution failures), [`DbError`] covers everything that can only happen
//! at execution time (adapter failures, bind encoding, row decoding,
//! transaction misuse). A query that compiled can never fail with a
//! compile-class error at runtime.

use thiserror::Error;

use crate::types::ValueKind;

/// Errors raised while compiling DSL text into a [`Query`](crate::ir::Query).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    /// The DSL text is malformed.
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    /// A table named in FROM / INTO is not in the schema registry.
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// A column reference does not exist in its table.
    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// An unqualified column was used while more than one table is in scope.
    #[error("column '{0}' must be table-qualified when more than one table is in scope")]
    AmbiguousColumn(String),

    /// Operand kinds do not unify.
    #[error("type mismatch: {message}")]
    TypeMismatch { message: String },

    /// A full-row projection was requested where a column tuple is required,
    /// or the other way round.
    #[error("projection arity error: {0}")]
    AritySelect(String),
}

impl CompileError {
    /// Create a syntax error at the given byte position.
    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            position,
            message: message.into(),
        }
    }

    /// Create a type mismatch error.
    pub fn mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            message: message.into(),
        }
    }
}

/// Errors raised by adapters at execution time.
#[derive(Debug, Error)]
pub enum DbError {
    /// Connection-level failure, or the engine rejected the statement.
    #[error("adapter error: {0}")]
    Adapter(String),

    /// A bind value does not match the kind the query requires at that
    /// position. Positions are zero-based.
    #[error("bind {index} does not match required kind {expected}: got {got}")]
    Bind {
        index: usize,
        expected: ValueKind,
        got: String,
    },

    /// A stored value cannot be decoded into the projected slot. Raised
    /// per row; the rest of the sequence stays consumable.
    #[error("cannot decode column {index}: {message}")]
    Decode { index: usize, message: String },

    /// The transaction already reached a terminal state.
    #[error("transaction is already {0}")]
    TransactionClosed(&'static str),
}

impl DbError {
    /// Wrap an adapter-level failure.
    pub fn adapter(message: impl Into<String>) -> Self {
        Self::Adapter(message.into())
    }

    /// Create a per-column decode error.
    pub fn decode(index: usize, message: impl Into<String>) -> Self {
        Self::Decode {
            index,
            message: message.into(),
        }
    }
}

/// Result alias for compile-stage operations.
pub type CompileResult<T> = Result<T, CompileError>;

/// Result alias for execution-stage operations.
pub type DbResult<T> = Result<T, DbError>;
