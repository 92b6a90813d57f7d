//! Value kinds and runtime values.
//!
//! [`ValueKind`] is the closed set of column/parameter kinds the compiler
//! reasons about; [`Value`] is what actually crosses the wire at execution
//! time. The two meet in [`Value::matches`], which every adapter uses to
//! check bind tuples before encoding and decoded rows before yielding them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Base scalar kind, without nullability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseKind {
    /// 64-bit signed integer.
    Integer,
    /// Double-precision float.
    Real,
    /// UTF-8 text.
    Text,
    /// Boolean.
    Boolean,
    /// UTC timestamp.
    Timestamp,
    /// A typed key referencing a row of the named table. Used as a primary
    /// key it implies auto-increment; elsewhere it is a foreign-key handle.
    #[serde(rename = "ref")]
    TableRef(String),
}

impl std::fmt::Display for BaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BaseKind::Integer => write!(f, "integer"),
            BaseKind::Real => write!(f, "real"),
            BaseKind::Text => write!(f, "text"),
            BaseKind::Boolean => write!(f, "boolean"),
            BaseKind::Timestamp => write!(f, "timestamp"),
            BaseKind::TableRef(table) => write!(f, "ref<{}>", table),
        }
    }
}

/// A column or parameter kind: base kind plus nullability.
///
/// Unification is exact: nullability is part of the kind, and there is no
/// implicit widening in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueKind {
    pub base: BaseKind,
    #[serde(default)]
    pub nullable: bool,
}

impl ValueKind {
    pub const fn new(base: BaseKind, nullable: bool) -> Self {
        Self { base, nullable }
    }

    pub const fn integer() -> Self {
        Self::new(BaseKind::Integer, false)
    }

    pub const fn real() -> Self {
        Self::new(BaseKind::Real, false)
    }

    pub const fn text() -> Self {
        Self::new(BaseKind::Text, false)
    }

    pub const fn boolean() -> Self {
        Self::new(BaseKind::Boolean, false)
    }

    pub const fn timestamp() -> Self {
        Self::new(BaseKind::Timestamp, false)
    }

    pub fn table_ref(table: impl Into<String>) -> Self {
        Self::new(BaseKind::TableRef(table.into()), false)
    }

    /// The nullable variant of this kind.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.nullable {
            write!(f, "{}?", self.base)
        } else {
            write!(f, "{}", self.base)
        }
    }
}

/// A runtime value, as bound to or decoded from a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    /// A row key. Table identity was checked at compile time and is not
    /// carried at runtime.
    Id(i64),
}

impl Value {
    /// Whether this value can occupy a slot of the given kind.
    ///
    /// `Null` matches only nullable kinds; everything else matches on the
    /// base kind regardless of nullability.
    pub fn matches(&self, kind: &ValueKind) -> bool {
        match self {
            Value::Null => kind.nullable,
            Value::Integer(_) => kind.base == BaseKind::Integer,
            Value::Real(_) => kind.base == BaseKind::Real,
            Value::Text(_) => kind.base == BaseKind::Text,
            Value::Boolean(_) => kind.base == BaseKind::Boolean,
            Value::Timestamp(_) => kind.base == BaseKind::Timestamp,
            Value::Id(_) => matches!(kind.base, BaseKind::TableRef(_)),
        }
    }

    /// Short name for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Boolean(_) => "boolean",
            Value::Timestamp(_) => "timestamp",
            Value::Id(_) => "ref",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "'{}'", v),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Timestamp(v) => write!(f, "'{}'", v.to_rfc3339()),
            Value::Id(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
