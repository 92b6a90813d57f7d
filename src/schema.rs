//! Table schema descriptors and the write-once registry.
//!
//! A [`TableSchema`] declares a table's columns, each column's kind and
//! nullability, and the primary key. Schemas are plain data: they derive
//! serde and can be loaded from JSON.
//!
//! # Example
//! ```
//! use prequel::schema::{TableSchema, SchemaRegistry};
//! use prequel::types::ValueKind;
//!
//! let person = TableSchema::new("Person")
//!     .key("id")
//!     .column("name", ValueKind::text())
//!     .column("address", ValueKind::text().nullable());
//!
//! let registry = SchemaRegistry::new().with(person);
//! assert!(registry.table("Person").is_some());
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::types::{BaseKind, ValueKind};

/// A single column declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(flatten)]
    pub kind: ValueKind,
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnDef {
    /// Whether this column is an auto-incrementing key: a table-reference
    /// kind designated as the primary key.
    pub fn is_auto_key(&self) -> bool {
        self.primary_key && matches!(self.kind.base, BaseKind::TableRef(_))
    }
}

/// An immutable per-table schema descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Create an empty table descriptor.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Builder: add a column.
    pub fn column(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            kind,
            primary_key: false,
        });
        self
    }

    /// Builder: add the auto-incrementing primary key column. Its kind is a
    /// reference to this table.
    pub fn key(mut self, name: impl Into<String>) -> Self {
        let kind = ValueKind::table_ref(self.name.clone());
        self.columns.push(ColumnDef {
            name: name.into(),
            kind,
            primary_key: true,
        });
        self
    }

    /// Builder: add a non-reference primary key column.
    pub fn primary(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            kind,
            primary_key: true,
        });
        self
    }

    /// Look up a column by name.
    pub fn find_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Position of a column within the row shape.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// The primary key columns, in declaration order.
    pub fn primary_key(&self) -> Vec<&ColumnDef> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    /// The full-row shape: every column's kind, in declaration order.
    pub fn row_kinds(&self) -> Vec<ValueKind> {
        self.columns.iter().map(|c| c.kind.clone()).collect()
    }
}

/// Write-once lookup table from table name to schema.
///
/// Built during initialization, read-only afterwards. Queries resolve
/// against a `&SchemaRegistry`; a process-wide instance can be installed
/// with [`SchemaRegistry::install`] for hosts that want one.
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    tables: BTreeMap<String, Arc<TableSchema>>,
}

static GLOBAL: OnceLock<SchemaRegistry> = OnceLock::new();

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: register a table. Last registration of a name wins; call
    /// only during initialization.
    pub fn with(mut self, schema: TableSchema) -> Self {
        self.add(schema);
        self
    }

    /// Register a table.
    pub fn add(&mut self, schema: TableSchema) {
        self.tables.insert(schema.name.clone(), Arc::new(schema));
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&Arc<TableSchema>> {
        self.tables.get(name)
    }

    /// Registered table names, sorted.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|s| s.as_str())
    }

    /// Load a registry from the JSON schema format.
    ///
    /// ```json
    /// { "tables": [ { "name": "Person", "columns": [
    ///     { "name": "id", "base": { "ref": "Person" }, "primary_key": true },
    ///     { "name": "name", "base": "text" },
    ///     { "name": "address", "base": "text", "nullable": true }
    /// ] } ] }
    /// ```
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Doc {
            tables: Vec<TableSchema>,
        }
        let doc: Doc = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for table in doc.tables {
            registry.add(table);
        }
        Ok(registry)
    }

    /// Install this registry as the process-wide one. Returns `Err(self)`
    /// when a registry was already installed.
    pub fn install(self) -> Result<(), Self> {
        GLOBAL.set(self)
    }

    /// The process-wide registry, if one has been installed.
    pub fn global() -> Option<&'static SchemaRegistry> {
        GLOBAL.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> TableSchema {
        TableSchema::new("Person")
            .key("id")
            .column("name", ValueKind::text())
            .column("address", ValueKind::text().nullable())
    }

    #[test]
    fn test_builder_shapes_row() {
        let t = person();
        assert_eq!(t.columns.len(), 3);
        assert_eq!(t.row_kinds()[1], ValueKind::text());
        assert_eq!(t.row_kinds()[2], ValueKind::text().nullable());
    }

    #[test]
    fn test_key_is_auto_increment_ref() {
        let t = person();
        let id = t.find_column("id").unwrap();
        assert!(id.primary_key);
        assert!(id.is_auto_key());
        assert_eq!(id.kind, ValueKind::table_ref("Person"));
    }

    #[test]
    fn test_primary_key_listing() {
        let t = person();
        let pk = t.primary_key();
        assert_eq!(pk.len(), 1);
        assert_eq!(pk[0].name, "id");
    }

    #[test]
    fn test_registry_lookup() {
        let registry = SchemaRegistry::new().with(person());
        assert!(registry.table("Person").is_some());
        assert!(registry.table("Persno").is_none());
    }

    #[test]
    fn test_global_registry_installs_once() {
        if SchemaRegistry::global().is_none() {
            assert!(SchemaRegistry::new().with(person()).install().is_ok());
        }
        assert!(SchemaRegistry::global().is_some());
        assert!(SchemaRegistry::new().install().is_err());
    }

    #[test]
    fn test_registry_from_json() {
        let json = r#"{
            "tables": [{
                "name": "Person",
                "columns": [
                    { "name": "id", "base": { "ref": "Person" }, "primary_key": true },
                    { "name": "name", "base": "text" },
                    { "name": "address", "base": "text", "nullable": true }
                ]
            }]
        }"#;
        let registry = SchemaRegistry::from_json(json).unwrap();
        let t = registry.table("Person").unwrap();
        assert_eq!(t.columns.len(), 3);
        assert!(t.find_column("address").unwrap().kind.nullable);
        assert_eq!(t.find_column("id").unwrap().kind, ValueKind::table_ref("Person"));
    }
}
