use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use strum_macros::Display;

pub type Timestamp = DateTime<Utc>;

/// A (schema, table) pair. Case-sensitive; never normalised.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TableKey {
    pub schema_name: String,
    pub table_name: String,
}

impl TableKey {
    pub fn new(schema_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
        }
    }
}

impl Display for TableKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema_name, self.table_name)
    }
}

const INTEGER_TYPE_PREFIXES: &[&str] = &[
    "int",
    "bigint",
    "smallint",
    "tinyint",
    "mediumint",
    "unsigned big int",
    "serial",
    "bigserial",
    "smallserial",
];

const FLOATING_TYPE_PREFIXES: &[&str] =
    &["real", "double", "float", "numeric", "decimal"];

/// The logical kind a column's store type maps onto. Drives value coercion,
/// parameter binding and the default filter operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ColumnKind {
    Integer,
    Floating,
    Text,
    Boolean,
    DateTime,
}

impl ColumnKind {
    /// Map a store type name (`format_type` output on PostgreSQL, the declared
    /// type on SQLite) to a kind. Anything unrecognised is text.
    pub fn from_type_name(type_name: &str) -> Self {
        let lower = type_name.trim().to_ascii_lowercase();

        if lower.ends_with("[]") || lower.starts_with("interval") {
            ColumnKind::Text
        } else if lower.starts_with("bool") {
            ColumnKind::Boolean
        } else if lower.starts_with("timestamp")
            || lower == "date"
            || lower == "datetime"
        {
            ColumnKind::DateTime
        } else if INTEGER_TYPE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            ColumnKind::Integer
        } else if FLOATING_TYPE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            ColumnKind::Floating
        } else {
            ColumnKind::Text
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnKind::Integer | ColumnKind::Floating)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// The type name as reported by the store
    pub data_type: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub unique: bool,
    pub has_default: bool,
    pub foreign_key: Option<ForeignKeyRef>,
}

impl ColumnDescriptor {
    /// A column the store can't fill in by itself
    pub fn is_required(&self) -> bool {
        !self.nullable && !self.has_default
    }

    /// Whether the store type is a character type, as opposed to something
    /// (uuid, json, enum, array...) that is only browsed as text.
    pub fn is_native_text(&self) -> bool {
        let lower = self.data_type.to_ascii_lowercase();
        lower.is_empty()
            || lower.starts_with("text")
            || lower.starts_with("character")
            || lower.starts_with("varchar")
            || lower.starts_with("char")
            || lower.starts_with("nchar")
            || lower.starts_with("nvarchar")
            || lower.starts_with("clob")
            || lower == "name"
            || lower == "citext"
    }
}

/// Normalised, addressable shape of a table.
///
/// `identity` is never empty: it holds either the declared primary key or a
/// single synthesized fallback column (`identity_synthesized` is then set).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityDescriptor {
    pub key: TableKey,
    pub columns: Vec<ColumnDescriptor>,
    pub identity: Vec<String>,
    pub identity_synthesized: bool,
}

impl EntityDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn identity_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.identity.iter().filter_map(|name| self.column(name))
    }
}

/// A single cell, decoded according to its column's kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}

/// One table row keyed by column name.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Row {
    values: HashMap<String, Value>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.values.insert(column.into(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Inventory entry for a table, as cached by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub key: TableKey,
    pub row_estimate: i64,
    /// Human-readable size; not every store can report one
    pub total_size: Option<String>,
    pub fetched_at: Timestamp,
}

/// Store-facing operation, carried by errors for context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    ListTables,
    Introspect,
    Count,
    Select,
    Insert,
    Update,
    Delete,
    Export,
}
