//! Column typing and identifier rules for destination tables.

use serde_json::Value;

/// Separator between a dataset namespace and a table name.
pub const NAMESPACE_SEPARATOR: &str = "__";

const STAGING_SUFFIX: &str = "__staging";

/// Storage type of a destination column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Integer,
    Real,
    Text,
    /// Nested arrays stored as their JSON text.
    Json,
}

impl ColumnType {
    /// Infer the column type of a JSON value. `null` carries no type.
    #[must_use]
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Bool),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self::Integer),
            Value::Number(_) => Some(Self::Real),
            Value::String(_) => Some(Self::Text),
            Value::Array(_) | Value::Object(_) => Some(Self::Json),
        }
    }

    /// Widen two observed types into one that can hold both.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Integer, Self::Real) | (Self::Real, Self::Integer) => Self::Real,
            _ => Self::Text,
        }
    }

    /// `SQLite` declared type for this column.
    #[must_use]
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Bool | Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text | Self::Json => "TEXT",
        }
    }
}

/// A named, typed destination column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: ColumnType,
}

impl ColumnDef {
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Physical name of `table` inside `dataset`.
#[must_use]
pub fn qualified_table(dataset: &str, table: &str) -> String {
    format!("{dataset}{NAMESPACE_SEPARATOR}{table}")
}

/// Physical name of the staging table that precedes `table` during a load.
#[must_use]
pub fn staging_table(dataset: &str, table: &str) -> String {
    format!("{}{STAGING_SUFFIX}", qualified_table(dataset, table))
}

/// Quote an identifier for `SQLite`.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Normalize a resource name or record key into a table/column identifier:
/// lowercase ASCII, digits and underscores, never starting with a digit.
#[must_use]
pub fn normalize_identifier(name: &str) -> String {
    let mut ident: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}
