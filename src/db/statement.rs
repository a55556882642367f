use serde::de::DeserializeOwned;

use super::DbError;

/// StatementKind
///
/// The only thing routing looks at. `Insert`, `Update` and `Delete` are mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl StatementKind {
    pub fn is_mutation(self) -> bool {
        !matches!(self, StatementKind::Select)
    }
}

/// BindValue
///
/// A positional parameter (`$1`, `$2`, ...) bound to a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Null,
}

impl From<i64> for BindValue {
    fn from(value: i64) -> Self {
        BindValue::Int(value)
    }
}

impl From<f64> for BindValue {
    fn from(value: f64) -> Self {
        BindValue::Float(value)
    }
}

impl From<bool> for BindValue {
    fn from(value: bool) -> Self {
        BindValue::Bool(value)
    }
}

impl From<String> for BindValue {
    fn from(value: String) -> Self {
        BindValue::Text(value)
    }
}

impl From<&str> for BindValue {
    fn from(value: &str) -> Self {
        BindValue::Text(value.to_string())
    }
}

impl<T: Into<BindValue>> From<Option<T>> for BindValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(BindValue::Null, Into::into)
    }
}

/// Statement
///
/// One SQL statement plus its bind values. Built by repositories, executed by a `Session`.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub sql: String,
    pub binds: Vec<BindValue>,
    /// Whether the statement yields rows. Set for selects; set it by hand for `RETURNING` mutations.
    pub returns_rows: bool,
}

impl Statement {
    fn new(kind: StatementKind, sql: impl Into<String>) -> Self {
        Self {
            kind,
            sql: sql.into(),
            binds: Vec::new(),
            returns_rows: kind == StatementKind::Select,
        }
    }

    pub fn select(sql: impl Into<String>) -> Self {
        Self::new(StatementKind::Select, sql)
    }

    pub fn insert(sql: impl Into<String>) -> Self {
        Self::new(StatementKind::Insert, sql)
    }

    pub fn update(sql: impl Into<String>) -> Self {
        Self::new(StatementKind::Update, sql)
    }

    pub fn delete(sql: impl Into<String>) -> Self {
        Self::new(StatementKind::Delete, sql)
    }

    pub fn bind(mut self, value: impl Into<BindValue>) -> Self {
        self.binds.push(value.into());
        self
    }

    pub fn is_mutation(&self) -> bool {
        self.kind.is_mutation()
    }
}

/// A decoded row: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// QueryResult
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows_affected: u64,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows_affected: rows.len() as u64,
            rows,
        }
    }

    /// Deserializes every row into `T`.
    pub fn decode<T: DeserializeOwned>(self) -> Result<Vec<T>, DbError> {
        self.rows
            .into_iter()
            .map(|row| serde_json::from_value(serde_json::Value::Object(row)).map_err(DbError::from))
            .collect()
    }

    /// Deserializes the first row, if any.
    pub fn decode_first<T: DeserializeOwned>(self) -> Result<Option<T>, DbError> {
        self.rows
            .into_iter()
            .next()
            .map(|row| serde_json::from_value(serde_json::Value::Object(row)))
            .transpose()
            .map_err(DbError::from)
    }
}
