//! Result rows, write payloads and row mapping.

use crate::error::{DbError, DbResult};
use crate::value::{FromValue, Value};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// One result row: column names and values in select-list order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column. Used by client implementations when decoding driver rows.
    pub fn push(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.push(column.into());
        self.values.push(value.into());
    }

    /// Builder-style [`Row::push`].
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(column, value);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Value of the first column named `column`.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// Value at a 0-based column index.
    pub fn get_index(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Decode a column into `T`.
    pub fn try_get<T: FromValue>(&self, column: &str) -> DbResult<T> {
        let value = self
            .get(column)
            .ok_or_else(|| DbError::decode(column, "no such column"))?;
        T::from_value(value).map_err(|msg| DbError::decode(column, msg))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

// Keeps the serialized column order instead of going through a sorted map.
impl<'de> Deserialize<'de> for Row {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = Row;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Row, A::Error> {
                let mut row = Row::new();
                while let Some((column, value)) = access.next_entry::<String, Value>()? {
                    row.push(column, value);
                }
                Ok(row)
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

/// Ordered field → value payload for `insert`, `batch_insert` and `update`.
///
/// Setting a field twice replaces the earlier value in place.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field value.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    /// In-place form of [`Record::set`].
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(f, _)| *f == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.iter().find(|(f, _)| f == field).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(f, _)| f.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(f, v)| (f.as_str(), v))
    }

    pub(crate) fn into_values(self) -> impl Iterator<Item = Value> {
        self.fields.into_iter().map(|(_, v)| v)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

/// Trait for types that can be constructed from a result [`Row`].
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> DbResult<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(row.clone())
    }
}

/// Decode a `tokio_postgres` row into a [`Row`].
pub(crate) fn from_pg_row(pg: &tokio_postgres::Row) -> DbResult<Row> {
    use tokio_postgres::types::Type;

    let mut row = Row::new();
    for (idx, column) in pg.columns().iter().enumerate() {
        let name = column.name();
        let ty = column.type_();
        let err = |e: tokio_postgres::Error| DbError::decode(name, e.to_string());

        let value = if *ty == Type::BOOL {
            pg.try_get::<_, Option<bool>>(idx).map_err(err)?.into()
        } else if *ty == Type::INT2 {
            pg.try_get::<_, Option<i16>>(idx).map_err(err)?.into()
        } else if *ty == Type::INT4 {
            pg.try_get::<_, Option<i32>>(idx).map_err(err)?.into()
        } else if *ty == Type::INT8 {
            pg.try_get::<_, Option<i64>>(idx).map_err(err)?.into()
        } else if *ty == Type::OID {
            pg.try_get::<_, Option<u32>>(idx).map_err(err)?.into()
        } else if *ty == Type::FLOAT4 {
            pg.try_get::<_, Option<f32>>(idx).map_err(err)?.into()
        } else if *ty == Type::FLOAT8 {
            pg.try_get::<_, Option<f64>>(idx).map_err(err)?.into()
        } else if *ty == Type::TEXT
            || *ty == Type::VARCHAR
            || *ty == Type::BPCHAR
            || *ty == Type::NAME
            || *ty == Type::UNKNOWN
        {
            pg.try_get::<_, Option<String>>(idx).map_err(err)?.into()
        } else if *ty == Type::BYTEA {
            pg.try_get::<_, Option<Vec<u8>>>(idx).map_err(err)?.into()
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            pg.try_get::<_, Option<serde_json::Value>>(idx)
                .map_err(err)?
                .map_or(Value::Null, Value::Json)
        } else if *ty == Type::TIMESTAMP {
            pg.try_get::<_, Option<chrono::NaiveDateTime>>(idx)
                .map_err(err)?
                .into()
        } else if *ty == Type::TIMESTAMPTZ {
            pg.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
                .map_err(err)?
                .into()
        } else if *ty == Type::NUMERIC {
            pg.try_get::<_, Option<crate::value::NumericText>>(idx)
                .map_err(err)?
                .map(|n| n.0)
                .into()
        } else if *ty == Type::DATE {
            pg.try_get::<_, Option<chrono::NaiveDate>>(idx)
                .map_err(err)?
                .map(|d| d.to_string())
                .into()
        } else {
            return Err(DbError::decode(
                name,
                format!("unsupported column type {ty}; cast it in the select list"),
            ));
        };
        row.push(name, value);
    }
    Ok(row)
}
