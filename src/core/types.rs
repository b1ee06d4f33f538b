use super::{DataType, DbError, Result, Value};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub unique: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            unique: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            if !self.nullable {
                return Err(DbError::ConstraintViolation(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(DbError::TypeMismatch(format!(
                "Column '{}' expects type {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// A single result row: column names in select order paired with values.
///
/// Column names are shared between all rows of one result set.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let (columns, values): (Vec<String>, Vec<Value>) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self {
            columns: columns.into(),
            values,
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns && self.values == other.values
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

pub type Rows = Vec<Row>;

/// One page of a batch stream. An empty batch marks exhaustion.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    offset: usize,
    rows: Rows,
}

impl RowBatch {
    pub fn new(offset: usize, rows: Rows) -> Self {
        Self { offset, rows }
    }

    /// Offset of the first row of this batch within the stream.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Rows {
        self.rows
    }
}

impl IntoIterator for RowBatch {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_lookup_by_name() {
        let row = Row::from_pairs([("name", Value::from("Alice")), ("age", Value::from(30))]);

        assert_eq!(row.get("age"), Some(&Value::Integer(30)));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.columns(), ["name".to_string(), "age".to_string()]);
    }

    #[test]
    fn test_row_serializes_as_object() {
        let row = Row::from_pairs([("id", Value::from(1)), ("email", Value::Null)]);
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"id":1,"email":null}"#);
    }

    #[test]
    fn test_column_validation() {
        let col = Column::new("email", DataType::Text).not_null();
        assert!(matches!(
            col.validate(&Value::Null),
            Err(DbError::ConstraintViolation(_))
        ));
        assert!(matches!(
            col.validate(&Value::Integer(1)),
            Err(DbError::TypeMismatch(_))
        ));
        assert!(col.validate(&Value::from("a@b.c")).is_ok());
    }
}
