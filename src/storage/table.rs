use crate::core::{Column, DbError, Result, Schema, Value};
use std::collections::BTreeMap;

/// Stable identifier of a stored row. Ids increase with insertion order, so
/// a table scan in id order is a scan in insertion order.
pub type RowId = u64;

#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    schema: Schema,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            schema: Schema::new(columns),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<RowId, Vec<Value>>,
    next_row_id: RowId,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_row_id: 0,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn insert(&mut self, values: Vec<Value>) -> Result<RowId> {
        let values = self.validate_row(values)?;
        self.check_uniqueness(&values, None)?;

        let id = self.next_row_id;
        self.next_row_id += 1;
        self.rows.insert(id, values);
        Ok(id)
    }

    /// Replace a row, returning the previous values.
    pub fn update(&mut self, id: RowId, values: Vec<Value>) -> Result<Vec<Value>> {
        let values = self.validate_row(values)?;
        self.check_uniqueness(&values, Some(id))?;

        let slot = self.rows.get_mut(&id).ok_or_else(|| {
            DbError::ExecutionError(format!("Row {} not found in '{}'", id, self.schema.name()))
        })?;
        Ok(std::mem::replace(slot, values))
    }

    /// Remove a row, returning its values.
    pub fn delete(&mut self, id: RowId) -> Result<Vec<Value>> {
        self.rows.remove(&id).ok_or_else(|| {
            DbError::ExecutionError(format!("Row {} not found in '{}'", id, self.schema.name()))
        })
    }

    /// Put a row back under its original id. Used by rollback only, so no
    /// constraint checks are repeated.
    pub(crate) fn restore(&mut self, id: RowId, values: Vec<Value>) {
        self.rows.insert(id, values);
    }

    pub(crate) fn remove(&mut self, id: RowId) {
        self.rows.remove(&id);
    }

    pub fn scan(&self) -> impl Iterator<Item = (RowId, &Vec<Value>)> {
        self.rows.iter().map(|(id, values)| (*id, values))
    }

    fn validate_row(&self, values: Vec<Value>) -> Result<Vec<Value>> {
        let columns = self.schema.schema().columns();
        if values.len() != columns.len() {
            return Err(DbError::ExecutionError(format!(
                "Table '{}' has {} columns, row has {}",
                self.schema.name(),
                columns.len(),
                values.len()
            )));
        }

        columns
            .iter()
            .zip(values)
            .map(|(column, value)| {
                column.validate(&value)?;
                Ok(column.data_type.coerce(value))
            })
            .collect()
    }

    fn check_uniqueness(&self, values: &[Value], exclude: Option<RowId>) -> Result<()> {
        for (idx, column) in self.schema.schema().columns().iter().enumerate() {
            if !column.unique || values[idx].is_null() {
                continue;
            }

            let duplicate = self
                .rows
                .iter()
                .any(|(id, existing)| Some(*id) != exclude && existing[idx] == values[idx]);

            if duplicate {
                return Err(DbError::ConstraintViolation(format!(
                    "Duplicate value '{}' for unique column '{}'",
                    values[idx], column.name
                )));
            }
        }
        Ok(())
    }
}
