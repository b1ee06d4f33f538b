use super::{Table, TableSchema};
use crate::core::{DbError, Result};
use std::collections::HashMap;

/// All tables of one in-memory database.
///
/// Access is serialized by the owning backend; nothing here locks.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: HashMap<String, Table>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&mut self, schema: TableSchema) -> Result<()> {
        let name = schema.name().to_string();
        if self.tables.contains_key(&name) {
            return Err(DbError::TableExists(name));
        }
        self.tables.insert(name, Table::new(schema));
        Ok(())
    }

    /// Remove a table and hand it back so the drop can be undone.
    pub fn drop_table(&mut self, name: &str) -> Result<Table> {
        self.tables
            .remove(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub(crate) fn restore_table(&mut self, table: Table) {
        self.tables.insert(table.name().to_string(), table);
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType};

    #[test]
    fn test_create_and_drop() {
        let mut store = MemoryStore::new();
        let schema = TableSchema::new("t", vec![Column::new("id", DataType::Integer)]);

        store.create_table(schema.clone()).unwrap();
        assert!(matches!(
            store.create_table(schema),
            Err(DbError::TableExists(_))
        ));

        let dropped = store.drop_table("t").unwrap();
        assert!(!store.table_exists("t"));

        store.restore_table(dropped);
        assert_eq!(store.table_names(), vec!["t".to_string()]);
    }
}
