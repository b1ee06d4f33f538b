// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Every write made inside an open transaction is recorded as a reversible
// Change. COMMIT discards the log; ROLLBACK undoes it newest-first.
//
// ============================================================================

use crate::core::Value;
use crate::storage::{MemoryStore, RowId, Table};

/// A single reversible change in a transaction
#[derive(Debug, Clone)]
pub enum Change {
    InsertRow {
        table: String,
        id: RowId,
    },

    UpdateRow {
        table: String,
        id: RowId,
        old_row: Vec<Value>,
    },

    DeleteRow {
        table: String,
        id: RowId,
        old_row: Vec<Value>,
    },

    CreateTable {
        name: String,
    },

    DropTable {
        table: Table,
    },
}

impl Change {
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::UpdateRow { table, .. } => table,
            Change::DeleteRow { table, .. } => table,
            Change::CreateTable { name } => name,
            Change::DropTable { table } => table.name(),
        }
    }

    pub fn is_ddl(&self) -> bool {
        matches!(self, Change::CreateTable { .. } | Change::DropTable { .. })
    }

    /// Reverse this change. Missing tables are ignored: a later change in the
    /// same log may already have removed them and been undone first.
    pub fn undo(self, store: &mut MemoryStore) {
        match self {
            Change::InsertRow { table, id } => {
                if let Ok(t) = store.table_mut(&table) {
                    t.remove(id);
                }
            }
            Change::UpdateRow { table, id, old_row } | Change::DeleteRow { table, id, old_row } => {
                if let Ok(t) = store.table_mut(&table) {
                    t.restore(id, old_row);
                }
            }
            Change::CreateTable { name } => {
                let _ = store.drop_table(&name);
            }
            Change::DropTable { table } => store.restore_table(table),
        }
    }
}

/// Ordered log of changes made by one open transaction.
#[derive(Debug, Default)]
pub struct UndoLog {
    changes: Vec<Change>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Append the changes of a finished statement to this log.
    pub fn absorb(&mut self, other: UndoLog) {
        self.changes.extend(other.changes);
    }

    /// Undo every recorded change, newest first.
    pub fn rollback(self, store: &mut MemoryStore) -> usize {
        let count = self.changes.len();
        for change in self.changes.into_iter().rev() {
            change.undo(store);
        }
        count
    }
}
