pub mod ddl;
pub mod dml;
pub mod eval;
pub mod query;

use crate::core::{DbError, Result};
use crate::parser::ast::Statement;
use crate::result::QueryResult;
use crate::storage::MemoryStore;
use crate::transaction::{Change, UndoLog};
use tracing::trace;

/// Mutable view of the store for one statement, plus the undo log of the
/// surrounding transaction when one is open.
pub struct ExecutionContext<'a> {
    pub store: &'a mut MemoryStore,
    undo: Option<&'a mut UndoLog>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(store: &'a mut MemoryStore, undo: Option<&'a mut UndoLog>) -> Self {
        Self { store, undo }
    }

    /// Record a change if a transaction is open; autocommit writes are final.
    pub fn record(&mut self, change: Change) {
        if let Some(undo) = self.undo.as_deref_mut() {
            undo.record(change);
        }
    }
}

pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, stmt: &Statement) -> bool;

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult>;
}

pub struct ExecutorPipeline {
    executors: Vec<Box<dyn Executor>>,
}

impl ExecutorPipeline {
    pub fn new() -> Self {
        Self {
            executors: Vec::new(),
        }
    }

    pub fn with_default_executors() -> Self {
        let mut pipeline = Self::new();
        pipeline.register(Box::new(ddl::CreateTableExecutor));
        pipeline.register(Box::new(ddl::DropTableExecutor));
        pipeline.register(Box::new(dml::InsertExecutor));
        pipeline.register(Box::new(dml::UpdateExecutor));
        pipeline.register(Box::new(dml::DeleteExecutor));
        pipeline.register(Box::new(query::QueryExecutor));
        pipeline
    }

    pub fn register(&mut self, executor: Box<dyn Executor>) {
        self.executors.push(executor);
    }

    pub fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        for executor in &self.executors {
            if executor.can_handle(stmt) {
                trace!(executor = executor.name(), "Dispatching statement");
                return executor.execute(stmt, ctx);
            }
        }

        Err(DbError::UnsupportedOperation(
            "No executor found for statement".into(),
        ))
    }
}

impl Default for ExecutorPipeline {
    fn default() -> Self {
        Self::with_default_executors()
    }
}
