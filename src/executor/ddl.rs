use super::{ExecutionContext, Executor};
use crate::core::{Column, Result};
use crate::parser::ast::Statement;
use crate::result::QueryResult;
use crate::storage::TableSchema;
use crate::transaction::Change;

pub struct CreateTableExecutor;

impl Executor for CreateTableExecutor {
    fn name(&self) -> &'static str {
        "CREATE_TABLE"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::CreateTable(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::CreateTable(create) = stmt else {
            unreachable!();
        };

        if create.if_not_exists && ctx.store.table_exists(&create.table_name) {
            return Ok(QueryResult::empty());
        }

        let columns = create
            .columns
            .iter()
            .map(|col| {
                let mut column = Column::new(col.name.clone(), col.data_type.clone());
                if !col.nullable {
                    column = column.not_null();
                }
                if col.unique {
                    column = column.unique();
                }
                column
            })
            .collect();

        ctx.store
            .create_table(TableSchema::new(create.table_name.clone(), columns))?;
        ctx.record(Change::CreateTable {
            name: create.table_name.clone(),
        });

        Ok(QueryResult::empty())
    }
}

pub struct DropTableExecutor;

impl Executor for DropTableExecutor {
    fn name(&self) -> &'static str {
        "DROP_TABLE"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::DropTable(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::DropTable(drop) = stmt else {
            unreachable!();
        };

        if drop.if_exists && !ctx.store.table_exists(&drop.table_name) {
            return Ok(QueryResult::empty());
        }

        let table = ctx.store.drop_table(&drop.table_name)?;
        ctx.record(Change::DropTable { table });

        Ok(QueryResult::empty())
    }
}
