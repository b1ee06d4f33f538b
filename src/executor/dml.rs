use super::{ExecutionContext, Executor, eval};
use crate::core::{DbError, Result, Value};
use crate::parser::ast::{Expr, Statement};
use crate::result::QueryResult;
use crate::storage::RowId;
use crate::transaction::Change;

pub struct InsertExecutor;

impl Executor for InsertExecutor {
    fn name(&self) -> &'static str {
        "INSERT"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Insert(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Insert(insert) = stmt else {
            unreachable!();
        };

        let schema = ctx.store.table(&insert.table_name)?.schema().schema().clone();

        // Map the statement's column list onto table positions
        let positions: Vec<usize> = match &insert.columns {
            Some(columns) => columns
                .iter()
                .map(|name| {
                    schema.find_column_index(name).ok_or_else(|| {
                        DbError::ColumnNotFound(name.clone(), insert.table_name.clone())
                    })
                })
                .collect::<Result<_>>()?,
            None => (0..schema.column_count()).collect(),
        };

        let mut inserted = 0u64;
        for exprs in &insert.values {
            if exprs.len() != positions.len() {
                return Err(DbError::ExecutionError(format!(
                    "INSERT has {} target columns but {} values",
                    positions.len(),
                    exprs.len()
                )));
            }

            let mut row = vec![Value::Null; schema.column_count()];
            for (expr, &pos) in exprs.iter().zip(&positions) {
                row[pos] = constant(expr)?;
            }

            let id = ctx.store.table_mut(&insert.table_name)?.insert(row)?;
            ctx.record(Change::InsertRow {
                table: insert.table_name.clone(),
                id,
            });
            inserted += 1;
        }

        Ok(QueryResult::affected(inserted))
    }
}

pub struct UpdateExecutor;

impl Executor for UpdateExecutor {
    fn name(&self) -> &'static str {
        "UPDATE"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Update(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Update(update) = stmt else {
            unreachable!();
        };

        let table = ctx.store.table(&update.table_name)?;
        let schema = table.schema().schema().clone();

        let targets: Vec<usize> = update
            .assignments
            .iter()
            .map(|a| {
                schema.find_column_index(&a.column).ok_or_else(|| {
                    DbError::ColumnNotFound(a.column.clone(), update.table_name.clone())
                })
            })
            .collect::<Result<_>>()?;

        // Compute every new row before writing so a failing row leaves no partial update
        let mut pending: Vec<(RowId, Vec<Value>)> = Vec::new();
        for (id, row) in table.scan() {
            if let Some(selection) = &update.selection
                && !eval::matches(selection, row, &schema, &update.table_name)?
            {
                continue;
            }

            let mut new_row = row.clone();
            for (assignment, &pos) in update.assignments.iter().zip(&targets) {
                new_row[pos] = eval::evaluate(&assignment.value, row, &schema, &update.table_name)?;
            }
            pending.push((id, new_row));
        }

        let table = ctx.store.table_mut(&update.table_name)?;
        let mut applied = Vec::with_capacity(pending.len());
        for (id, new_row) in pending {
            match table.update(id, new_row) {
                Ok(old_row) => applied.push((id, old_row)),
                Err(err) => {
                    for (id, old_row) in applied.into_iter().rev() {
                        table.restore(id, old_row);
                    }
                    return Err(err);
                }
            }
        }

        let count = applied.len() as u64;
        for (id, old_row) in applied {
            ctx.record(Change::UpdateRow {
                table: update.table_name.clone(),
                id,
                old_row,
            });
        }

        Ok(QueryResult::affected(count))
    }
}

pub struct DeleteExecutor;

impl Executor for DeleteExecutor {
    fn name(&self) -> &'static str {
        "DELETE"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Delete(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Delete(delete) = stmt else {
            unreachable!();
        };

        let table = ctx.store.table(&delete.table_name)?;
        let schema = table.schema().schema().clone();

        let mut doomed = Vec::new();
        for (id, row) in table.scan() {
            let hit = match &delete.selection {
                Some(selection) => eval::matches(selection, row, &schema, &delete.table_name)?,
                None => true,
            };
            if hit {
                doomed.push(id);
            }
        }

        let table = ctx.store.table_mut(&delete.table_name)?;
        let mut removed = Vec::with_capacity(doomed.len());
        for id in doomed {
            removed.push((id, table.delete(id)?));
        }

        let count = removed.len() as u64;
        for (id, old_row) in removed {
            ctx.record(Change::DeleteRow {
                table: delete.table_name.clone(),
                id,
                old_row,
            });
        }

        Ok(QueryResult::affected(count))
    }
}

/// INSERT values must be constant: literals, bound placeholders or
/// arithmetic over them.
fn constant(expr: &Expr) -> Result<Value> {
    let empty = crate::core::Schema::new(Vec::new());
    eval::evaluate(expr, &[], &empty, "VALUES").map_err(|err| match err {
        DbError::ColumnNotFound(col, _) => {
            DbError::ExecutionError(format!("Column reference '{}' not allowed in VALUES", col))
        }
        other => other,
    })
}
