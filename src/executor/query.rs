use super::{ExecutionContext, Executor, eval};
use crate::core::{Result, Schema, Value};
use crate::parser::ast::{OrderByExpr, QueryStmt, SelectItem, Statement};
use crate::result::QueryResult;
use std::cmp::Ordering;

/// SELECT over a single table: filter, sort, page, then project.
pub struct QueryExecutor;

impl Executor for QueryExecutor {
    fn name(&self) -> &'static str {
        "QUERY"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Query(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &mut ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Query(query) = stmt else {
            unreachable!();
        };

        let table = ctx.store.table(&query.table_name)?;
        let schema = table.schema().schema();

        let mut rows: Vec<&Vec<Value>> = Vec::new();
        for (_, row) in table.scan() {
            if let Some(selection) = &query.selection
                && !eval::matches(selection, row, schema, &query.table_name)?
            {
                continue;
            }
            rows.push(row);
        }

        if !query.order_by.is_empty() {
            rows = sort_rows(rows, &query.order_by, schema, &query.table_name)?;
        }

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        let page = rows.into_iter().skip(offset).take(limit);

        let columns = projected_columns(query, schema);
        let values = page
            .map(|row| project(query, row, schema))
            .collect::<Result<Vec<_>>>()?;

        Ok(QueryResult::from_values(columns, values))
    }
}

/// Stable sort; rows with equal keys keep insertion order.
fn sort_rows<'r>(
    rows: Vec<&'r Vec<Value>>,
    order_by: &[OrderByExpr],
    schema: &Schema,
    table: &str,
) -> Result<Vec<&'r Vec<Value>>> {
    let mut keyed = rows
        .into_iter()
        .map(|row| {
            let keys = order_by
                .iter()
                .map(|o| eval::evaluate(&o.expr, row, schema, table))
                .collect::<Result<Vec<_>>>()?;
            Ok((keys, row))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| {
        for ((left, right), o) in a.iter().zip(b).zip(order_by) {
            let ordering = match left.compare(right) {
                Ok(ordering) => ordering,
                Err(err) => {
                    failure.get_or_insert(err);
                    Ordering::Equal
                }
            };
            let ordering = if o.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });

    if let Some(err) = failure {
        return Err(err);
    }
    Ok(keyed.into_iter().map(|(_, row)| row).collect())
}

fn projected_columns(query: &QueryStmt, schema: &Schema) -> Vec<String> {
    let mut columns = Vec::new();
    for item in &query.projection {
        match item {
            SelectItem::Wildcard => columns.extend(schema.column_names()),
            SelectItem::Expr { expr, alias } => {
                columns.push(alias.clone().unwrap_or_else(|| expr.to_string()))
            }
        }
    }
    columns
}

fn project(query: &QueryStmt, row: &[Value], schema: &Schema) -> Result<Vec<Value>> {
    let mut values = Vec::new();
    for item in &query.projection {
        match item {
            SelectItem::Wildcard => values.extend(row.iter().cloned()),
            SelectItem::Expr { expr, .. } => {
                values.push(eval::evaluate(expr, row, schema, &query.table_name)?)
            }
        }
    }
    Ok(values)
}
