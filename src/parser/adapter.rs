// ============================================================================
// sqlparser -> internal AST, with positional parameter binding
// ============================================================================

use crate::core::{DataType, DbError, QueryDescriptor, Result, Value};
use crate::parser::ast::*;
use sqlparser::ast as sql_ast;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::cell::Cell;

pub struct SqlParserAdapter {
    dialect: PostgreSqlDialect,
}

impl SqlParserAdapter {
    pub fn new() -> Self {
        Self {
            dialect: PostgreSqlDialect {},
        }
    }

    /// Parse exactly one statement and bind the descriptor's parameters.
    pub fn parse(&self, query: &QueryDescriptor) -> Result<Statement> {
        // Transaction control is handled before sqlparser sees it
        let trimmed = query.sql().trim().trim_end_matches(';').trim().to_uppercase();
        match trimmed.as_str() {
            "BEGIN" | "BEGIN TRANSACTION" | "START TRANSACTION" => return Ok(Statement::Begin),
            "COMMIT" | "COMMIT TRANSACTION" => return Ok(Statement::Commit),
            "ROLLBACK" | "ROLLBACK TRANSACTION" => return Ok(Statement::Rollback),
            _ => {}
        }

        let mut statements = Parser::parse_sql(&self.dialect, query.sql())
            .map_err(|e| DbError::ParseError(e.to_string()))?;

        if statements.len() != 1 {
            return Err(DbError::ParseError(format!(
                "Expected exactly one statement, found {}",
                statements.len()
            )));
        }

        let binder = Binder::new(query.params());
        let statement = binder.convert_statement(statements.remove(0))?;
        binder.finish()?;
        Ok(statement)
    }
}

impl Default for SqlParserAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts one parsed statement, resolving `$n` and `?` placeholders.
struct Binder<'a> {
    params: &'a [Value],
    next_anonymous: Cell<usize>,
    max_used: Cell<usize>,
}

impl<'a> Binder<'a> {
    fn new(params: &'a [Value]) -> Self {
        Self {
            params,
            next_anonymous: Cell::new(0),
            max_used: Cell::new(0),
        }
    }

    /// Every supplied parameter must be referenced.
    fn finish(&self) -> Result<()> {
        if self.max_used.get() < self.params.len() {
            return Err(DbError::ParseError(format!(
                "Query references {} parameter(s) but {} were supplied",
                self.max_used.get(),
                self.params.len()
            )));
        }
        Ok(())
    }

    fn convert_statement(&self, stmt: sql_ast::Statement) -> Result<Statement> {
        match stmt {
            sql_ast::Statement::CreateTable(create) => {
                Ok(Statement::CreateTable(self.convert_create_table(create)?))
            }
            sql_ast::Statement::Drop {
                object_type,
                names,
                if_exists,
                ..
            } => {
                if let sql_ast::ObjectType::Table = object_type {
                    Ok(Statement::DropTable(self.convert_drop_table(names, if_exists)?))
                } else {
                    Err(DbError::UnsupportedOperation(format!(
                        "Only DROP TABLE supported, got: {:?}",
                        object_type
                    )))
                }
            }
            sql_ast::Statement::Insert(insert) => Ok(Statement::Insert(self.convert_insert(insert)?)),
            sql_ast::Statement::Query(query) => Ok(Statement::Query(self.convert_query(*query)?)),
            sql_ast::Statement::Delete(delete) => Ok(Statement::Delete(self.convert_delete(delete)?)),
            sql_ast::Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => Ok(Statement::Update(self.convert_update(
                table,
                assignments,
                selection,
            )?)),
            _ => Err(DbError::UnsupportedOperation(format!(
                "Statement type not supported: {}",
                stmt
            ))),
        }
    }

    fn convert_create_table(&self, create: sql_ast::CreateTable) -> Result<CreateTableStmt> {
        let table_name = extract_table_name(&create.name)?;
        let columns = create
            .columns
            .into_iter()
            .map(|col| self.convert_column_def(col))
            .collect::<Result<Vec<_>>>()?;

        Ok(CreateTableStmt {
            table_name,
            columns,
            if_not_exists: create.if_not_exists,
        })
    }

    fn convert_drop_table(
        &self,
        names: Vec<sql_ast::ObjectName>,
        if_exists: bool,
    ) -> Result<DropTableStmt> {
        if names.len() != 1 {
            return Err(DbError::UnsupportedOperation(
                "Only single table DROP supported".into(),
            ));
        }

        Ok(DropTableStmt {
            table_name: extract_table_name(&names[0])?,
            if_exists,
        })
    }

    fn convert_column_def(&self, col: sql_ast::ColumnDef) -> Result<ColumnDef> {
        let data_type = convert_data_type(&col.data_type)?;
        let mut nullable = true;
        let mut unique = false;
        for opt in &col.options {
            match &opt.option {
                sql_ast::ColumnOption::NotNull => nullable = false,
                sql_ast::ColumnOption::Unique { is_primary, .. } => {
                    unique = true;
                    if *is_primary {
                        nullable = false;
                    }
                }
                _ => {}
            }
        }

        Ok(ColumnDef {
            name: col.name.value,
            data_type,
            nullable,
            unique,
        })
    }

    fn convert_insert(&self, insert: sql_ast::Insert) -> Result<InsertStmt> {
        let table_name = insert.table.to_string();

        let columns = if insert.columns.is_empty() {
            None
        } else {
            Some(insert.columns.into_iter().map(|id| id.value).collect())
        };

        let Some(source) = insert.source else {
            return Err(DbError::UnsupportedOperation(
                "INSERT requires a VALUES clause".into(),
            ));
        };

        let sql_ast::SetExpr::Values(vals) = *source.body else {
            return Err(DbError::UnsupportedOperation(
                "Only VALUES clause supported".into(),
            ));
        };

        let values = vals
            .rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|expr| self.convert_expr(expr))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(InsertStmt {
            table_name,
            columns,
            values,
        })
    }

    fn convert_query(&self, query: sql_ast::Query) -> Result<QueryStmt> {
        let sql_ast::SetExpr::Select(select) = *query.body else {
            return Err(DbError::UnsupportedOperation(
                "Only SELECT queries supported".into(),
            ));
        };

        let projection = select
            .projection
            .into_iter()
            .map(|item| self.convert_select_item(item))
            .collect::<Result<Vec<_>>>()?;

        if select.from.len() != 1 || !select.from[0].joins.is_empty() {
            return Err(DbError::UnsupportedOperation(
                "SELECT must read from exactly one table".into(),
            ));
        }
        let table_name = match &select.from[0].relation {
            sql_ast::TableFactor::Table { name, .. } => extract_table_name(name)?,
            _ => {
                return Err(DbError::UnsupportedOperation(
                    "Complex table references not supported".into(),
                ));
            }
        };

        let selection = select
            .selection
            .map(|expr| self.convert_expr(expr))
            .transpose()?;

        let order_by = self.convert_order_by(query.order_by)?;
        let (limit, offset) = self.convert_limit_clause(query.limit_clause)?;

        Ok(QueryStmt {
            projection,
            table_name,
            selection,
            order_by,
            limit,
            offset,
        })
    }

    fn convert_select_item(&self, item: sql_ast::SelectItem) -> Result<SelectItem> {
        match item {
            sql_ast::SelectItem::Wildcard(_) => Ok(SelectItem::Wildcard),
            sql_ast::SelectItem::UnnamedExpr(expr) => Ok(SelectItem::Expr {
                expr: self.convert_expr(expr)?,
                alias: None,
            }),
            sql_ast::SelectItem::ExprWithAlias { expr, alias } => Ok(SelectItem::Expr {
                expr: self.convert_expr(expr)?,
                alias: Some(alias.value),
            }),
            _ => Err(DbError::UnsupportedOperation("Unsupported select item".into())),
        }
    }

    fn convert_order_by(&self, order_by: Option<sql_ast::OrderBy>) -> Result<Vec<OrderByExpr>> {
        let Some(order_by) = order_by else {
            return Ok(Vec::new());
        };

        match order_by.kind {
            sql_ast::OrderByKind::Expressions(exprs) => exprs
                .into_iter()
                .map(|order| {
                    Ok(OrderByExpr {
                        descending: order.options.asc.map(|asc| !asc).unwrap_or(false),
                        expr: self.convert_expr(order.expr)?,
                    })
                })
                .collect(),
            sql_ast::OrderByKind::All(_) => Err(DbError::UnsupportedOperation(
                "ORDER BY ALL not supported".into(),
            )),
        }
    }

    fn convert_limit_clause(
        &self,
        limit_clause: Option<sql_ast::LimitClause>,
    ) -> Result<(Option<usize>, Option<usize>)> {
        let Some(clause) = limit_clause else {
            return Ok((None, None));
        };

        match clause {
            sql_ast::LimitClause::LimitOffset { limit, offset, .. } => {
                let limit = limit.map(|expr| self.convert_count(expr, "LIMIT")).transpose()?;
                let offset = offset
                    .map(|off| self.convert_count(off.value, "OFFSET"))
                    .transpose()?;
                Ok((limit, offset))
            }
            sql_ast::LimitClause::OffsetCommaLimit { offset, limit } => Ok((
                Some(self.convert_count(limit, "LIMIT")?),
                Some(self.convert_count(offset, "OFFSET")?),
            )),
        }
    }

    /// LIMIT / OFFSET operand: a non-negative integer literal or placeholder.
    fn convert_count(&self, expr: sql_ast::Expr, clause: &str) -> Result<usize> {
        match self.convert_expr(expr)? {
            Expr::Literal(value) => value
                .as_i64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| DbError::ParseError(format!("Invalid {} value: {}", clause, value))),
            other => Err(DbError::UnsupportedOperation(format!(
                "Only constant {} supported, got: {}",
                clause, other
            ))),
        }
    }

    fn convert_update(
        &self,
        table: sql_ast::TableWithJoins,
        assignments: Vec<sql_ast::Assignment>,
        selection: Option<sql_ast::Expr>,
    ) -> Result<UpdateStmt> {
        let table_name = match table.relation {
            sql_ast::TableFactor::Table { name, .. } => extract_table_name(&name)?,
            _ => {
                return Err(DbError::UnsupportedOperation(
                    "Complex table references not supported in UPDATE".into(),
                ));
            }
        };

        let assignments = assignments
            .into_iter()
            .map(|assign| {
                let column = match assign.target {
                    sql_ast::AssignmentTarget::ColumnName(col_name) if col_name.0.len() == 1 => {
                        col_name.0[0].to_string()
                    }
                    _ => {
                        return Err(DbError::UnsupportedOperation(
                            "Only simple column names supported in UPDATE".into(),
                        ));
                    }
                };

                Ok(Assignment {
                    column,
                    value: self.convert_expr(assign.value)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let selection = selection.map(|expr| self.convert_expr(expr)).transpose()?;

        Ok(UpdateStmt {
            table_name,
            assignments,
            selection,
        })
    }

    fn convert_delete(&self, delete: sql_ast::Delete) -> Result<DeleteStmt> {
        let tables = match delete.from {
            sql_ast::FromTable::WithFromKeyword(tables) => tables,
            sql_ast::FromTable::WithoutKeyword(tables) => tables,
        };

        let table_name = match tables.first().map(|t| &t.relation) {
            Some(sql_ast::TableFactor::Table { name, .. }) => extract_table_name(name)?,
            Some(_) => {
                return Err(DbError::UnsupportedOperation(
                    "Complex table references not supported in DELETE".into(),
                ));
            }
            None => return Err(DbError::ParseError("DELETE requires a table".into())),
        };

        let selection = delete
            .selection
            .map(|expr| self.convert_expr(expr))
            .transpose()?;

        Ok(DeleteStmt {
            table_name,
            selection,
        })
    }

    fn convert_expr(&self, expr: sql_ast::Expr) -> Result<Expr> {
        match expr {
            sql_ast::Expr::Identifier(ident) => Ok(Expr::Column(ident.value)),
            sql_ast::Expr::CompoundIdentifier(mut idents) => idents
                .pop()
                .map(|ident| Expr::Column(ident.value))
                .ok_or_else(|| DbError::ParseError("Empty identifier".into())),
            sql_ast::Expr::Value(val) => Ok(Expr::Literal(self.convert_value(val.value)?)),
            sql_ast::Expr::Nested(inner) => self.convert_expr(*inner),
            sql_ast::Expr::BinaryOp { left, op, right } => Ok(Expr::BinaryOp {
                left: Box::new(self.convert_expr(*left)?),
                op: convert_binary_op(&op)?,
                right: Box::new(self.convert_expr(*right)?),
            }),
            sql_ast::Expr::UnaryOp { op, expr } => {
                let inner = self.convert_expr(*expr)?;
                match op {
                    sql_ast::UnaryOperator::Not => Ok(Expr::Not(Box::new(inner))),
                    sql_ast::UnaryOperator::Minus => Ok(match inner {
                        Expr::Literal(Value::Integer(i)) => Expr::Literal(Value::Integer(-i)),
                        Expr::Literal(Value::Float(f)) => Expr::Literal(Value::Float(-f)),
                        other => Expr::Negate(Box::new(other)),
                    }),
                    sql_ast::UnaryOperator::Plus => Ok(inner),
                    _ => Err(DbError::UnsupportedOperation(format!(
                        "Unsupported unary operator: {}",
                        op
                    ))),
                }
            }
            sql_ast::Expr::IsNull(inner) => Ok(Expr::IsNull {
                expr: Box::new(self.convert_expr(*inner)?),
                negated: false,
            }),
            sql_ast::Expr::IsNotNull(inner) => Ok(Expr::IsNull {
                expr: Box::new(self.convert_expr(*inner)?),
                negated: true,
            }),
            other => Err(DbError::UnsupportedOperation(format!(
                "Unsupported expression: {}",
                other
            ))),
        }
    }

    fn convert_value(&self, val: sql_ast::Value) -> Result<Value> {
        match val {
            sql_ast::Value::Number(n, _) => {
                if let Ok(i) = n.parse::<i64>() {
                    Ok(Value::Integer(i))
                } else if let Ok(f) = n.parse::<f64>() {
                    Ok(Value::Float(f))
                } else {
                    Err(DbError::TypeMismatch(format!("Invalid number: {}", n)))
                }
            }
            sql_ast::Value::SingleQuotedString(s) | sql_ast::Value::DoubleQuotedString(s) => {
                Ok(Value::Text(s))
            }
            sql_ast::Value::Boolean(b) => Ok(Value::Boolean(b)),
            sql_ast::Value::Null => Ok(Value::Null),
            sql_ast::Value::Placeholder(name) => self.bind(&name),
            other => Err(DbError::UnsupportedOperation(format!(
                "Unsupported value: {}",
                other
            ))),
        }
    }

    fn bind(&self, placeholder: &str) -> Result<Value> {
        let position = if placeholder == "?" {
            let next = self.next_anonymous.get() + 1;
            self.next_anonymous.set(next);
            next
        } else {
            placeholder
                .trim_start_matches(['$', '?'])
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    DbError::ParseError(format!("Invalid placeholder: {}", placeholder))
                })?
        };

        let value = self.params.get(position - 1).cloned().ok_or_else(|| {
            DbError::ParseError(format!(
                "Placeholder {} has no bound parameter ({} supplied)",
                placeholder,
                self.params.len()
            ))
        })?;

        self.max_used.set(self.max_used.get().max(position));
        Ok(value)
    }
}

fn convert_binary_op(op: &sql_ast::BinaryOperator) -> Result<BinaryOp> {
    use sql_ast::BinaryOperator as SqlOp;

    match op {
        SqlOp::Plus => Ok(BinaryOp::Add),
        SqlOp::Minus => Ok(BinaryOp::Subtract),
        SqlOp::Multiply => Ok(BinaryOp::Multiply),
        SqlOp::Divide => Ok(BinaryOp::Divide),
        SqlOp::Eq => Ok(BinaryOp::Eq),
        SqlOp::NotEq => Ok(BinaryOp::NotEq),
        SqlOp::Lt => Ok(BinaryOp::Lt),
        SqlOp::LtEq => Ok(BinaryOp::LtEq),
        SqlOp::Gt => Ok(BinaryOp::Gt),
        SqlOp::GtEq => Ok(BinaryOp::GtEq),
        SqlOp::And => Ok(BinaryOp::And),
        SqlOp::Or => Ok(BinaryOp::Or),
        _ => Err(DbError::UnsupportedOperation(format!(
            "Unsupported binary operator: {}",
            op
        ))),
    }
}

fn convert_data_type(dt: &sql_ast::DataType) -> Result<DataType> {
    match dt {
        sql_ast::DataType::Int(_)
        | sql_ast::DataType::Integer(_)
        | sql_ast::DataType::BigInt(_)
        | sql_ast::DataType::SmallInt(_) => Ok(DataType::Integer),

        sql_ast::DataType::Float(_)
        | sql_ast::DataType::Double(_)
        | sql_ast::DataType::DoublePrecision
        | sql_ast::DataType::Real
        | sql_ast::DataType::Decimal(_)
        | sql_ast::DataType::Numeric(_) => Ok(DataType::Float),

        sql_ast::DataType::Text
        | sql_ast::DataType::Varchar(_)
        | sql_ast::DataType::Char(_)
        | sql_ast::DataType::String(_)
        | sql_ast::DataType::Uuid => Ok(DataType::Text),

        sql_ast::DataType::Boolean | sql_ast::DataType::Bool => Ok(DataType::Boolean),

        _ => Err(DbError::TypeMismatch(format!(
            "Unsupported data type: {}",
            dt
        ))),
    }
}

fn extract_table_name(name: &sql_ast::ObjectName) -> Result<String> {
    name.0
        .last()
        .map(|ident| ident.to_string())
        .ok_or_else(|| DbError::ParseError("Invalid table name".into()))
}
