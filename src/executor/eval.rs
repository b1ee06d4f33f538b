use crate::core::{DbError, Result, Schema, Value};
use crate::parser::ast::{BinaryOp, Expr};
use std::cmp::Ordering;

/// Evaluate an expression against one stored row.
///
/// Comparisons involving NULL yield NULL, which a WHERE clause treats as false.
pub fn evaluate(expr: &Expr, row: &[Value], schema: &Schema, table: &str) -> Result<Value> {
    match expr {
        Expr::Column(name) => {
            let idx = schema
                .find_column_index(name)
                .ok_or_else(|| DbError::ColumnNotFound(name.clone(), table.to_string()))?;
            Ok(row[idx].clone())
        }
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Not(inner) => match evaluate(inner, row, schema, table)? {
            Value::Null => Ok(Value::Null),
            value => Ok(Value::Boolean(!value.as_bool())),
        },
        Expr::Negate(inner) => match evaluate(inner, row, schema, table)? {
            Value::Integer(i) => Ok(Value::Integer(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Null => Ok(Value::Null),
            other => Err(DbError::TypeMismatch(format!(
                "Cannot negate {}",
                other.type_name()
            ))),
        },
        Expr::IsNull { expr, negated } => {
            let is_null = evaluate(expr, row, schema, table)?.is_null();
            Ok(Value::Boolean(is_null != *negated))
        }
        Expr::BinaryOp { left, op, right } => {
            let left = evaluate(left, row, schema, table)?;
            let right = evaluate(right, row, schema, table)?;
            apply_binary(&left, *op, &right)
        }
    }
}

/// True only when the predicate evaluates to a truthy, non-NULL value.
pub fn matches(expr: &Expr, row: &[Value], schema: &Schema, table: &str) -> Result<bool> {
    Ok(evaluate(expr, row, schema, table)?.as_bool())
}

fn apply_binary(left: &Value, op: BinaryOp, right: &Value) -> Result<Value> {
    match op {
        BinaryOp::And => Ok(Value::Boolean(left.as_bool() && right.as_bool())),
        BinaryOp::Or => Ok(Value::Boolean(left.as_bool() || right.as_bool())),
        _ if left.is_null() || right.is_null() => Ok(Value::Null),
        BinaryOp::Eq => compare(left, right, |o| o == Ordering::Equal),
        BinaryOp::NotEq => compare(left, right, |o| o != Ordering::Equal),
        BinaryOp::Lt => compare(left, right, |o| o == Ordering::Less),
        BinaryOp::LtEq => compare(left, right, |o| o != Ordering::Greater),
        BinaryOp::Gt => compare(left, right, |o| o == Ordering::Greater),
        BinaryOp::GtEq => compare(left, right, |o| o != Ordering::Less),
        BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide => {
            arithmetic(left, op, right)
        }
    }
}

fn compare(left: &Value, right: &Value, test: impl Fn(Ordering) -> bool) -> Result<Value> {
    Ok(Value::Boolean(test(left.compare(right)?)))
}

fn arithmetic(left: &Value, op: BinaryOp, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(*b),
                BinaryOp::Subtract => a.checked_sub(*b),
                BinaryOp::Multiply => a.checked_mul(*b),
                BinaryOp::Divide if *b == 0 => {
                    return Err(DbError::ExecutionError("Division by zero".into()));
                }
                BinaryOp::Divide => a.checked_div(*b),
                _ => None,
            };
            result
                .map(Value::Integer)
                .ok_or_else(|| DbError::ExecutionError("Integer overflow".into()))
        }
        _ if left.is_numeric() && right.is_numeric() => {
            let a = left.as_f64().unwrap_or_default();
            let b = right.as_f64().unwrap_or_default();
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Subtract => a - b,
                BinaryOp::Multiply => a * b,
                BinaryOp::Divide if b == 0.0 => {
                    return Err(DbError::ExecutionError("Division by zero".into()));
                }
                _ => a / b,
            };
            Ok(Value::Float(result))
        }
        _ => Err(DbError::TypeMismatch(format!(
            "Cannot apply {} to {} and {}",
            op,
            left.type_name(),
            right.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType};

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("name", DataType::Text),
            Column::new("age", DataType::Integer),
        ])
    }

    fn gt(column: &str, value: i64) -> Expr {
        Expr::BinaryOp {
            left: Box::new(Expr::Column(column.into())),
            op: BinaryOp::Gt,
            right: Box::new(Expr::Literal(Value::Integer(value))),
        }
    }

    #[test]
    fn test_comparison() {
        let row = vec![Value::from("Alice"), Value::Integer(30)];
        assert!(matches(&gt("age", 25), &row, &schema(), "users").unwrap());
        assert!(!matches(&gt("age", 30), &row, &schema(), "users").unwrap());
    }

    #[test]
    fn test_null_comparison_is_not_a_match() {
        let row = vec![Value::from("Bob"), Value::Null];
        assert!(!matches(&gt("age", 25), &row, &schema(), "users").unwrap());
    }

    #[test]
    fn test_unknown_column() {
        let row = vec![Value::from("Bob"), Value::Integer(1)];
        let err = evaluate(&Expr::Column("email".into()), &row, &schema(), "users").unwrap_err();
        assert!(matches!(err, DbError::ColumnNotFound(col, table) if col == "email" && table == "users"));
    }

    #[test]
    fn test_arithmetic() {
        let sum = apply_binary(&Value::Integer(2), BinaryOp::Add, &Value::Float(0.5)).unwrap();
        assert_eq!(sum, Value::Float(2.5));
        assert!(apply_binary(&Value::Integer(1), BinaryOp::Divide, &Value::Integer(0)).is_err());
    }
}
