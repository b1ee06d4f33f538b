use super::{DbError, Result, Value};
use std::fmt;
use std::sync::Arc;

/// Immutable query text plus its ordered parameters.
///
/// Cloning is cheap; the text and parameters are shared.
///
/// # Examples
///
/// ```
/// use queryward::QueryDescriptor;
///
/// let q = QueryDescriptor::new("SELECT * FROM users WHERE age > $1").bind(25);
/// assert_eq!(q.params().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    sql: Arc<str>,
    params: Arc<[Value]>,
}

impl QueryDescriptor {
    pub fn new(sql: impl Into<String>) -> Self {
        Self::with_params(sql, Vec::<Value>::new())
    }

    pub fn with_params<I, V>(sql: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let sql: String = sql.into();
        Self {
            sql: Arc::from(sql),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns a new descriptor with one more positional parameter.
    pub fn bind(&self, value: impl Into<Value>) -> Self {
        let mut params = self.params.to_vec();
        params.push(value.into());
        Self {
            sql: Arc::clone(&self.sql),
            params: params.into(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

impl fmt::Display for QueryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
            write!(f, " [{}]", params.join(", "))?;
        }
        Ok(())
    }
}

impl From<&str> for QueryDescriptor {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for QueryDescriptor {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

/// Source of a paginated scan: a table and a stable ordering key.
///
/// The ordering column must be deterministic (ideally unique) or pages may
/// skip or repeat rows when the table changes between page reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    table: String,
    order_by: String,
}

impl TableDescriptor {
    pub fn new(table: impl Into<String>, order_by: impl Into<String>) -> Result<Self> {
        let table = table.into();
        let order_by = order_by.into();
        validate_identifier(&table)?;
        validate_identifier(&order_by)?;
        Ok(Self { table, order_by })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn order_by(&self) -> &str {
        &self.order_by
    }

    /// Query for one page: `ORDER BY <key> LIMIT $1 OFFSET $2`.
    pub fn page_query(&self, batch_size: usize, offset: usize) -> QueryDescriptor {
        QueryDescriptor::with_params(
            format!(
                "SELECT * FROM {} ORDER BY {} LIMIT $1 OFFSET $2",
                self.table, self.order_by
            ),
            [Value::from(batch_size), Value::from(offset)],
        )
    }
}

fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DbError::ParseError(format!("Invalid identifier: '{}'", name)))
    }
}
