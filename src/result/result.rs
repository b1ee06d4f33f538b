use crate::core::{Row, Rows, Value};
use std::sync::Arc;

/// Raw output of one executed statement.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Rows,
    /// Rows written by INSERT, UPDATE or DELETE. Zero for queries and DDL.
    pub affected_rows: u64,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows: 0,
        }
    }

    pub fn new(columns: Vec<String>, rows: Rows) -> Self {
        Self {
            columns,
            rows,
            affected_rows: 0,
        }
    }

    /// Build a result from positional values sharing one column list.
    pub fn from_values(columns: Vec<String>, values: Vec<Vec<Value>>) -> Self {
        let shared: Arc<[String]> = columns.clone().into();
        let rows = values
            .into_iter()
            .map(|vals| Row::new(Arc::clone(&shared), vals))
            .collect();
        Self::new(columns, rows)
    }

    pub fn affected(count: u64) -> Self {
        Self {
            affected_rows: count,
            ..Self::empty()
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Rows {
        self.rows
    }

    pub fn print(&self) {
        if self.columns.is_empty() {
            println!("{} row(s) affected", self.affected_rows);
            return;
        }

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.len()).collect();

        for row in &self.rows {
            for (i, value) in row.values().iter().enumerate() {
                widths[i] = widths[i].max(value.to_string().len());
            }
        }

        let header: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{:width$}", col, width = widths[i]))
            .collect();

        println!("{}", header.join(" | "));

        let separator: String = widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-");
        println!("{}", separator);

        for row in &self.rows {
            let row_str: Vec<String> = row
                .values()
                .iter()
                .enumerate()
                .map(|(i, val)| format!("{:width$}", val.to_string(), width = widths[i]))
                .collect();
            println!("{}", row_str.join(" | "));
        }

        println!("\n{} row(s)", self.rows.len());
    }
}
