use crate::core::{DbError, Result};
use regex::Regex;
use std::time::Duration;

/// Error class produced by an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Transient,
    Fatal,
}

/// Fails statements whose text matches a pattern.
///
/// A rule without a count fires forever; with a count it fires that many
/// times and then goes quiet.
#[derive(Debug, Clone)]
pub struct FaultRule {
    pattern: Regex,
    kind: FaultKind,
    remaining: Option<u32>,
}

impl FaultRule {
    pub fn new(pattern: &str, kind: FaultKind) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| DbError::ExecutionError(format!("Invalid fault pattern: {}", e)))?;
        Ok(Self {
            pattern,
            kind,
            remaining: None,
        })
    }

    pub fn transient(pattern: &str) -> Result<Self> {
        Self::new(pattern, FaultKind::Transient)
    }

    pub fn fatal(pattern: &str) -> Result<Self> {
        Self::new(pattern, FaultKind::Fatal)
    }

    pub fn times(mut self, count: u32) -> Self {
        self.remaining = Some(count);
        self
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    fn is_spent(&self) -> bool {
        self.remaining == Some(0)
    }

    fn fire(&mut self, sql: &str) -> Option<DbError> {
        if self.is_spent() || !self.pattern.is_match(sql) {
            return None;
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }

        Some(match self.kind {
            FaultKind::Transient => {
                DbError::Transient(format!("injected transient fault on '{}'", sql))
            }
            FaultKind::Fatal => DbError::Fatal(format!("injected fatal fault on '{}'", sql)),
        })
    }
}

/// Every fault and delay configured on a backend.
#[derive(Debug, Default)]
pub struct FaultPlan {
    rules: Vec<FaultRule>,
    failing_connects: u32,
    latencies: Vec<(Regex, Duration)>,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: FaultRule) {
        self.rules.push(rule);
    }

    pub fn fail_next_connects(&mut self, count: u32) {
        self.failing_connects = count;
    }

    pub fn add_latency(&mut self, pattern: &str, delay: Duration) -> Result<()> {
        let pattern = Regex::new(pattern)
            .map_err(|e| DbError::ExecutionError(format!("Invalid latency pattern: {}", e)))?;
        self.latencies.push((pattern, delay));
        Ok(())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn check_connect(&mut self) -> Option<DbError> {
        if self.failing_connects == 0 {
            return None;
        }
        self.failing_connects -= 1;
        Some(DbError::Acquisition("injected connection failure".into()))
    }

    /// First matching live rule wins.
    pub fn check_statement(&mut self, sql: &str) -> Option<DbError> {
        self.rules.iter_mut().find_map(|rule| rule.fire(sql))
    }

    /// Total delay of every latency pattern matching the statement.
    pub fn latency_for(&self, sql: &str) -> Option<Duration> {
        let total: Duration = self
            .latencies
            .iter()
            .filter(|(pattern, _)| pattern.is_match(sql))
            .map(|(_, delay)| *delay)
            .sum();
        (!total.is_zero()).then_some(total)
    }
}
