//! Query execution seam between the assistant and the relational store.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::assistant::validator::ValidatedStatement;

/// One result record: column name to value.
pub type Row = Map<String, Value>;

/// Rows in the order the store returned them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drop rows whose `student_id` column is present and differs from
    /// `student_id`. Returns how many rows were removed.
    pub fn retain_student(&mut self, student_id: i64) -> usize {
        if !self.columns.iter().any(|c| c.eq_ignore_ascii_case("student_id")) {
            return 0;
        }
        let before = self.rows.len();
        self.rows.retain(|row| {
            row.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("student_id"))
                .map(|(_, v)| v.as_i64() == Some(student_id))
                .unwrap_or(true)
        });
        before - self.rows.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("database rejected the statement: {0}")]
    Rejected(String),
    #[error("database unavailable: {0}")]
    Unavailable(String),
}

/// Runs a validated statement exactly once with positional binding.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, statement: &ValidatedStatement) -> Result<ResultSet, ExecutionError>;
}
