//! Read-only structured datasets that dataset agents query.

pub mod sqlite;

pub use sqlite::SqliteDataset;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("dataset has no columns")]
    NoColumns,
    #[error("query is empty")]
    EmptyQuery,
    #[error("only read-only queries are allowed")]
    NotReadOnly,
    #[error("query timed out after {} ms", .0.as_millis())]
    Timeout(Duration),
    #[error("query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("dataset engine failure: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "INTEGER"),
            Self::Real => write!(f, "REAL"),
            Self::Text => write!(f, "TEXT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: ColumnType,
}

/// Result of a dataset query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOutput {
    Scalar(String),
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
        /// More rows matched than were returned.
        truncated: bool,
    },
}

impl QueryOutput {
    /// Plain-text rendering used as a tool observation.
    pub fn render(&self) -> String {
        match self {
            Self::Scalar(value) => value.clone(),
            Self::Table {
                columns,
                rows,
                truncated,
            } => {
                let mut out = columns.join(" | ");
                for row in rows {
                    out.push('\n');
                    out.push_str(&row.join(" | "));
                }
                if rows.is_empty() {
                    out.push_str("\n(no rows)");
                } else if *truncated {
                    out.push_str(&format!("\n... (first {} rows shown)", rows.len()));
                }
                out
            }
        }
    }
}

/// Handle on one dataset: its schema plus a query engine over its content.
///
/// Content is immutable after load, so a handle is safe to share across
/// concurrent runs.
#[async_trait]
pub trait Dataset: Send + Sync {
    /// Registry-facing dataset name.
    fn name(&self) -> &str;

    /// Table name queries must reference.
    fn table(&self) -> &str;

    fn schema(&self) -> &[Column];

    fn row_count(&self) -> usize;

    async fn execute(&self, query: &str) -> Result<QueryOutput, DatasetError>;

    async fn preview(&self, rows: usize) -> Result<QueryOutput, DatasetError> {
        self.execute(&format!("SELECT * FROM \"{}\" LIMIT {}", self.table(), rows))
            .await
    }
}
