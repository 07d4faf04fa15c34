//! Query tool scoped to a single dataset.

use super::Tool;
use crate::dataset::Dataset;
use crate::types::ToolOutput;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub const SQL_QUERY_TOOL: &str = "sql_query";

pub struct DatasetQueryTool {
    dataset: Arc<dyn Dataset>,
    description: String,
}

impl DatasetQueryTool {
    pub fn new(dataset: Arc<dyn Dataset>) -> Self {
        let description = format!(
            "Runs one read-only SQLite query against the table \"{}\" and returns \
             the result. Input should be a single SQL SELECT statement.",
            dataset.table()
        );
        Self {
            dataset,
            description,
        }
    }
}

#[async_trait]
impl Tool for DatasetQueryTool {
    fn name(&self) -> &str {
        SQL_QUERY_TOOL
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, input: &str) -> Result<ToolOutput> {
        match self.dataset.execute(strip_fence(input)).await {
            Ok(result) => Ok(ToolOutput::ok(result.render())),
            // Query mistakes go back to the model so it can fix the SQL.
            Err(e) => Ok(ToolOutput::failed(String::new(), e.to_string())),
        }
    }
}

/// Drop markdown fences and a leading `sql` language tag, in any case.
fn strip_fence(input: &str) -> &str {
    let query = input.trim().trim_matches('`').trim_start();
    match query.get(..3) {
        Some(tag) if tag.eq_ignore_ascii_case("sql") => {
            let rest = &query[3..];
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                rest
            } else {
                query
            }
        }
        _ => query,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::SqliteDataset;

    fn tool() -> DatasetQueryTool {
        let ds = SqliteDataset::from_csv_reader("ppv", "event,buys\nUFC 202,1650000\nUFC 229,2400000\n".as_bytes())
            .unwrap();
        DatasetQueryTool::new(Arc::new(ds))
    }

    #[tokio::test]
    async fn answers_queries() {
        let out = tool().invoke("```sql\nSELECT MAX(buys) FROM ppv\n```").await.unwrap();
        assert_eq!(out, ToolOutput::ok("2400000"));
    }

    #[tokio::test]
    async fn uppercase_fence_tags_are_stripped() {
        let out = tool().invoke("```SQL\nSELECT COUNT(*) FROM ppv\n```").await.unwrap();
        assert_eq!(out, ToolOutput::ok("2"));
    }

    #[test]
    fn fence_stripping_leaves_plain_queries_alone() {
        assert_eq!(strip_fence("Sql select 1"), " select 1");
        assert_eq!(strip_fence("SELECT sqlite_version()"), "SELECT sqlite_version()");
        assert_eq!(strip_fence("sqlite_master"), "sqlite_master");
    }

    #[tokio::test]
    async fn query_errors_are_reported_not_raised() {
        let out = tool().invoke("SELECT * FROM missing").await.unwrap();
        assert!(out.error.unwrap().contains("no such table"));
    }

    #[test]
    fn description_names_the_table() {
        assert!(tool().description().contains("\"ppv\""));
    }
}
