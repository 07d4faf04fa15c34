//! CSV-backed dataset served from an in-memory, query-only SQLite table.

use super::{Column, ColumnType, Dataset, DatasetError, QueryOutput};
use async_trait::async_trait;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// VM instructions between deadline checks.
const PROGRESS_INTERVAL: i32 = 1_000;

const DEFAULT_MAX_ROWS: usize = 50;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SqliteDataset {
    name: String,
    table: String,
    columns: Vec<Column>,
    row_count: usize,
    conn: Arc<Mutex<Connection>>,
    max_rows: usize,
    timeout: Duration,
}

impl SqliteDataset {
    /// Load a CSV file under the given dataset name.
    pub fn from_csv_path_named(name: &str, path: &Path) -> Result<Self, DatasetError> {
        let file = std::fs::File::open(path)?;
        let dataset = Self::from_csv_reader(name, file)?;
        info!(
            "Loaded dataset '{}' from {} ({} rows, {} columns)",
            name,
            path.display(),
            dataset.row_count,
            dataset.columns.len()
        );
        Ok(dataset)
    }

    /// Load CSV content (header row first) from any reader.
    pub fn from_csv_reader<R: Read>(name: &str, reader: R) -> Result<Self, DatasetError> {
        let mut csv = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);

        let headers = column_names(csv.headers()?);
        if headers.is_empty() {
            return Err(DatasetError::NoColumns);
        }

        let mut records: Vec<Vec<String>> = Vec::new();
        for record in csv.records() {
            let record = record?;
            records.push(record.iter().map(|f| f.trim().to_string()).collect());
        }

        let columns: Vec<Column> = headers
            .into_iter()
            .enumerate()
            .map(|(i, name)| Column {
                name,
                data_type: infer_type(records.iter().map(|r| r[i].as_str())),
            })
            .collect();

        let table = table_name(name);
        let mut conn = Connection::open_in_memory()?;
        load_table(&mut conn, &table, &columns, &records)?;
        conn.execute_batch("PRAGMA query_only = ON;")?;

        Ok(Self {
            name: name.to_string(),
            table,
            columns,
            row_count: records.len(),
            conn: Arc::new(Mutex::new(conn)),
            max_rows: DEFAULT_MAX_ROWS,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Cap on rows returned by a single query.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Dataset for SqliteDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn schema(&self) -> &[Column] {
        &self.columns
    }

    fn row_count(&self) -> usize {
        self.row_count
    }

    async fn execute(&self, query: &str) -> Result<QueryOutput, DatasetError> {
        let sql = query.trim().trim_end_matches(';').trim().to_string();
        if sql.is_empty() {
            return Err(DatasetError::EmptyQuery);
        }
        debug!("Dataset '{}' query: {}", self.name, sql);

        let conn = self.conn.clone();
        let max_rows = self.max_rows;
        let timeout = self.timeout;
        let result = tokio::task::spawn_blocking(move || run_query(&conn, &sql, max_rows, timeout))
            .await
            .map_err(|e| DatasetError::Internal(e.to_string()))?;

        if let Err(DatasetError::Timeout(_)) = &result {
            warn!("Dataset '{}' query timed out after {:?}", self.name, timeout);
        }
        result
    }
}

/// Run one query under the connection lock. The deadline starts once the
/// lock is held, so waiting behind another query never eats into it.
fn run_query(
    conn: &Mutex<Connection>,
    sql: &str,
    max_rows: usize,
    timeout: Duration,
) -> Result<QueryOutput, DatasetError> {
    let conn = conn
        .lock()
        .map_err(|_| DatasetError::Internal("dataset connection poisoned".into()))?;

    let deadline = Instant::now() + timeout;
    conn.progress_handler(PROGRESS_INTERVAL, Some(move || Instant::now() > deadline));
    let result = collect_rows(&conn, sql, max_rows);
    conn.progress_handler(0, None::<fn() -> bool>);

    match result {
        Err(DatasetError::Sqlite(e)) if e.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) => {
            Err(DatasetError::Timeout(timeout))
        }
        other => other,
    }
}

fn collect_rows(conn: &Connection, sql: &str, max_rows: usize) -> Result<QueryOutput, DatasetError> {
    let mut stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        return Err(DatasetError::NotReadOnly);
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = stmt.query([])?;
    let mut collected: Vec<Vec<String>> = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next()? {
        if collected.len() == max_rows {
            truncated = true;
            break;
        }
        let mut cells = Vec::with_capacity(width);
        for i in 0..width {
            cells.push(render_value(row.get_ref(i)?));
        }
        collected.push(cells);
    }

    if width == 1 && collected.len() == 1 && !truncated {
        if let Some(value) = collected.pop().and_then(|mut r| r.pop()) {
            return Ok(QueryOutput::Scalar(value));
        }
    }

    Ok(QueryOutput::Table {
        columns,
        rows: collected,
        truncated,
    })
}

fn load_table(
    conn: &mut Connection,
    table: &str,
    columns: &[Column],
    records: &[Vec<String>],
) -> Result<(), DatasetError> {
    let defs: Vec<String> = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.data_type))
        .collect();
    conn.execute_batch(&format!(
        "CREATE TABLE {} ({});",
        quote_ident(table),
        defs.join(", ")
    ))?;

    let placeholders = vec!["?"; columns.len()].join(", ");
    let tx = conn.transaction()?;
    {
        let mut insert = tx.prepare(&format!(
            "INSERT INTO {} VALUES ({})",
            quote_ident(table),
            placeholders
        ))?;
        for record in records {
            let values = record
                .iter()
                .zip(columns)
                .map(|(cell, col)| to_value(cell, col.data_type));
            insert.execute(params_from_iter(values))?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Trimmed, non-empty, unique header names.
fn column_names(headers: &csv::StringRecord) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(headers.len());
    for (i, raw) in headers.iter().enumerate() {
        let base = match raw.trim() {
            "" => format!("column_{}", i + 1),
            name => name.to_string(),
        };
        let mut name = base.clone();
        let mut n = 2;
        while names.iter().any(|existing| existing.eq_ignore_ascii_case(&name)) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        names.push(name);
    }
    names
}

fn infer_type<'a>(cells: impl Iterator<Item = &'a str> + Clone) -> ColumnType {
    let mut present = cells.filter(|c| !c.is_empty()).peekable();
    if present.peek().is_none() {
        return ColumnType::Text;
    }
    if present.clone().all(|c| c.parse::<i64>().is_ok()) {
        ColumnType::Integer
    } else if present.all(|c| c.parse::<f64>().is_ok()) {
        ColumnType::Real
    } else {
        ColumnType::Text
    }
}

fn to_value(cell: &str, data_type: ColumnType) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    match data_type {
        ColumnType::Integer => cell.parse().map(Value::Integer).unwrap_or(Value::Null),
        ColumnType::Real => cell.parse().map(Value::Real).unwrap_or(Value::Null),
        ColumnType::Text => Value::Text(cell.to_string()),
    }
}

fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".into(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(r) => r.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<blob {} bytes>", b.len()),
    }
}

/// SQL-friendly table name derived from a dataset name.
pub fn table_name(dataset: &str) -> String {
    let mut out: String = dataset
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    out = out.trim_matches('_').to_string();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, "t_");
    }
    out
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
