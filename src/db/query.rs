// Query Execution
// Runs one statement on a scoped session and classifies it as a read or a write

use crate::db::config::CanonicalConfig;
use crate::db::connection::{connect, ConnectionError};
use crate::db::traits::{CellValue, Connector, DriverError};
use serde::Serialize;
use serde_json::{Map, Value};

/// A result row keyed by column name, in column order
pub type RowMap = Map<String, Value>;

/// What a single statement did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutcome {
    /// The statement returned a result set; `None` marks an absent row
    Read { rows: Vec<Option<RowMap>> },
    /// The statement returned no result set
    Write { modified: bool },
}

impl QueryOutcome {
    /// Result rows, empty for writes
    pub fn rows(&self) -> &[Option<RowMap>] {
        match self {
            QueryOutcome::Read { rows } => rows,
            QueryOutcome::Write { .. } => &[],
        }
    }

    /// Whether the statement changed anything; reads never do
    pub fn modified(&self) -> bool {
        match self {
            QueryOutcome::Read { .. } => false,
            QueryOutcome::Write { modified } => *modified,
        }
    }

    pub fn into_rows(self) -> Vec<Option<RowMap>> {
        match self {
            QueryOutcome::Read { rows } => rows,
            QueryOutcome::Write { .. } => Vec::new(),
        }
    }
}

/// Convert a row into a mapping keyed by the cursor's column names
pub fn row_to_map(columns: &[String], row: Option<&[CellValue]>) -> Option<RowMap> {
    let row = row?;
    let map = columns
        .iter()
        .cloned()
        .zip(row.iter().map(cell_to_json))
        .collect();
    Some(map)
}

fn cell_to_json(cell: &CellValue) -> Value {
    match cell {
        CellValue::Null => Value::Null,
        CellValue::String(s) => Value::String(s.clone()),
    }
}

/// Execute `query` with positional `values` against the database in `config`.
///
/// A statement with a result set is a read (`modified` is false); one without
/// is a write, modified when the driver reports affected rows. Any other driver
/// failure aborts the invocation. The session is released before returning.
pub fn run_query(
    connector: &dyn Connector,
    query: &str,
    values: &[Value],
    config: &CanonicalConfig,
) -> Result<QueryOutcome, ConnectionError> {
    let start = std::time::Instant::now();
    let mut cursor = connect(connector, config)?;

    cursor.execute(query, values)?;

    let outcome = match cursor.fetch_all() {
        Ok(rows) => {
            let columns = cursor.columns();
            QueryOutcome::Read {
                rows: rows
                    .iter()
                    .map(|row| row_to_map(columns, Some(row.as_slice())))
                    .collect(),
            }
        }
        Err(DriverError::NoResultSet) => QueryOutcome::Write {
            modified: cursor.row_count() > 0,
        },
        Err(e) => return Err(e.into()),
    };

    tracing::debug!(
        rows = outcome.rows().len(),
        modified = outcome.modified(),
        execution_time_ms = start.elapsed().as_millis() as u64,
        "statement finished"
    );

    Ok(outcome)
}
