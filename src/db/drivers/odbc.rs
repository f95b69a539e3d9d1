// ODBC Driver
// Implements the Connector/Cursor seam on top of odbc-api (blocking, one session per cursor)

use crate::db::traits::{CellValue, Connector, Cursor, DriverError, RawRow};
use odbc_api::parameter::InputParameter;
use odbc_api::{ConnectionOptions, Environment, IntoParameter};
use serde_json::Value;

fn query_error(err: odbc_api::Error) -> DriverError {
    DriverError::QueryError(err.to_string())
}

/// ODBC driver manager handle
pub struct OdbcConnector {
    environment: Environment,
}

impl OdbcConnector {
    /// Allocate an ODBC environment
    pub fn new() -> Result<Self, DriverError> {
        let environment = Environment::new()
            .map_err(|e| DriverError::ConnectionFailed(format!("Failed to create ODBC environment: {}", e)))?;
        Ok(Self { environment })
    }
}

impl Connector for OdbcConnector {
    fn connect(&self, connection_string: &str, autocommit: bool) -> Result<Box<dyn Cursor + '_>, DriverError> {
        let connection = self
            .environment
            .connect_with_connection_string(connection_string, ConnectionOptions::default())
            .map_err(|e| DriverError::ConnectionFailed(e.to_string()))?;

        connection
            .set_autocommit(autocommit)
            .map_err(|e| DriverError::ConnectionFailed(e.to_string()))?;

        Ok(Box::new(OdbcCursor {
            connection,
            columns: Vec::new(),
            result: StatementResult::NotExecuted,
        }))
    }
}

enum StatementResult {
    NotExecuted,
    Rows(Vec<RawRow>),
    NoResultSet { row_count: i64 },
}

/// Cursor over one ODBC connection; dropping it disconnects
pub struct OdbcCursor<'env> {
    connection: odbc_api::Connection<'env>,
    columns: Vec<String>,
    result: StatementResult,
}

impl Cursor for OdbcCursor<'_> {
    fn execute(&mut self, query: &str, values: &[Value]) -> Result<(), DriverError> {
        let params: Vec<Box<dyn InputParameter>> = values.iter().map(to_parameter).collect();

        let mut statement = self.connection.preallocate().map_err(query_error)?;
        let result_set = match statement.execute(query, params.as_slice()).map_err(query_error)? {
            Some(mut cursor) => Some(read_result_set(&mut cursor)?),
            None => None,
        };

        match result_set {
            Some((columns, rows)) => {
                self.columns = columns;
                self.result = StatementResult::Rows(rows);
            }
            None => {
                let row_count = statement
                    .row_count()
                    .map_err(query_error)?
                    .and_then(|n| i64::try_from(n).ok())
                    .unwrap_or(-1);
                self.columns.clear();
                self.result = StatementResult::NoResultSet { row_count };
            }
        }

        Ok(())
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn fetch_all(&mut self) -> Result<Vec<RawRow>, DriverError> {
        match &mut self.result {
            StatementResult::NotExecuted => Err(DriverError::NotExecuted),
            StatementResult::Rows(rows) => Ok(std::mem::take(rows)),
            StatementResult::NoResultSet { .. } => Err(DriverError::NoResultSet),
        }
    }

    fn row_count(&self) -> i64 {
        match &self.result {
            StatementResult::NoResultSet { row_count } => *row_count,
            _ => -1,
        }
    }
}

/// Bind a JSON value as a text parameter; the driver converts to the column type
fn to_parameter(value: &Value) -> Box<dyn InputParameter> {
    Box::new(parameter_text(value).into_parameter())
}

/// Text sent for a parameter, `None` binds SQL NULL
fn parameter_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        other => Some(other.to_string()),
    }
}

/// Column names and every row of a result set, cells as text or null
fn read_result_set(cursor: &mut impl odbc_api::Cursor) -> Result<(Vec<String>, Vec<RawRow>), DriverError> {
    let columns: Vec<String> = cursor
        .column_names()
        .map_err(query_error)?
        .collect::<Result<_, _>>()
        .map_err(query_error)?;

    let num_cols = u16::try_from(columns.len())
        .map_err(|_| DriverError::QueryError(format!("Too many columns: {}", columns.len())))?;

    let mut rows = Vec::new();
    let mut buf = Vec::new();
    while let Some(mut row) = cursor.next_row().map_err(query_error)? {
        let mut cells = Vec::with_capacity(columns.len());
        for col in 1..=num_cols {
            buf.clear();
            let cell = if row.get_text(col, &mut buf).map_err(query_error)? {
                CellValue::String(String::from_utf8_lossy(&buf).into_owned())
            } else {
                CellValue::Null
            };
            cells.push(cell);
        }
        rows.push(cells);
    }

    Ok((columns, rows))
}
