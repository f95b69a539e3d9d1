// Database Driver Traits
// Backend families, cell values and the driver seam used by the query executor

use std::fmt;

/// Supported backend families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DatabaseType {
    Mysql,
    Mssql,
    Oracle,
}

impl DatabaseType {
    /// Every family, in the order they are listed to the user
    pub const ALL: [DatabaseType; 3] = [DatabaseType::Mysql, DatabaseType::Mssql, DatabaseType::Oracle];

    /// Name used in `dbtype` parameters
    pub fn name(&self) -> &'static str {
        match self {
            DatabaseType::Mysql => "mysql",
            DatabaseType::Mssql => "mssql",
            DatabaseType::Oracle => "oracle",
        }
    }

    /// Display name for logs
    pub fn display_name(&self) -> &'static str {
        match self {
            DatabaseType::Mysql => "MySQL",
            DatabaseType::Mssql => "Microsoft SQL Server",
            DatabaseType::Oracle => "Oracle",
        }
    }

    /// Default port for the family
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseType::Mysql => 3306,
            DatabaseType::Mssql => 1433,
            DatabaseType::Oracle => 1521,
        }
    }

    /// Parse a family name, ignoring case
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|db_type| db_type.name().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a resolved configuration reaches its database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// A concrete installed driver for the given family
    Driver(DatabaseType),
    /// A pre-defined data source name; no driver lookup happened
    Dsn,
}

/// Cell value in a result row, as text or SQL NULL
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    String(String),
}

/// A raw result row, one cell per column in column order
pub type RawRow = Vec<CellValue>;

/// Errors raised by a database driver
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query execution error: {0}")]
    QueryError(String),

    /// The last statement produced no result set (a write)
    #[error("No results. Previous SQL was not a query.")]
    NoResultSet,

    #[error("No statement has been executed on this cursor")]
    NotExecuted,
}

/// Opens sessions against a database
///
/// The returned cursor owns its session; dropping it releases both.
pub trait Connector {
    fn connect(
        &self,
        connection_string: &str,
        autocommit: bool,
    ) -> Result<Box<dyn Cursor + '_>, DriverError>;
}

/// A cursor over an open session
pub trait Cursor {
    /// Execute one statement with positional parameter substitution
    fn execute(&mut self, query: &str, values: &[serde_json::Value]) -> Result<(), DriverError>;

    /// Column names of the current result set
    fn columns(&self) -> &[String];

    /// Fetch every remaining row of the current result set.
    ///
    /// Fails with [`DriverError::NoResultSet`] when the statement was not a query.
    fn fetch_all(&mut self) -> Result<Vec<RawRow>, DriverError>;

    /// Rows affected by the last statement, `-1` when unknown
    fn row_count(&self) -> i64;
}
