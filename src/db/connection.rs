// Connection Management
// Renders a canonical config into a backend-specific ODBC connection string and opens sessions

use crate::db::config::{render_value, CanonicalConfig};
use crate::db::traits::{Backend, Connector, Cursor, DatabaseType, DriverError};
use std::fmt;
use thiserror::Error;

/// Flag FreeTDS needs for domain accounts against a loopback target
const LOOPBACK_FLAG: &str = "DISABLE LOOPBACK CHECK";

/// Keys the Oracle descriptor consumes itself
const ORACLE_TEMPLATE_KEYS: [&str; 6] = ["driver", "server", "port", "database", "uid", "pwd"];

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Neither a driver nor a DSN made it into the config
    #[error("No driver specified")]
    NoDriver,

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// A rendered ODBC connection string
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString(String);

impl ConnectionString {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Segments split on `;`, for tests and logging of key names
    pub fn keys(&self) -> Vec<String> {
        self.0
            .split(';')
            .filter_map(|segment| segment.split_once('=').map(|(k, _)| k.to_string()))
            .collect()
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionString({})", self.keys().join(";"))
    }
}

/// Build the connection string for a resolved configuration.
///
/// Oracle gets a TNS descriptor (port defaults to 1521). Everything else is
/// the config's entries as `KEY=VALUE` joined by `;`, with the loopback check
/// disabled for SQL Server when the account is domain-qualified.
pub fn connection_string(config: &CanonicalConfig) -> Result<ConnectionString, ConnectionError> {
    if !config.has("driver") && !config.has("dsn") {
        return Err(ConnectionError::NoDriver);
    }

    let mut rendered = match config.backend() {
        Backend::Driver(DatabaseType::Oracle) => oracle_string(config),
        _ => config
            .entries()
            .map(|(key, value)| format!("{}={}", key.to_uppercase(), render_value(value)))
            .collect::<Vec<_>>()
            .join(";"),
    };

    let domain_account = config.get_str("uid").contains('\\');
    let already_set = config
        .entries()
        .any(|(key, _)| key.eq_ignore_ascii_case(LOOPBACK_FLAG));
    if config.backend() == Backend::Driver(DatabaseType::Mssql) && domain_account && !already_set {
        rendered.push_str(&format!(";{}=yes", LOOPBACK_FLAG));
    }

    Ok(ConnectionString(rendered))
}

/// Oracle TNS-style descriptor; extra options follow the template
fn oracle_string(config: &CanonicalConfig) -> String {
    let port = if config.has("port") {
        config.get_str("port")
    } else {
        DatabaseType::Oracle.default_port().to_string()
    };

    let mut rendered = format!(
        "DRIVER={driver};DBQ=(DESCRIPTION=(ADDRESS=(PROTOCOL=TCP)(HOST={server})(PORT={port}))(CONNECT_DATA=(SID={database})));UID={uid};PWD={pwd};",
        driver = config.get_str("driver"),
        server = config.get_str("server"),
        port = port,
        database = config.get_str("database"),
        uid = config.get_str("uid"),
        pwd = config.get_str("pwd"),
    );

    for (key, value) in config.entries() {
        if ORACLE_TEMPLATE_KEYS.contains(&key.as_str()) {
            continue;
        }
        rendered.push_str(&format!("{}={};", key.to_uppercase(), render_value(value)));
    }

    rendered
}

/// Open an autocommit session for `config`.
///
/// The session lives as long as the returned cursor; dropping the cursor
/// releases both on every exit path.
pub fn connect<'c>(
    connector: &'c dyn Connector,
    config: &CanonicalConfig,
) -> Result<Box<dyn Cursor + 'c>, ConnectionError> {
    let conn_str = connection_string(config)?;
    tracing::debug!(backend = ?config.backend(), keys = ?conn_str, "opening session");
    Ok(connector.connect(conn_str.as_str(), true)?)
}
