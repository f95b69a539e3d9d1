// Module Commands
// Entry point for one invocation: argument validation, check mode, driver discovery,
// config merge, query execution and result shaping

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::db::{
    get_config, run_query, ConfigError, ConnectionError, ConnectionParams, Connector, DriverError,
    DriverRegistry, QueryOutcome, RegistryError, RegistryPaths, RowMap,
};

/// Key wrapping the parameter map in an invocation document
pub const ARGS_KEY: &str = "ANSIBLE_MODULE_ARGS";

const HOST_PREFIX: &str = "_ansible_";
const CHECK_MODE_KEY: &str = "_ansible_check_mode";

/// Parameters the module accepts
pub const SUPPORTED_PARAMETERS: [&str; 11] = [
    "config",
    "database",
    "dbtype",
    "dsn",
    "odbc_opts",
    "password",
    "port",
    "query",
    "servername",
    "username",
    "values",
];

/// Errors that end an invocation
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("{0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl From<DriverError> for ModuleError {
    fn from(err: DriverError) -> Self {
        ModuleError::Connection(ConnectionError::Driver(err))
    }
}

impl ModuleError {
    /// Error kind reported ahead of the detail, `None` for caller mistakes
    pub fn kind(&self) -> Option<&'static str> {
        match self {
            ModuleError::InvalidArguments(_) | ModuleError::Config(_) => None,
            ModuleError::Registry(_) => Some("RegistryParseError"),
            ModuleError::Connection(ConnectionError::Driver(_)) => Some("DriverError"),
            ModuleError::Connection(ConnectionError::NoDriver) => Some("InternalError"),
        }
    }

    /// The `msg` of the failure result
    pub fn failure_message(&self) -> String {
        match self.kind() {
            Some(kind) => format!("{}: {}", kind, self),
            None => self.to_string(),
        }
    }
}

/// Validated module arguments
#[derive(Debug, Deserialize)]
pub struct ModuleArgs {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    pub query: String,
    #[serde(default)]
    values: Option<Vec<Value>>,
}

impl ModuleArgs {
    /// Positional parameters, empty when none were given
    pub fn values(&self) -> &[Value] {
        self.values.as_deref().unwrap_or_default()
    }
}

/// A parsed invocation document
#[derive(Debug)]
pub struct Invocation {
    pub args: ModuleArgs,
    pub check_mode: bool,
}

impl Invocation {
    /// Parse an invocation document, wrapped under `ANSIBLE_MODULE_ARGS` or bare
    pub fn parse(document: &str) -> Result<Self, ModuleError> {
        let parsed: Value = serde_json::from_str(document)
            .map_err(|e| ModuleError::InvalidArguments(format!("Invalid module arguments: {}", e)))?;

        let mut params = match parsed {
            Value::Object(mut map) => match map.remove(ARGS_KEY) {
                Some(Value::Object(inner)) => inner,
                Some(_) => {
                    return Err(ModuleError::InvalidArguments(format!(
                        "{} must be a mapping",
                        ARGS_KEY
                    )))
                }
                None => map,
            },
            _ => {
                return Err(ModuleError::InvalidArguments(
                    "Module arguments must be a mapping".to_string(),
                ))
            }
        };

        let check_mode = matches!(params.get(CHECK_MODE_KEY), Some(Value::Bool(true)));
        params.retain(|key, _| !key.starts_with(HOST_PREFIX));

        Ok(Self {
            args: validate(params)?,
            check_mode,
        })
    }
}

fn validate(params: Map<String, Value>) -> Result<ModuleArgs, ModuleError> {
    let mut unsupported: Vec<&str> = params
        .keys()
        .map(String::as_str)
        .filter(|key| !SUPPORTED_PARAMETERS.contains(key))
        .collect();
    if !unsupported.is_empty() {
        unsupported.sort_unstable();
        return Err(ModuleError::InvalidArguments(format!(
            "Unsupported parameters: {}. Supported parameters include: {}",
            unsupported.join(", "),
            SUPPORTED_PARAMETERS.join(", ")
        )));
    }

    if matches!(params.get("query"), None | Some(Value::Null)) {
        return Err(ModuleError::InvalidArguments(
            "missing required arguments: query".to_string(),
        ));
    }

    serde_json::from_value(Value::Object(params))
        .map_err(|e| ModuleError::InvalidArguments(format!("Invalid module arguments: {}", e)))
}

/// Result rows as published under `ansible_facts`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryFacts {
    pub query_rows: Vec<Option<RowMap>>,
}

/// `output` is the row list after a query ran, an empty string otherwise
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ModuleOutput {
    Rows(Vec<Option<RowMap>>),
    Empty(String),
}

impl Default for ModuleOutput {
    fn default() -> Self {
        ModuleOutput::Empty(String::new())
    }
}

/// The result document written to stdout
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModuleResult {
    pub changed: bool,
    pub output: ModuleOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ansible_facts: Option<QueryFacts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl ModuleResult {
    pub fn success(outcome: QueryOutcome) -> Self {
        let changed = outcome.modified();
        let rows = outcome.into_rows();
        Self {
            changed,
            output: ModuleOutput::Rows(rows.clone()),
            ansible_facts: Some(QueryFacts { query_rows: rows }),
            ..Self::default()
        }
    }

    pub fn failure(err: &ModuleError) -> Self {
        Self {
            failed: Some(true),
            msg: Some(err.failure_message()),
            ..Self::default()
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed == Some(true)
    }
}

/// Discover drivers, merge the configuration and run the statement.
///
/// The connector is opened only once the configuration resolves.
pub fn execute<C, F>(
    args: &ModuleArgs,
    registry_paths: &RegistryPaths,
    open_connector: F,
) -> Result<QueryOutcome, ModuleError>
where
    C: Connector,
    F: FnOnce() -> Result<C, DriverError>,
{
    let registry = DriverRegistry::discover(registry_paths)?;
    let config = get_config(&args.connection, &registry)?;
    tracing::debug!(config = ?config, "configuration resolved");

    let connector = open_connector()?;
    Ok(run_query(&connector, &args.query, args.values(), &config)?)
}

/// Run one invocation document end to end and shape its result.
///
/// Check mode returns the default result without touching the registry or
/// the database.
pub fn run_module<C, F>(document: &str, registry_paths: &RegistryPaths, open_connector: F) -> ModuleResult
where
    C: Connector,
    F: FnOnce() -> Result<C, DriverError>,
{
    let span = tracing::info_span!("sql_query", invocation = %Uuid::new_v4());
    let _enter = span.enter();

    let outcome = Invocation::parse(document).and_then(|invocation| {
        if invocation.check_mode {
            tracing::info!("check mode, skipping execution");
            return Ok(None);
        }
        execute(&invocation.args, registry_paths, open_connector).map(Some)
    });

    match outcome {
        Ok(Some(outcome)) => {
            tracing::info!(changed = outcome.modified(), rows = outcome.rows().len(), "query finished");
            ModuleResult::success(outcome)
        }
        Ok(None) => ModuleResult::default(),
        Err(err) => {
            tracing::error!(error = %err.failure_message(), "invocation failed");
            ModuleResult::failure(&err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::traits::{CellValue, Cursor, RawRow};
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Answers selects with one row and reports one affected row otherwise
    struct StubConnector {
        fail: bool,
    }

    struct StubCursor {
        columns: Vec<String>,
        is_select: bool,
        fail: bool,
    }

    impl Cursor for StubCursor {
        fn execute(&mut self, query: &str, _values: &[Value]) -> Result<(), DriverError> {
            if self.fail {
                return Err(DriverError::QueryError("syntax error near 'selec'".to_string()));
            }
            self.is_select = query.to_lowercase().starts_with("select");
            Ok(())
        }

        fn columns(&self) -> &[String] {
            &self.columns
        }

        fn fetch_all(&mut self) -> Result<Vec<RawRow>, DriverError> {
            if self.is_select {
                Ok(vec![vec![CellValue::String("x".into()), CellValue::Null]])
            } else {
                Err(DriverError::NoResultSet)
            }
        }

        fn row_count(&self) -> i64 {
            1
        }
    }

    impl Connector for StubConnector {
        fn connect(&self, _connection_string: &str, _autocommit: bool) -> Result<Box<dyn Cursor + '_>, DriverError> {
            Ok(Box::new(StubCursor {
                columns: vec!["a".to_string(), "b".to_string()],
                is_select: false,
                fail: self.fail,
            }))
        }
    }

    fn stub() -> Result<StubConnector, DriverError> {
        Ok(StubConnector { fail: false })
    }

    fn failing_stub() -> Result<StubConnector, DriverError> {
        Ok(StubConnector { fail: true })
    }

    fn unreachable_connector() -> Result<StubConnector, DriverError> {
        panic!("connector must not be opened");
    }

    fn registry_file(contents: &str) -> (NamedTempFile, RegistryPaths) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        let paths = RegistryPaths::new(vec![file.path().to_path_buf()]);
        (file, paths)
    }

    fn document(args: Value) -> String {
        json!({ ARGS_KEY: args }).to_string()
    }

    fn mysql_args(query: &str) -> Value {
        json!({
            "username": "u",
            "password": "secret-pw",
            "dbtype": "mysql",
            "servername": "db1",
            "database": "app",
            "query": query,
        })
    }

    #[test]
    fn test_select_returns_rows_and_facts() {
        let (_file, paths) = registry_file("[MySQL 8.0]\nDriver=/usr/lib/libmyodbc8w.so\n");
        let result = run_module(&document(mysql_args("select a, b from t")), &paths, stub);

        assert!(!result.is_failed());
        let rendered = serde_json::to_value(&result).unwrap();
        assert_eq!(
            rendered,
            json!({
                "changed": false,
                "output": [{ "a": "x", "b": null }],
                "ansible_facts": { "query_rows": [{ "a": "x", "b": null }] },
            })
        );
    }

    #[test]
    fn test_write_reports_changed() {
        let (_file, paths) = registry_file("[MySQL]\n");
        let result = run_module(&document(mysql_args("delete from t")), &paths, stub);

        assert!(result.changed);
        assert_eq!(result.output, ModuleOutput::Rows(Vec::new()));
        assert_eq!(serde_json::to_value(&result).unwrap()["output"], json!([]));
    }

    #[test]
    fn test_check_mode_skips_everything() {
        // An invalid registry would fail if it were read
        let (_file, paths) = registry_file("no header here\n");
        let mut args = mysql_args("delete from t");
        args["_ansible_check_mode"] = json!(true);

        let result = run_module(&document(args), &paths, unreachable_connector);
        assert_eq!(result, ModuleResult::default());
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({ "changed": false, "output": "" })
        );
    }

    #[test]
    fn test_config_error_reports_plain_message() {
        let (_file, paths) = registry_file("[MySQL]\n");
        let mut args = mysql_args("select 1");
        args.as_object_mut().unwrap().remove("password");

        let result = run_module(&document(args), &paths, unreachable_connector);
        assert!(result.is_failed());
        assert!(!result.changed);
        assert_eq!(result.msg.as_deref(), Some("Missing configuration parameters: password"));
    }

    #[test]
    fn test_missing_driver_names_searched_paths() {
        let (_file, paths) = registry_file("[PostgreSQL]\n");
        let result = run_module(&document(mysql_args("select 1")), &paths, unreachable_connector);

        let msg = result.msg.unwrap();
        assert!(msg.starts_with("No driver found for dbtype in ["), "{}", msg);
    }

    #[test]
    fn test_driver_error_reports_kind() {
        let (_file, paths) = registry_file("[MySQL]\n");
        let result = run_module(&document(mysql_args("selec 1")), &paths, failing_stub);

        assert!(result.is_failed());
        assert_eq!(
            result.msg.as_deref(),
            Some("DriverError: Query execution error: syntax error near 'selec'")
        );
        assert!(!result.msg.unwrap().contains("secret-pw"));
    }

    #[test]
    fn test_connector_failure_reports_driver_error() {
        let (_file, paths) = registry_file("[MySQL]\n");
        let result = run_module(&document(mysql_args("select 1")), &paths, || {
            Err::<StubConnector, _>(DriverError::ConnectionFailed("no driver manager".to_string()))
        });

        assert!(result.msg.unwrap().starts_with("DriverError: "));
    }

    #[test]
    fn test_invalid_registry_reports_parse_error() {
        let (_file, paths) = registry_file("Driver=/usr/lib/x.so\n");
        let result = run_module(&document(mysql_args("select 1")), &paths, unreachable_connector);

        assert!(result.msg.unwrap().starts_with("RegistryParseError: "));
    }

    #[test]
    fn test_unsupported_parameters() {
        let mut args = mysql_args("select 1");
        args["hostname"] = json!("db1");
        args["_ansible_verbosity"] = json!(3);

        let err = Invocation::parse(&document(args)).unwrap_err();
        let msg = err.failure_message();
        assert!(msg.starts_with("Unsupported parameters: hostname."), "{}", msg);
    }

    #[test]
    fn test_query_is_required() {
        let mut args = mysql_args("select 1");
        args.as_object_mut().unwrap().remove("query");

        let err = Invocation::parse(&document(args)).unwrap_err();
        assert_eq!(err.failure_message(), "missing required arguments: query");
    }

    #[test]
    fn test_argument_types_are_checked() {
        let mut args = mysql_args("select 1");
        args["values"] = json!("not a list");
        assert!(matches!(
            Invocation::parse(&document(args)),
            Err(ModuleError::InvalidArguments(_))
        ));

        let mut args = mysql_args("select 1");
        args["config"] = json!("not a mapping");
        assert!(matches!(
            Invocation::parse(&document(args)),
            Err(ModuleError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_parse_bare_map_and_coerced_port() {
        let mut args = mysql_args("select ?");
        args["port"] = json!("3306");
        args["values"] = json!([1, "two"]);

        let invocation = Invocation::parse(&args.to_string()).unwrap();
        assert!(!invocation.check_mode);
        assert_eq!(invocation.args.connection.port, Some(3306));
        assert_eq!(invocation.args.values(), &[json!(1), json!("two")]);
        assert_eq!(invocation.args.query, "select ?");
    }

    #[test]
    fn test_scalar_string_parameters_are_coerced() {
        let mut args = mysql_args("select 1");
        args["password"] = json!(123456);
        args["database"] = json!(2020);
        args["username"] = json!(true);

        let invocation = Invocation::parse(&document(args.clone())).unwrap();
        let connection = &invocation.args.connection;
        assert_eq!(connection.password.as_deref(), Some("123456"));
        assert_eq!(connection.database.as_deref(), Some("2020"));
        assert_eq!(connection.username.as_deref(), Some("true"));

        let (_file, paths) = registry_file("[MySQL]\n");
        let result = run_module(&document(args), &paths, stub);
        assert!(!result.is_failed(), "{:?}", result.msg);

        let mut args = mysql_args("select 1");
        args["servername"] = json!(["db1"]);
        assert!(matches!(
            Invocation::parse(&document(args)),
            Err(ModuleError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_values_default_to_empty() {
        let mut args = mysql_args("select 1");
        args["values"] = Value::Null;
        let invocation = Invocation::parse(&document(args)).unwrap();
        assert!(invocation.args.values().is_empty());
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            ModuleError::from(ConnectionError::NoDriver).failure_message(),
            "InternalError: No driver specified"
        );
        assert_eq!(ModuleError::from(ConfigError::UnknownDatabaseType).kind(), None);
        assert_eq!(ModuleError::from(DriverError::NoResultSet).kind(), Some("DriverError"));
    }
}
