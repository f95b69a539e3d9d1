// Configuration Merger
// Folds the nested config object, top-level overrides and extra ODBC options into one canonical config

use crate::db::registry::DriverRegistry;
use crate::db::traits::{Backend, DatabaseType};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// External parameter names and their canonical connection-string keys
pub const ARG_MAPPING: [(&str, &str); 8] = [
    ("dsn", "dsn"),
    ("username", "uid"),
    ("password", "pwd"),
    ("database", "database"),
    ("servername", "server"),
    ("dbtype", "driver"),
    ("port", "port"),
    ("odbc_opts", "odbc_opts"),
];

const ODBC_OPTS: &str = "odbc_opts";

/// Canonical key for an external parameter name
pub fn canonical_key(external: &str) -> Option<&'static str> {
    ARG_MAPPING
        .iter()
        .find(|(name, _)| *name == external)
        .map(|(_, key)| *key)
}

/// External parameter name for a canonical key, for error messages
pub fn external_name(canonical: &str) -> &str {
    ARG_MAPPING
        .iter()
        .find(|(_, key)| *key == canonical)
        .map(|(name, _)| *name)
        .unwrap_or(canonical)
}

/// Configuration errors, reported to the caller as-is
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration parameters: {}", .0.join(", "))]
    MissingParameters(Vec<String>),

    #[error("DB type must be one of {}", valid_types())]
    UnknownDatabaseType,

    #[error("No driver found for dbtype in {searched}")]
    DriverNotFound { db_type: DatabaseType, searched: String },

    #[error("Invalid value for {key}: expected {expected}")]
    InvalidValue { key: String, expected: &'static str },
}

fn valid_types() -> String {
    DatabaseType::ALL
        .iter()
        .map(|t| t.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Connection-related parameters supplied by the caller
#[derive(Clone, Default, Deserialize)]
pub struct ConnectionParams {
    #[serde(default)]
    pub config: Option<Map<String, Value>>,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub dsn: Option<String>,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub servername: Option<String>,
    #[serde(default, deserialize_with = "deserialize_port")]
    pub port: Option<u16>,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub database: Option<String>,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub password: Option<String>,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub dbtype: Option<String>,
    #[serde(default)]
    pub odbc_opts: Option<Map<String, Value>>,
}

impl ConnectionParams {
    /// Top-level scalar overrides, in mapping order
    fn overrides(&self) -> Vec<(&'static str, Value)> {
        let text = |v: &Option<String>| v.clone().map(Value::String);
        let pairs = [
            ("dsn", text(&self.dsn)),
            ("username", text(&self.username)),
            ("password", text(&self.password)),
            ("database", text(&self.database)),
            ("servername", text(&self.servername)),
            ("dbtype", text(&self.dbtype)),
            ("port", self.port.map(Value::from)),
        ];
        pairs
            .into_iter()
            .filter_map(|(name, value)| value.filter(|v| !is_blank(v)).map(|v| (name, v)))
            .collect()
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("config", &self.config.as_ref().map(|c| c.keys().collect::<Vec<_>>()))
            .field("dsn", &self.dsn)
            .field("servername", &self.servername)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("dbtype", &self.dbtype)
            .field("odbc_opts", &self.odbc_opts.as_ref().map(|o| o.keys().collect::<Vec<_>>()))
            .finish()
    }
}

/// Accept a string parameter given as a string, number or boolean
fn deserialize_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "invalid type: expected a string, found {}",
            if other.is_array() { "a sequence" } else { "a mapping" }
        ))),
    }
}

/// Accept a port as an integer or a numeric string
fn deserialize_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid port number: {}", n))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid port number: {}", s))),
        Some(other) => Err(D::Error::custom(format!("invalid port number: {}", other))),
    }
}

/// Null, empty strings and empty collections count as "not given"
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Render a canonical value the way it appears in a connection string
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "yes".to_string(),
        Value::Bool(false) => "no".to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn require_scalar(key: &str, value: &Value) -> Result<(), ConfigError> {
    match value {
        Value::Array(_) | Value::Object(_) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            expected: "a scalar value",
        }),
        _ => Ok(()),
    }
}

fn require_mapping<'a>(key: &str, value: &'a Value) -> Result<&'a Map<String, Value>, ConfigError> {
    value.as_object().ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        expected: "a mapping",
    })
}

/// Fully merged and validated configuration
#[derive(Clone, PartialEq)]
pub struct CanonicalConfig {
    entries: Map<String, Value>,
    backend: Backend,
}

impl CanonicalConfig {
    /// Build a config directly from canonical entries
    pub fn from_entries(entries: Map<String, Value>, backend: Backend) -> Self {
        Self { entries, backend }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Rendered value for a key, empty when absent
    pub fn get_str(&self, key: &str) -> String {
        self.entries.get(key).map(render_value).unwrap_or_default()
    }

    /// True when the key is present with a non-blank value
    pub fn has(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|v| !is_blank(v))
    }

    /// Entries in insertion order
    pub fn entries(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

}

impl fmt::Debug for CanonicalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.entries {
            if key.eq_ignore_ascii_case("pwd") {
                map.entry(key, &"********");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()?;
        write!(f, " ({:?})", self.backend)
    }
}

/// Fail with the external names of any canonical keys that are absent or blank
fn require_args(entries: &Map<String, Value>, keys: &[&str]) -> Result<(), ConfigError> {
    let missing: Vec<String> = keys
        .iter()
        .filter(|key| entries.get(**key).map_or(true, is_blank))
        .map(|key| external_name(key).to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::MissingParameters(missing))
    }
}

/// Merge the caller's parameters into a canonical configuration.
///
/// Precedence, lowest first: the nested `config` object, top-level parameters,
/// then `odbc_opts` (nested options overridden key-by-key by top-level ones).
/// Credentials are always required; with a DSN nothing else is, otherwise the
/// database, server and backend family must be given and the family must have
/// an installed driver in `registry`.
pub fn get_config(params: &ConnectionParams, registry: &DriverRegistry) -> Result<CanonicalConfig, ConfigError> {
    let mut entries = Map::new();
    let mut opts = Map::new();

    if let Some(nested) = &params.config {
        // Pass-through keys first so a renamed external key wins over its canonical twin
        for (key, value) in nested {
            if canonical_key(key).is_some() || is_blank(value) {
                continue;
            }
            require_scalar(key, value)?;
            entries.insert(key.clone(), value.clone());
        }
        for (external, canonical) in ARG_MAPPING {
            let Some(value) = nested.get(external).filter(|v| !is_blank(v)) else {
                continue;
            };
            if canonical == ODBC_OPTS {
                opts.extend(require_mapping(external, value)?.clone());
            } else {
                require_scalar(external, value)?;
                entries.insert(canonical.to_string(), value.clone());
            }
        }
    }

    for (external, value) in params.overrides() {
        if let Some(canonical) = canonical_key(external) {
            entries.insert(canonical.to_string(), value);
        }
    }

    if let Some(top_opts) = &params.odbc_opts {
        opts.extend(top_opts.clone());
    }
    // Empty option values are kept and render as `KEY=`
    for (key, value) in opts {
        if value.is_null() {
            continue;
        }
        require_scalar(&key, &value)?;
        entries.insert(key, value);
    }

    require_args(&entries, &["uid", "pwd"])?;

    if entries.get("dsn").is_some_and(|v| !is_blank(v)) {
        tracing::debug!("using pre-defined DSN, skipping driver lookup");
        return Ok(CanonicalConfig::from_entries(entries, Backend::Dsn));
    }

    require_args(&entries, &["database", "server", "driver"])?;

    let family = entries
        .get("driver")
        .and_then(Value::as_str)
        .and_then(DatabaseType::from_name)
        .ok_or(ConfigError::UnknownDatabaseType)?;

    let token = registry
        .get_driver(family)
        .ok_or_else(|| ConfigError::DriverNotFound {
            db_type: family,
            searched: registry.searched().to_string(),
        })?;

    tracing::debug!(dbtype = %family, driver = %token, "resolved driver");
    entries.insert("driver".to_string(), Value::String(token.to_string()));

    Ok(CanonicalConfig::from_entries(entries, Backend::Driver(family)))
}
