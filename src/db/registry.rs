// Driver Registry
// Discovers the newest installed ODBC driver for each backend family

use crate::db::ini::{IniError, IniSections};
use crate::db::traits::DatabaseType;
use crate::db::version::DriverVersion;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Conventional driver registry files, searched in order
pub const ODBCINST_PATHS: [&str; 3] = [
    "/etc/odbcinst.ini",
    "/usr/local/etc/odbcinst.ini",
    "~/.odbc.ini",
];

/// Registry discovery errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Parse(#[from] IniError),

    #[error("Invalid driver pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Ordered list of registry files to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryPaths(Vec<PathBuf>);

impl RegistryPaths {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self(paths)
    }

    /// The conventional system paths, preceded by `$ODBCSYSINI/odbcinst.ini` when set
    pub fn from_env() -> Self {
        let mut paths = Vec::new();
        if let Some(dir) = std::env::var_os("ODBCSYSINI") {
            paths.push(Path::new(&dir).join("odbcinst.ini"));
        }
        paths.extend(ODBCINST_PATHS.iter().map(|p| expand_home(p)));
        Self(paths)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.0
    }
}

impl Default for RegistryPaths {
    fn default() -> Self {
        Self::from_env()
    }
}

impl fmt::Display for RegistryPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.0.iter().map(|p| p.display().to_string()).collect();
        write!(f, "[{}]", joined.join(", "))
    }
}

/// Expand a leading `~/` to the user's home directory
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}

/// Best installed driver per backend family
#[derive(Debug, Clone)]
pub struct DriverRegistry {
    drivers: HashMap<DatabaseType, String>,
    searched: RegistryPaths,
}

impl DriverRegistry {
    /// Create a registry with no drivers found
    pub fn new(searched: RegistryPaths) -> Self {
        Self {
            drivers: HashMap::new(),
            searched,
        }
    }

    /// Read every registry file that exists and pick a driver per family.
    ///
    /// Files that cannot be read are skipped; if none can, a warning is logged
    /// and the registry stays empty. A file that reads but does not parse is fatal.
    pub fn discover(paths: &RegistryPaths) -> Result<Self, RegistryError> {
        let mut sections = IniSections::new();
        let mut good_files = 0usize;

        for path in paths.paths() {
            let bytes = match std::fs::read(path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping driver registry file");
                    continue;
                }
            };
            sections.read_bytes(&bytes, path)?;
            good_files += 1;
        }

        if good_files == 0 {
            tracing::warn!(paths = %paths, "No ODBC configuration could be read");
            return Ok(Self::new(paths.clone()));
        }

        Self::from_sections(sections.sections(), paths.clone())
    }

    /// Pick a driver per family from a list of registry section names
    pub fn from_sections(sections: &[String], searched: RegistryPaths) -> Result<Self, RegistryError> {
        let mut registry = Self::new(searched);

        registry.register_best(DatabaseType::Mysql, sections, &[&family_pattern("mysql")?]);
        registry.register_best(DatabaseType::Oracle, sections, &[&family_pattern("oracle")?]);
        // FreeTDS wins over any generic SQL Server driver
        registry.register_best(
            DatabaseType::Mssql,
            sections,
            &[&family_pattern("freetds")?, &family_pattern("sql server")?],
        );

        Ok(registry)
    }

    /// Register the best match of the first pattern that matches anything
    fn register_best(&mut self, db_type: DatabaseType, sections: &[String], patterns: &[&Regex]) {
        let found = patterns.iter().find_map(|pattern| best_driver(sections, pattern));
        match found {
            Some(token) => {
                tracing::info!(dbtype = %db_type, driver = %token, "selected {} driver", db_type.display_name());
                self.register(db_type, token);
            }
            None => tracing::debug!(dbtype = %db_type, "no driver installed"),
        }
    }

    /// Register a driver token for a family
    pub fn register(&mut self, db_type: DatabaseType, token: impl Into<String>) {
        self.drivers.insert(db_type, token.into());
    }

    /// Driver token for a family, `None` when nothing was found
    pub fn get_driver(&self, db_type: DatabaseType) -> Option<&str> {
        self.drivers
            .get(&db_type)
            .map(String::as_str)
            .filter(|token| !token.is_empty())
    }

    /// Check if a driver was found for a family
    pub fn has_driver(&self, db_type: DatabaseType) -> bool {
        self.get_driver(db_type).is_some()
    }

    /// Every family the registry knows about, found or not
    pub fn get_supported_types(&self) -> Vec<DatabaseType> {
        DatabaseType::ALL.to_vec()
    }

    /// Files consulted during discovery
    pub fn searched(&self) -> &RegistryPaths {
        &self.searched
    }
}

/// Case-insensitive pattern for a family's section names
fn family_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Newest driver whose section name matches `pattern`, as a `{Section Name}` token.
///
/// Versions are compared first; equal versions fall back to the section name.
pub fn best_driver(sections: &[String], pattern: &Regex) -> Option<String> {
    sections
        .iter()
        .filter(|section| pattern.is_match(section))
        .map(|section| (DriverVersion::from_section_name(section), section))
        .max()
        .map(|(_, section)| format!("{{{}}}", section))
}
