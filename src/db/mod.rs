// Database Module
// Driver discovery, configuration merging, connection strings and query execution

pub mod config;
pub mod connection;
pub mod drivers;
pub mod ini;
pub mod query;
pub mod registry;
pub mod traits;
pub mod version;

pub use config::{get_config, CanonicalConfig, ConfigError, ConnectionParams};
pub use connection::{connect, connection_string, ConnectionError, ConnectionString};
pub use drivers::OdbcConnector;
pub use ini::{IniError, IniSections};
pub use query::{row_to_map, run_query, QueryOutcome, RowMap};
pub use registry::{best_driver, DriverRegistry, RegistryError, RegistryPaths};
pub use traits::{Backend, CellValue, Connector, Cursor, DatabaseType, DriverError, RawRow};
pub use version::DriverVersion;
