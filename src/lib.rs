// Module declarations
pub mod commands;
pub mod db;

use commands::{run_module, ModuleError, ModuleResult};
use db::{OdbcConnector, RegistryPaths};
use std::io::Read;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "SQL_QUERY_LOG";

/// Log to stderr; stdout carries only the result document
fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Invocation document from the file named by the first argument, or stdin
fn read_document() -> std::io::Result<String> {
    match std::env::args_os().nth(1) {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut document = String::new();
            std::io::stdin().read_to_string(&mut document)?;
            Ok(document)
        }
    }
}

/// Run the module once and return the process exit code
pub fn run() -> i32 {
    init_tracing();

    let result = match read_document() {
        Ok(document) => run_module(&document, &RegistryPaths::from_env(), OdbcConnector::new),
        Err(e) => ModuleResult::failure(&ModuleError::InvalidArguments(format!(
            "Failed to read module arguments: {}",
            e
        ))),
    };

    match serde_json::to_string(&result) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize result");
            return 1;
        }
    }

    if result.is_failed() {
        1
    } else {
        0
    }
}
