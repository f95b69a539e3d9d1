// Database Drivers
// Implementations of the Connector/Cursor seam

pub mod odbc;

pub use odbc::{OdbcConnector, OdbcCursor};
