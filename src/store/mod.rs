//! Persistence layer: libSQL-backed session registry and event log.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::SessionRegistry;
