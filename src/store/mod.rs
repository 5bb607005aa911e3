//! Persistence layer — libSQL-backed storage for jobs, artifacts, and
//! conversation memory.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{JobSnapshot, Store};
