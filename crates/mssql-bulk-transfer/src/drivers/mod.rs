//! Database driver implementations.

pub mod mssql;

pub use mssql::MssqlPool;
