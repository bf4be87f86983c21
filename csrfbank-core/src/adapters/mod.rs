//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for the embedded, file-backed ledger
//! - An in-memory store for tests and throwaway runs

pub mod duckdb;
pub mod memory;
