//! # strata-sql
//!
//! An embedded SQL execution engine layered on a pair of append-only,
//! key-ordered stores: a catalog store holding schema facts and a data
//! store holding row bytes and index entries under deterministic keys.
//!
//! The engine exposes a small relational language — database, table and
//! index creation, upserts, and queries with joins, filters, ordering,
//! grouping and aggregation — and translates every access into key-range
//! scans over the stores.
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use strata_kv::MemStore;
//! use strata_sql::{Engine, EngineOptions};
//!
//! # fn main() -> strata_sql::SqlResult<()> {
//! let engine = Engine::new(
//!     Arc::new(MemStore::new()),
//!     Arc::new(MemStore::new()),
//!     EngineOptions::new().with_prefix(2),
//! )?;
//!
//! let params = HashMap::new();
//! engine.exec_stmt("CREATE DATABASE db1", &params, true)?;
//! engine.exec_stmt("USE DATABASE db1", &params, true)?;
//! engine.exec_stmt(
//!     "CREATE TABLE notes (id INTEGER, body STRING, PRIMARY KEY id)",
//!     &params,
//!     true,
//! )?;
//! engine.exec_stmt("UPSERT INTO notes (id, body) VALUES (1, 'hello')", &params, true)?;
//!
//! let mut rows = engine.query_stmt("SELECT id, body FROM notes", &params)?;
//! let row = rows.next()?;
//! assert!(row.value("db1", "notes", "body").is_some());
//! rows.close();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod encoding;
mod engine;
pub mod error;
mod eval;
pub mod exec;
pub mod parser;
mod planner;
pub mod value;

pub use engine::{Engine, EngineOptions, ExecSummary};
pub use error::{SqlError, SqlResult};
pub use exec::{ColumnDescriptor, Row, RowReader};
pub use value::{SqlType, Value};
